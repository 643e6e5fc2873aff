//! Configuration for the taskdeck execution host.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Host-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeckConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Default geometry and shell for Process Host sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub shell: String,
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            rows: 40,
            cols: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Completion-detection polling interval.
    pub poll_interval_ms: u64,
    /// Directory commands run in when the start request names none.
    /// Unset means: `$HOME`, then the system temp directory.
    #[serde(default)]
    pub fallback_workdir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            fallback_workdir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Mirror lifecycle notifications to stderr-adjacent stdout lines.
    pub stdout: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { stdout: true }
    }
}

/// Resolve the working directory an execution falls back to.
///
/// Configured directory wins; otherwise `$HOME`, otherwise the temp dir.
pub fn resolve_fallback_workdir(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    match env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => env::temp_dir(),
    }
}

pub fn parse_config(contents: &str) -> Result<DeckConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<DeckConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Load a config file, falling back to defaults when the file is absent.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<DeckConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(DeckConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &DeckConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().map(Path::to_path_buf) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn parse_config_reads_all_sections() {
        let config = parse_config(
            r#"
[terminal]
shell = "zsh"
rows = 50
cols = 160

[execution]
poll_interval_ms = 250
fallback_workdir = "/srv/work"

[notifications]
stdout = false
"#,
        )
        .expect("parse config");

        assert_eq!(config.terminal.shell, "zsh");
        assert_eq!(config.terminal.rows, 50);
        assert_eq!(config.terminal.cols, 160);
        assert_eq!(config.execution.poll_interval_ms, 250);
        assert_eq!(
            config.execution.fallback_workdir,
            Some(PathBuf::from("/srv/work"))
        );
        assert!(!config.notifications.stdout);
    }

    #[test]
    fn parse_config_defaults_missing_sections() {
        let config = parse_config("").expect("parse empty config");
        assert_eq!(config, DeckConfig::default());
        assert_eq!(config.terminal.shell, "bash");
        assert_eq!(config.execution.poll_interval_ms, 1000);
        assert!(config.notifications.stdout);
    }

    #[test]
    fn load_config_or_default_returns_defaults_for_missing_file() {
        let missing = unique_temp_path("taskdeck-missing-config");
        let config = load_config_or_default(&missing).expect("defaults for missing file");
        assert_eq!(config, DeckConfig::default());
    }

    #[test]
    fn load_config_classifies_read_and_parse_errors() {
        let missing = unique_temp_path("taskdeck-missing-config");
        let err = load_config(&missing).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing));

        let invalid = unique_temp_path("taskdeck-invalid-config");
        fs::write(&invalid, "terminal = [").expect("write invalid config fixture");
        let err = load_config(&invalid).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid));
        let _ = fs::remove_file(invalid);
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let mut config = DeckConfig::default();
        config.terminal.rows = 32;
        config.execution.poll_interval_ms = 100;

        let path = unique_temp_path("taskdeck-config-roundtrip");
        save_config(&path, &config).expect("save config");
        let loaded = load_config(&path).expect("load config");
        assert_eq!(loaded, config);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn resolve_fallback_workdir_prefers_configured_path() {
        let configured = PathBuf::from("/srv/deck");
        assert_eq!(
            resolve_fallback_workdir(Some(configured.as_path())),
            configured
        );
    }

    #[test]
    fn resolve_fallback_workdir_without_config_is_home_or_temp() {
        let resolved = resolve_fallback_workdir(None);
        let home = std::env::var_os("HOME").filter(|value| !value.is_empty());
        match home {
            Some(home) => assert_eq!(resolved, PathBuf::from(home)),
            None => assert_eq!(resolved, std::env::temp_dir()),
        }
    }
}
