//! JSONL mirror of lifecycle notifications.
//!
//! One global file plus one file per execution, append-only. A restarted
//! host can replay what happened without touching the database.

use deck_notify::NotificationMessage;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize notification: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub execution_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let execution_dir = root.join("executions");
        Self {
            root,
            global_file,
            execution_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        fs::create_dir_all(&self.root).map_err(|source| EventLogError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir_all(&self.execution_dir).map_err(|source| EventLogError::CreateDir {
            path: self.execution_dir.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append_global(&self, message: &NotificationMessage) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, message)
    }

    pub fn append_execution(&self, message: &NotificationMessage) -> Result<(), EventLogError> {
        let file = self.execution_log_path(message.execution_id.as_ref());
        append_json_line(&file, message)
    }

    pub fn append_both(&self, message: &NotificationMessage) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(message)?;
        self.append_execution(message)?;
        Ok(())
    }

    pub fn execution_log_path(&self, execution_id: &str) -> PathBuf {
        self.execution_dir.join(format!("{execution_id}.jsonl"))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

fn append_json_line(
    path: &Path,
    message: &NotificationMessage,
) -> Result<(), EventLogError> {
    let line =
        serde_json::to_string(message).map_err(|source| EventLogError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })
}
