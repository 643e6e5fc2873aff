//! Rendering of the command line written into a session.

use std::path::Path;

/// Render the line dispatched into a fresh session: change into the working
/// directory, then run the task command. The command string itself is opaque
/// and passed through unquoted; only the directory is quoted.
pub fn render_launch_command(workdir: &Path, command: &str) -> String {
    format!(
        "cd {} && {}",
        shell_quote(&workdir.display().to_string()),
        command
    )
}

pub fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}
