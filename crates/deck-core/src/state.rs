//! Execution status state machine.
//!
//! `Running` is the only initial state; everything else is terminal and no
//! transition out of a terminal state is permitted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Process spawned, command dispatched, still in flight.
    Running,
    /// Session ended and the observed exit code was zero.
    Completed,
    /// Session ended with a non-zero exit code, or the start attempt failed
    /// after the record was persisted.
    Failed,
    /// Explicitly cancelled by the caller or by shutdown cleanup.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!(
                "invalid execution status '{other}'. valid values: running, completed, failed, cancelled"
            )),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether a status transition is valid.
///
/// The only legal moves are out of `Running` into a terminal state.
pub fn is_transition_allowed(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    if from == to {
        return true;
    }
    matches!(from, ExecutionStatus::Running) && to.is_terminal()
}

/// Derive the terminal status for an observed exit code.
pub fn status_for_exit_code(exit_code: i32) -> ExecutionStatus {
    if exit_code == 0 {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    }
}
