//! Core types for the taskdeck execution host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::ExecutionStatus;

/// Prefix used to derive a Process Host session id from an execution id.
pub const SESSION_ID_PREFIX: &str = "exec-";

static EXECUTION_NONCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a fresh execution id.
///
/// Timestamp nanos plus a process-local nonce, so rapid sequential calls in
/// the same process never collide.
pub fn next_execution_id() -> ExecutionId {
    let nonce = EXECUTION_NONCE.fetch_add(1, Ordering::Relaxed);
    ExecutionId(format!(
        "X{}-{nonce}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

/// Derive the Process Host session id for an execution.
///
/// Pure and deterministic: given an execution id the session id is always
/// recomputable without a lookup.
pub fn derive_session_id(execution_id: &ExecutionId) -> SessionId {
    SessionId(format!("{SESSION_ID_PREFIX}{}", execution_id.0))
}

/// One attempt to run a task's command in a dedicated host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// Build a fresh `running` record for a task.
    pub fn started(task_id: TaskId, started_at: DateTime<Utc>) -> Self {
        let id = next_execution_id();
        let session_id = derive_session_id(&id);
        Self {
            id,
            task_id,
            session_id,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            exit_code: None,
            error_message: None,
        }
    }
}

/// Request to start an execution for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub task_id: TaskId,
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

/// Handle returned to the caller once an execution is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedExecution {
    pub execution_id: ExecutionId,
    pub session_id: SessionId,
}
