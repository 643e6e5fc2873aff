use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionCompleted { exit_code: Option<i32> },
    ExecutionFailed { message: String },
    ExecutionCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    /// Build an event for an execution, stamping an id from the timestamp.
    pub fn for_execution(
        execution_id: ExecutionId,
        task_id: TaskId,
        at: DateTime<Utc>,
        kind: EventKind,
    ) -> Self {
        let id = EventId(format!(
            "E-{}-{}",
            execution_id.0,
            at.timestamp_nanos_opt().unwrap_or_default()
        ));
        Self {
            id,
            execution_id,
            task_id,
            at,
            kind,
        }
    }
}

/// String tag for an event kind (for indexed storage and log filtering).
pub fn event_kind_tag(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::ExecutionStarted => "execution_started",
        EventKind::ExecutionCompleted { .. } => "execution_completed",
        EventKind::ExecutionFailed { .. } => "execution_failed",
        EventKind::ExecutionCancelled => "execution_cancelled",
    }
}
