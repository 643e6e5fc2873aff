//! Map lifecycle events to notifications.

use deck_core::events::{Event, EventKind};
use deck_core::types::ExecutionRecord;

use crate::types::{NotificationMessage, NotificationSeverity, NotificationTopic};

/// Map a lifecycle event to the notification pushed at the host shell.
///
/// Terminal events carry the refreshed record when the caller has one.
pub fn notification_for_event(
    event: &Event,
    record: Option<ExecutionRecord>,
) -> NotificationMessage {
    let (topic, severity, title, body) = match &event.kind {
        EventKind::ExecutionStarted => (
            NotificationTopic::ExecutionStarted,
            NotificationSeverity::Info,
            "Execution started".to_string(),
            format!("Execution {} started for task {}", event.execution_id, event.task_id),
        ),
        EventKind::ExecutionCompleted { exit_code } => (
            NotificationTopic::ExecutionCompleted,
            NotificationSeverity::Info,
            "Execution completed".to_string(),
            match exit_code {
                Some(code) => format!("Execution {} finished with exit code {code}", event.execution_id),
                None => format!("Execution {} finished", event.execution_id),
            },
        ),
        EventKind::ExecutionFailed { message } => (
            NotificationTopic::ExecutionFailed,
            NotificationSeverity::Error,
            "Execution failed".to_string(),
            format!("Execution {} failed: {message}", event.execution_id),
        ),
        EventKind::ExecutionCancelled => (
            NotificationTopic::ExecutionCancelled,
            NotificationSeverity::Warning,
            "Execution cancelled".to_string(),
            format!("Execution {} was cancelled", event.execution_id),
        ),
    };

    NotificationMessage {
        at: event.at,
        topic,
        severity,
        title,
        body,
        execution_id: event.execution_id.clone(),
        task_id: event.task_id.clone(),
        record,
    }
}
