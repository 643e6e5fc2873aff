use chrono::{DateTime, Utc};
use deck_core::types::{ExecutionId, ExecutionRecord, TaskId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTopic {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
}

/// A lifecycle notification pushed toward the host shell.
///
/// Started notifications carry only the identifiers; terminal notifications
/// also carry the refreshed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub at: DateTime<Utc>,
    pub topic: NotificationTopic,
    pub severity: NotificationSeverity,
    pub title: String,
    pub body: String,
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    #[serde(default)]
    pub record: Option<ExecutionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSinkKind {
    Stdout,
    Channel,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use deck_core::types::{ExecutionId, TaskId};

    use super::{
        NotificationMessage, NotificationSeverity, NotificationSinkKind, NotificationTopic,
    };

    #[test]
    fn enums_serialize_in_snake_case() {
        assert_eq!(
            serde_json::to_string(&NotificationTopic::ExecutionStarted)
                .expect("serialize topic"),
            "\"execution_started\""
        );
        assert_eq!(
            serde_json::to_string(&NotificationSeverity::Warning).expect("serialize severity"),
            "\"warning\""
        );
        assert_eq!(
            serde_json::to_string(&NotificationSinkKind::Channel).expect("serialize sink kind"),
            "\"channel\""
        );
    }

    #[test]
    fn message_roundtrip_preserves_optional_record() {
        let message = NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::ExecutionStarted,
            severity: NotificationSeverity::Info,
            title: "execution started".to_string(),
            body: "task T1".to_string(),
            execution_id: ExecutionId::new("X1"),
            task_id: TaskId::new("T1"),
            record: None,
        };

        let encoded = serde_json::to_string(&message).expect("serialize message");
        let decoded: NotificationMessage =
            serde_json::from_str(&encoded).expect("deserialize message");
        assert_eq!(decoded, message);
    }
}
