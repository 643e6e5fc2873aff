use deck_core::state::ExecutionStatus;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("stored status tag '{value}' is not a known execution status")]
    StatusParse { value: String },
    #[error("no execution with id {execution_id}")]
    ExecutionNotFound { execution_id: String },
    #[error("invalid status transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    #[error("failed to create store parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn status_parse_error_names_the_bad_tag() {
        let err = StoreError::StatusParse {
            value: "paused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "stored status tag 'paused' is not a known execution status"
        );
    }

    #[test]
    fn execution_not_found_names_the_id() {
        let err = StoreError::ExecutionNotFound {
            execution_id: "X1-1".to_string(),
        };
        assert_eq!(err.to_string(), "no execution with id X1-1");
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = StoreError::InvalidTransition {
            execution_id: "X1".to_string(),
            from: deck_core::state::ExecutionStatus::Completed,
            to: deck_core::state::ExecutionStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for execution X1: completed -> cancelled"
        );
    }
}
