use deck_core::types::ExecutionId;
use deck_pty::PtyError;
use deck_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid start request: {message}")]
    InvalidRequest { message: String },
    #[error("execution {execution_id} not found or not running")]
    NotRunning { execution_id: ExecutionId },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Host(#[from] PtyError),
}

#[cfg(test)]
mod tests {
    use super::ExecError;
    use deck_core::types::ExecutionId;

    #[test]
    fn not_running_error_names_the_execution() {
        let err = ExecError::NotRunning {
            execution_id: ExecutionId::new("X1-9"),
        };
        assert_eq!(err.to_string(), "execution X1-9 not found or not running");
    }

    #[test]
    fn invalid_request_formats_message() {
        let err = ExecError::InvalidRequest {
            message: "command must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid start request: command must not be empty"
        );
    }
}
