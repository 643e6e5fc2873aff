#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink is closed: {sink}")]
    SinkClosed { sink: String },
    #[error("notification sink failed: {message}")]
    SinkFailed { message: String },
}
