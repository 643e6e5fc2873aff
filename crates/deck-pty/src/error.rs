#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("pty setup failed: {message}")]
    PtySetup { message: String },
    #[error("shell spawn failed: {message}")]
    Spawn { message: String },
    #[error("no session with id {session_id}")]
    SessionNotFound { session_id: String },
    #[error("session {session_id} already exists")]
    SessionExists { session_id: String },
    #[error("write to session {session_id} failed: {source}")]
    Write {
        session_id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("resize of session {session_id} failed: {message}")]
    Resize { session_id: String, message: String },
}
