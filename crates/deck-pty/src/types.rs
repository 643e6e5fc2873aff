use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of PTY output, stamped when it was read off the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub at: DateTime<Utc>,
    pub text: String,
}
