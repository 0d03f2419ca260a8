//! Error taxonomy for session commands.
//!
//! None of these are fatal to the process. Every rejection leaves the session
//! untouched and carries a reason string the client may render.

use crate::protocol::ServerMessage;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Malformed command; nothing was mutated
    #[error("{0}")]
    Validation(String),

    /// A poll is already open
    #[error("{0}")]
    Conflict(String),

    /// Vote against a closed or missing poll
    #[error("{0}")]
    NotOpen(String),

    #[error("Option {ordinal} does not exist (poll has {available} options)")]
    UnknownOption { ordinal: usize, available: usize },

    /// Informational, the first vote stays recorded
    #[error("{identity} has already voted in this poll")]
    DuplicateVote { identity: String },

    #[error("{0}")]
    Forbidden(String),

    /// History persistence failed; the lifecycle went ahead regardless
    #[error("History store failure: {0}")]
    Storage(String),

    /// Transient transport fault for a single participant
    #[error("Connection error: {0}")]
    Connection(String),
}

impl SessionError {
    /// Wire code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Validation(_) => "VALIDATION_ERROR",
            SessionError::Conflict(_) => "CONFLICT",
            SessionError::NotOpen(_) => "NOT_OPEN",
            SessionError::UnknownOption { .. } => "UNKNOWN_OPTION",
            SessionError::DuplicateVote { .. } => "DUPLICATE_VOTE",
            SessionError::Forbidden(_) => "FORBIDDEN",
            SessionError::Storage(_) => "STORAGE_ERROR",
            SessionError::Connection(_) => "CONNECTION_ERROR",
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            msg: self.to_string(),
        }
    }
}

impl From<SessionError> for ServerMessage {
    fn from(e: SessionError) -> Self {
        e.to_message()
    }
}
