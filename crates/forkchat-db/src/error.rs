#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("message '{message_id}' does not belong to conversation '{conversation_id}'")]
    MessageConversationMismatch {
        conversation_id: String,
        message_id: String,
    },

    #[error("message '{message_id}' is not on the active path of conversation '{conversation_id}'")]
    MessageNotInPath {
        conversation_id: String,
        message_id: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse failure classes callers branch on.
///
/// Every error leaves the store unchanged, so `StorageFailure` is safe to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    StorageFailure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ProjectNotFound(_)
            | Error::ConversationNotFound(_)
            | Error::MessageNotFound(_)
            | Error::MessageConversationMismatch { .. }
            | Error::MessageNotInPath { .. } => ErrorKind::NotFound,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Sqlite(_) | Error::Json(_) => ErrorKind::StorageFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;
