use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoryError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Storage connection is closed")]
    Closed,
}

impl DoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DoryError::ConversationNotFound(_) | DoryError::NotFound(_)
        )
    }
}

pub type DoryResult<T> = Result<T, DoryError>;
