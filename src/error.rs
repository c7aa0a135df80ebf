//! Errors surfaced to the person chatting

use crate::db::DbError;
use crate::llm::{LlmError, LlmErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Database,
    Parsing,
}

/// Failure of a chat operation
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Network(#[from] LlmError),
    #[error("{0}")]
    Database(DbError),
    #[error("{0}")]
    Parsing(String),
}

impl From<DbError> for ChatError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Serialization(e) => ChatError::Parsing(e.to_string()),
            other => ChatError::Database(other),
        }
    }
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Network(_) => ErrorKind::Network,
            ChatError::Database(_) => ErrorKind::Database,
            ChatError::Parsing(_) => ErrorKind::Parsing,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network(e) => e.is_retryable(),
            ChatError::Database(_) => true,
            ChatError::Parsing(_) => false,
        }
    }

    /// Text suitable for showing next to the conversation
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Network(e) => match e.kind {
                LlmErrorKind::Auth => {
                    format!("The endpoint rejected the API key. {}", e.message)
                }
                LlmErrorKind::RateLimit => {
                    format!("Too many requests, try again shortly. {}", e.message)
                }
                _ => e.message.clone(),
            },
            ChatError::Database(e) => format!("Failed to save conversation: {e}"),
            ChatError::Parsing(msg) => format!("Stored conversation could not be read: {msg}"),
        }
    }
}
