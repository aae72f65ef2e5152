use thiserror::Error;

use coterie_shared::{ChatId, CryptoError, MessageId};
use coterie_store::StoreError;

/// Errors surfaced by the chat engine.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Any storage I/O or transaction failure, always wrapping the cause.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The user is already present in the chat's current chunk.
    #[error("User is already a member of this chat")]
    AlreadyMember,

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Chat already exists: {0}")]
    ChatAlreadyExists(ChatId),

    /// Also returned for messages that exist but sit in chunks the caller
    /// never belonged to; "not visible" is deliberately indistinguishable
    /// from "does not exist".
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Message body too long: {size} bytes (max {max})")]
    MessageTooLong { size: usize, max: usize },

    /// A required collaborator is not bound.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ChatError {
    /// Translate store-layer failures that carry a domain meaning; anything
    /// else stays a wrapped storage error.
    pub(crate) fn from_store(e: StoreError) -> Self {
        match e {
            StoreError::BodyTooLong { size, max } => ChatError::MessageTooLong { size, max },
            other => ChatError::Storage(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
