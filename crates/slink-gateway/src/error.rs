use thiserror::Error;
use uuid::Uuid;

use slink_db::StoreError;
use slink_types::events::ErrorKind;

/// Failures of the membership check and the write path.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("user not in channel")]
    Unauthorized,

    #[error("channel {0} not found")]
    NotFound(Uuid),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Unauthorized => ErrorKind::Unauthorized,
            ChatError::NotFound(_) => ErrorKind::NotFound,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Store(_) => ErrorKind::Store,
        }
    }
}
