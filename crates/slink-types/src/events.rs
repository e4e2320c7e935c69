use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, Message};

/// Frames sent FROM server TO client over a live session.
///
/// Untagged so that message and chat frames stay the bare object; acks and
/// errors are wrapped under a single distinguishing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Ack { ack: Ack },
    Error { error: FrameError },
    Message(Message),
    /// A private chat the user belongs to appeared or changed.
    Channel(Channel),
}

/// Acknowledges an accepted write from this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: Uuid,
}

/// A per-request failure on the session's write path. Never closes the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    Validation,
    Store,
}

impl ServerFrame {
    pub fn ack(id: Uuid) -> Self {
        Self::Ack { ack: Ack { id } }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error: FrameError {
                kind,
                message: message.into(),
            },
        }
    }
}
