//! Storage-side document types. The `Kind` discriminator exists only here;
//! callers go through [`Model`] to get typed values back out.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use slink_types::models::{Channel, Message, User};

use crate::store::StoreError;

/// JSON field paths used by queries and updates.
pub mod fields {
    pub const CHANNEL_ID: &str = "channelID";
    pub const USER_IDS: &str = "userIDs";
    pub const PRIVATE: &str = "private";
    pub const NAME: &str = "name";
    pub const SCREENNAME: &str = "screenname";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const LAST_MESSAGE_SENT_AT: &str = "lastMessageSentAt";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    User,
    Channel,
    Message,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::User => "user",
            Kind::Channel => "channel",
            Kind::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Kind::User),
            "channel" => Some(Kind::Channel),
            "message" => Some(Kind::Message),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User as persisted, including the password digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub screenname: String,
    #[serde(rename = "passwordDigest")]
    pub password_digest: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<&UserRecord> for User {
    fn from(record: &UserRecord) -> Self {
        User {
            id: record.id,
            screenname: record.screenname.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Every document the store holds, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    User(UserRecord),
    Channel(Channel),
    Message(Message),
}

impl Document {
    pub fn kind(&self) -> Kind {
        match self {
            Document::User(_) => Kind::User,
            Document::Channel(_) => Kind::Channel,
            Document::Message(_) => Kind::Message,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Document::User(u) => u.id,
            Document::Channel(c) => c.id,
            Document::Message(m) => m.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Document::User(u) => u.created_at,
            Document::Channel(c) => c.created_at,
            Document::Message(m) => m.created_at,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, StoreError> {
        let value = match self {
            Document::User(u) => serde_json::to_value(u)?,
            Document::Channel(c) => serde_json::to_value(c)?,
            Document::Message(m) => serde_json::to_value(m)?,
        };
        Ok(value)
    }

    pub fn from_value(kind: Kind, value: serde_json::Value) -> Result<Self, StoreError> {
        let doc = match kind {
            Kind::User => Document::User(serde_json::from_value(value)?),
            Kind::Channel => Document::Channel(serde_json::from_value(value)?),
            Kind::Message => Document::Message(serde_json::from_value(value)?),
        };
        Ok(doc)
    }
}

/// A typed view over one document kind.
pub trait Model: Sized + Send + 'static {
    const KIND: Kind;

    fn from_document(doc: Document) -> Result<Self, StoreError>;
    fn into_document(self) -> Document;
}

macro_rules! impl_model {
    ($ty:ty, $variant:ident) => {
        impl Model for $ty {
            const KIND: Kind = Kind::$variant;

            fn from_document(doc: Document) -> Result<Self, StoreError> {
                match doc {
                    Document::$variant(inner) => Ok(inner),
                    other => Err(StoreError::WrongKind {
                        expected: Kind::$variant,
                        found: other.kind(),
                    }),
                }
            }

            fn into_document(self) -> Document {
                Document::$variant(self)
            }
        }
    };
}

impl_model!(UserRecord, User);
impl_model!(Channel, Channel);
impl_model!(Message, Message);
