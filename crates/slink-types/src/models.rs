use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed identifier of the public channel every new user is added to.
pub const WORLD_CHAT_ID: Uuid = Uuid::from_u128(1);
pub const WORLD_CHAT_NAME: &str = "World Chat";

/// A chat message. Immutable once created; the server assigns `created_at`,
/// which is authoritative for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "channelID")]
    pub channel_id: Uuid,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    /// Owning user.
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    /// Current members. The only source of truth for live-session and write access.
    #[serde(rename = "userIDs")]
    pub user_ids: BTreeSet<Uuid>,
    /// Private channels are direct chats and are never search-indexed.
    pub private: bool,
    #[serde(rename = "lastMessageSentAt", default)]
    pub last_message_sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.user_ids.contains(&user_id)
    }
}

/// Public view of a user. The password digest never leaves the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub screenname: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// The authenticated actor attached to every inbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub screenname: String,
}
