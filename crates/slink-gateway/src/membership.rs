use std::sync::Arc;

use uuid::Uuid;

use slink_db::Store;
use slink_types::models::{Channel, Principal};

use crate::error::ChatError;

/// Decides whether a principal may watch or write a channel.
///
/// Reads the channel fresh on every call; membership is never cached.
#[derive(Clone)]
pub struct MembershipGuard {
    store: Arc<dyn Store>,
}

impl MembershipGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        channel_id: Uuid,
    ) -> Result<Channel, ChatError> {
        let channel = self
            .store
            .fetch::<Channel>(channel_id)
            .await?
            .ok_or(ChatError::NotFound(channel_id))?;

        if !channel.is_member(principal.user_id) {
            return Err(ChatError::Unauthorized);
        }
        Ok(channel)
    }
}
