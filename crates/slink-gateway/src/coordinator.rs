use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use slink_db::{Batch, Document, FieldUpdate, Kind, Store, StoreError, fields};
use slink_types::models::{Message, Principal};

use crate::error::ChatError;
use crate::membership::MembershipGuard;
use crate::moderation::Censor;

pub const DEFAULT_MAX_BODY_CHARS: usize = 2000;

/// The single write path for messages, shared by live sessions and REST.
///
/// A message and the channel's activity timestamps are committed in one
/// batch: either both are visible or neither is.
///
/// Stamping and committing happen under one lock shared by every clone, so
/// commit order, `createdAt` order and id order all agree.
#[derive(Clone)]
pub struct WriteCoordinator {
    store: Arc<dyn Store>,
    guard: MembershipGuard,
    censor: Option<Arc<dyn Censor>>,
    max_body_chars: usize,
    clock: Arc<Mutex<WriteClock>>,
}

/// Creation stamps that never repeat or go backwards, even if the wall
/// clock does.
#[derive(Debug, Default)]
struct WriteClock {
    last: Option<DateTime<Utc>>,
}

impl WriteClock {
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

impl WriteCoordinator {
    pub fn new(store: Arc<dyn Store>, guard: MembershipGuard) -> Self {
        Self {
            store,
            guard,
            censor: None,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            clock: Arc::default(),
        }
    }

    pub fn with_censor(mut self, censor: Arc<dyn Censor>) -> Self {
        self.censor = Some(censor);
        self
    }

    pub fn with_max_body_chars(mut self, max: usize) -> Self {
        self.max_body_chars = max;
        self
    }

    pub fn guard(&self) -> &MembershipGuard {
        &self.guard
    }

    pub async fn create_message(
        &self,
        principal: &Principal,
        channel_id: Uuid,
        body: &str,
    ) -> Result<Message, ChatError> {
        self.guard.authorize(principal, channel_id).await?;
        self.validate(body)?;

        let body = match &self.censor {
            Some(censor) => censor.censor(body),
            None => body.to_string(),
        };

        let mut clock = self.clock.lock().await;
        let now = clock.tick();
        let message = Message {
            id: Uuid::now_v7(),
            channel_id,
            user_id: principal.user_id,
            body,
            created_at: now,
            updated_at: now,
        };

        let batch = Batch::new()
            .create(Document::Message(message.clone()))
            .update(
                Kind::Channel,
                channel_id,
                vec![
                    FieldUpdate::set_time(fields::LAST_MESSAGE_SENT_AT, now),
                    FieldUpdate::set_time(fields::UPDATED_AT, now),
                ],
            );

        // No retry: a failed commit is reported to the caller as-is.
        self.store.commit(batch).await.map_err(|e| match e {
            // The channel vanished between the membership check and the commit.
            StoreError::NotFound {
                kind: Kind::Channel,
                ..
            } => ChatError::NotFound(channel_id),
            e => {
                warn!(%channel_id, user_id = %principal.user_id, "Message commit failed: {e}");
                ChatError::Store(e)
            }
        })?;
        drop(clock);

        debug!(message_id = %message.id, %channel_id, "Message created");
        Ok(message)
    }

    fn validate(&self, body: &str) -> Result<(), ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::Validation("body must not be empty".into()));
        }
        if body.chars().count() > self.max_body_chars {
            return Err(ChatError::Validation(format!(
                "body exceeds {} characters",
                self.max_body_chars
            )));
        }
        Ok(())
    }
}
