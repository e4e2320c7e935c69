use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use slink_db::{
    ChangeKind, Filter, Kind, Model, Query, Store, StoreError, Subscription, WatchError, fields,
};
use slink_types::models::Message;

/// A live view of the messages created in one channel after the moment it
/// was opened.
///
/// Only additions are surfaced; messages are immutable, so modifications and
/// removals are ignored.
#[derive(Debug)]
pub struct ChangeWatcher {
    channel_id: Uuid,
    cutover: DateTime<Utc>,
    subscription: Subscription,
}

impl ChangeWatcher {
    pub async fn open(store: &Arc<dyn Store>, channel_id: Uuid) -> Result<Self, StoreError> {
        // Taken immediately before registering so nothing committed after
        // this instant can be missed.
        let cutover = Utc::now();
        let query = Query::new(Kind::Message)
            .filter(Filter::eq(fields::CHANNEL_ID, channel_id.to_string()))
            .created_after(cutover);
        let subscription = store.watch(query).await?;

        debug!(%channel_id, %cutover, "Channel watch opened");
        Ok(Self {
            channel_id,
            cutover,
            subscription,
        })
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn cutover(&self) -> DateTime<Utc> {
        self.cutover
    }

    /// Next new message.
    ///
    /// `Ok(None)` means the watch ended normally (stopped, cancelled or past
    /// its deadline). Any other end is an error.
    pub async fn next(&mut self) -> Result<Option<Message>, WatchError> {
        loop {
            let change = match self.subscription.next().await {
                None => return Ok(None),
                Some(Ok(change)) => change,
                Some(Err(e)) if e.is_benign() => {
                    debug!(channel_id = %self.channel_id, "Channel watch ended: {e}");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e),
            };

            if change.kind != ChangeKind::Added {
                continue;
            }

            match Message::from_document(change.doc) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(channel_id = %self.channel_id, "Skipping unreadable message: {e}");
                }
            }
        }
    }

    /// Releases the underlying subscription. Idempotent.
    pub fn stop(&mut self) {
        if !self.subscription.is_stopped() {
            debug!(channel_id = %self.channel_id, "Channel watch stopped");
        }
        self.subscription.stop();
    }
}
