use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slink_db::{
    ChangeKind, Filter, Kind, Model, Query, Store, StoreError, Subscription, WatchError, fields,
};
use slink_types::events::ServerFrame;
use slink_types::models::{Channel, Principal};

use crate::registry::{SessionHandle, SessionRegistry, SessionState};
use crate::session::{Feed, SessionConfig, abandon, supervise, transition, write_loop};

/// A live view of the private chats one user belongs to.
///
/// The chats the user is in when it opens come first, then every chat that
/// is created with them in it or changes (a new message touches the chat's
/// `lastMessageSentAt`). Leaving a chat simply stops its updates.
#[derive(Debug)]
pub struct ChatWatcher {
    user_id: Uuid,
    subscription: Subscription,
}

impl ChatWatcher {
    pub async fn open(store: &Arc<dyn Store>, user_id: Uuid) -> Result<Self, StoreError> {
        let query = Query::new(Kind::Channel)
            .filter(Filter::eq(fields::PRIVATE, true))
            .filter(Filter::contains(fields::USER_IDS, user_id.to_string()));
        let subscription = store.watch(query).await?;

        debug!(%user_id, "Chat watch opened");
        Ok(Self {
            user_id,
            subscription,
        })
    }

    /// Next chat that appeared or changed; `Ok(None)` once the watch ended
    /// normally.
    pub async fn next(&mut self) -> Result<Option<Channel>, WatchError> {
        loop {
            let change = match self.subscription.next().await {
                None => return Ok(None),
                Some(Ok(change)) => change,
                Some(Err(e)) if e.is_benign() => {
                    debug!(user_id = %self.user_id, "Chat watch ended: {e}");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e),
            };

            if change.kind == ChangeKind::Removed {
                continue;
            }

            match Channel::from_document(change.doc) {
                Ok(chat) => return Ok(Some(chat)),
                Err(e) => warn!(user_id = %self.user_id, "Skipping unreadable chat: {e}"),
            }
        }
    }

    pub fn stop(&mut self) {
        if !self.subscription.is_stopped() {
            debug!(user_id = %self.user_id, "Chat watch stopped");
        }
        self.subscription.stop();
    }
}

impl Feed for ChatWatcher {
    async fn next_frame(&mut self) -> Result<Option<ServerFrame>, WatchError> {
        Ok(self.next().await?.map(ServerFrame::Channel))
    }

    fn release(&mut self) {
        self.stop();
    }
}

/// Pushes a user's private chats to one connection. Read-only: client frames
/// are ignored, and closing the connection ends the feed.
pub struct ChatFeed {
    id: Uuid,
    principal: Principal,
    store: Arc<dyn Store>,
    registry: SessionRegistry,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
}

impl ChatFeed {
    pub(crate) fn new(
        principal: Principal,
        store: Arc<dyn Store>,
        registry: SessionRegistry,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Opening);
        Self {
            id: Uuid::new_v4(),
            principal,
            store,
            registry,
            config,
            state,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs the feed until the client leaves, the watch ends, or the
    /// registry shuts down. The query only ever matches the principal's own
    /// chats, so there is nothing further to authorize.
    pub async fn run<K, S, E>(self, sink: K, stream: S)
    where
        K: Sink<WsMessage> + Unpin + Send + 'static,
        K::Error: Display + Send,
        S: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let cancel = self.registry.session_token();

        let watcher = match ChatWatcher::open(&self.store, self.principal.user_id).await {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(session_id = %self.id, "Failed to open chat watch: {e}");
                abandon(sink, &self.state, self.id).await;
                return;
            }
        };

        let _registration = self.registry.register(SessionHandle::new(
            self.id,
            None,
            self.principal.user_id,
            cancel.clone(),
            self.state.subscribe(),
        ));
        transition(&self.state, self.id, SessionState::Live);
        info!(
            session_id = %self.id,
            "{} ({}) opened chat feed",
            self.principal.screenname,
            self.principal.user_id
        );

        // Nothing is written through a feed, so its reply queue stays empty.
        let (_, replies) = mpsc::channel(1);

        let send_task = tokio::spawn(write_loop(
            sink,
            watcher,
            replies,
            cancel.clone(),
            self.registry.clone(),
            self.id,
        ));
        let recv_task = tokio::spawn(drain_loop(stream, cancel.clone(), self.id));

        supervise(
            self.id,
            &self.state,
            &cancel,
            self.config.close_grace,
            send_task,
            recv_task,
        )
        .await;

        info!(
            session_id = %self.id,
            "{} ({}) closed chat feed",
            self.principal.screenname,
            self.principal.user_id
        );
    }
}

/// Discards client frames until the client goes away.
async fn drain_loop<S, E>(mut stream: S, cancel: CancellationToken, session_id: Uuid)
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(%session_id, "WebSocket read failed: {e}");
                break;
            }
        }
    }
}
