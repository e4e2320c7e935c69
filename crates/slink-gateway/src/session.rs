use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slink_db::{Store, WatchError};
use slink_types::api::CreateMessageRequest;
use slink_types::events::{ErrorKind, ServerFrame};
use slink_types::models::{Channel, Principal};

use crate::coordinator::WriteCoordinator;
use crate::error::ChatError;
use crate::registry::{SessionHandle, SessionRegistry, SessionState};
use crate::watcher::ChangeWatcher;

pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Replies buffered for the writer before the reader waits.
    pub outbound_queue: usize,
    /// How long teardown waits for each side before aborting it.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

/// One client's live view of one channel, before authorization.
pub struct ConnectionSession {
    id: Uuid,
    principal: Principal,
    channel_id: Uuid,
    store: Arc<dyn Store>,
    coordinator: WriteCoordinator,
    registry: SessionRegistry,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
}

/// A session whose principal has been checked against the channel's members.
pub struct AuthorizedSession {
    session: ConnectionSession,
    channel: Channel,
}

/// A watch whose changes are pushed to the client as frames.
pub(crate) trait Feed: Send + 'static {
    /// Next frame to push; `Ok(None)` once the watch ends normally.
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<ServerFrame>, WatchError>> + Send;

    fn release(&mut self);
}

impl Feed for ChangeWatcher {
    async fn next_frame(&mut self) -> Result<Option<ServerFrame>, WatchError> {
        Ok(self.next().await?.map(ServerFrame::Message))
    }

    fn release(&mut self) {
        self.stop();
    }
}

/// Why the writer side stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Cancelled,
    WatchEnded,
    WatchFailed,
    TransportClosed,
}

impl ConnectionSession {
    pub(crate) fn new(
        principal: Principal,
        channel_id: Uuid,
        store: Arc<dyn Store>,
        coordinator: WriteCoordinator,
        registry: SessionRegistry,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Opening);
        Self {
            id: Uuid::new_v4(),
            principal,
            channel_id,
            store,
            coordinator,
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

    fn transition(&self, next: SessionState) {
        transition(&self.state, self.id, next);
    }

    /// Must succeed before any transport is accepted for this session.
    pub async fn authorize(self) -> Result<AuthorizedSession, ChatError> {
        self.transition(SessionState::Authorizing);
        match self
            .coordinator
            .guard()
            .authorize(&self.principal, self.channel_id)
            .await
        {
            Ok(channel) => Ok(AuthorizedSession {
                session: self,
                channel,
            }),
            Err(e) => {
                info!(
                    session_id = %self.id,
                    user_id = %self.principal.user_id,
                    channel_id = %self.channel_id,
                    "Session rejected: {e}"
                );
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }
}

impl AuthorizedSession {
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe_state()
    }

    /// Drives the session over an established transport until either side
    /// ends it, the watch ends, or the registry shuts down.
    pub async fn run<K, S, E>(self, sink: K, stream: S)
    where
        K: Sink<WsMessage> + Unpin + Send + 'static,
        K::Error: Display + Send,
        S: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let session = self.session;
        let cancel = session.registry.session_token();

        // The watch is registered before any client frame is read, so the
        // session observes its own writes.
        let watcher = match ChangeWatcher::open(&session.store, session.channel_id).await {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(session_id = %session.id, "Failed to open channel watch: {e}");
                abandon(sink, &session.state, session.id).await;
                return;
            }
        };

        let _registration = session.registry.register(SessionHandle::new(
            session.id,
            Some(session.channel_id),
            session.principal.user_id,
            cancel.clone(),
            session.state.subscribe(),
        ));
        session.transition(SessionState::Live);
        info!(
            session_id = %session.id,
            "{} ({}) joined channel {} live",
            session.principal.screenname,
            session.principal.user_id,
            self.channel.name
        );

        let (reply_tx, reply_rx) = mpsc::channel(session.config.outbound_queue.max(1));

        let send_task = tokio::spawn(write_loop(
            sink,
            watcher,
            reply_rx,
            cancel.clone(),
            session.registry.clone(),
            session.id,
        ));
        let recv_task = tokio::spawn(read_loop(
            stream,
            session.coordinator.clone(),
            session.principal.clone(),
            session.channel_id,
            reply_tx,
            cancel.clone(),
        ));

        supervise(
            session.id,
            &session.state,
            &cancel,
            session.config.close_grace,
            send_task,
            recv_task,
        )
        .await;

        info!(
            session_id = %session.id,
            "{} ({}) left channel {}",
            session.principal.screenname,
            session.principal.user_id,
            session.channel_id
        );
    }
}

pub(crate) fn transition(state: &watch::Sender<SessionState>, session_id: Uuid, next: SessionState) {
    let prev = state.send_replace(next);
    debug!(%session_id, %prev, %next, "Session state changed");
}

/// Closes a transport whose watch could not be opened.
pub(crate) async fn abandon<K>(mut sink: K, state: &watch::Sender<SessionState>, session_id: Uuid)
where
    K: Sink<WsMessage> + Unpin,
{
    transition(state, session_id, SessionState::Closing);
    send_close(&mut sink, close_code::ERROR, "channel watch failed").await;
    let _ = sink.close().await;
    transition(state, session_id, SessionState::Closed);
}

/// Waits for either side to finish or the session to be cancelled, then
/// gives the other side until the close grace runs out before aborting it.
pub(crate) async fn supervise(
    session_id: Uuid,
    state: &watch::Sender<SessionState>,
    cancel: &CancellationToken,
    close_grace: Duration,
    mut send_task: JoinHandle<Exit>,
    mut recv_task: JoinHandle<()>,
) {
    let (send_done, recv_done) = tokio::select! {
        _ = &mut send_task => (true, false),
        _ = &mut recv_task => (false, true),
        _ = cancel.cancelled() => (false, false),
    };

    transition(state, session_id, SessionState::Closing);
    cancel.cancel();

    let deadline = Instant::now() + close_grace;
    if !send_done {
        finish(send_task, deadline, session_id, "writer").await;
    }
    if !recv_done {
        finish(recv_task, deadline, session_id, "reader").await;
    }

    transition(state, session_id, SessionState::Closed);
}

async fn finish<T>(mut task: JoinHandle<T>, deadline: Instant, session_id: Uuid, side: &str) {
    if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
        warn!(%session_id, "Session {side} did not stop in time, aborting");
        task.abort();
    }
}

/// Reads client frames and turns them into writes.
async fn read_loop<S, E>(
    mut stream: S,
    coordinator: WriteCoordinator,
    principal: Principal,
    channel_id: Uuid,
    replies: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(user_id = %principal.user_id, "WebSocket read failed: {e}");
                break;
            }
        };

        let reply = handle_frame(&coordinator, &principal, channel_id, text.as_str()).await;

        // Bounded queue: a slow client holds up only its own writes.
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = replies.send(reply) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_frame(
    coordinator: &WriteCoordinator,
    principal: &Principal,
    channel_id: Uuid,
    text: &str,
) -> ServerFrame {
    let request: CreateMessageRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return ServerFrame::error(ErrorKind::Validation, format!("malformed frame: {e}"));
        }
    };

    match coordinator
        .create_message(principal, channel_id, &request.body)
        .await
    {
        Ok(message) => ServerFrame::ack(message.id),
        Err(ChatError::Store(e)) => {
            warn!(user_id = %principal.user_id, %channel_id, "Write from session failed: {e}");
            ServerFrame::error(ErrorKind::Store, "message could not be saved")
        }
        Err(e) => ServerFrame::error(e.kind(), e.to_string()),
    }
}

/// Forwards watched changes and write replies to the client, then tears
/// down in order: watch, reply queue, connection.
pub(crate) async fn write_loop<K, F>(
    mut sink: K,
    mut feed: F,
    mut replies: mpsc::Receiver<ServerFrame>,
    cancel: CancellationToken,
    registry: SessionRegistry,
    session_id: Uuid,
) -> Exit
where
    K: Sink<WsMessage> + Unpin,
    K::Error: Display,
    F: Feed,
{
    let exit = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            Some(reply) = replies.recv() => reply,
            next = feed.next_frame() => match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break Exit::WatchEnded,
                Err(e) => {
                    error!(%session_id, "Watch failed: {e}");
                    break Exit::WatchFailed;
                }
            },
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(%session_id, "Failed to encode frame: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            debug!(%session_id, "WebSocket write failed: {e}");
            break Exit::TransportClosed;
        }
    };

    feed.release();
    replies.close();
    drop(replies);

    match exit {
        Exit::Cancelled if registry.is_shutting_down() => {
            send_close(&mut sink, close_code::AWAY, "server shutting down").await;
        }
        Exit::Cancelled | Exit::WatchEnded => {
            send_close(&mut sink, close_code::NORMAL, "").await;
        }
        Exit::WatchFailed => {
            send_close(&mut sink, close_code::ERROR, "channel watch failed").await;
        }
        Exit::TransportClosed => {}
    }
    let _ = sink.close().await;

    debug!(%session_id, ?exit, "Session writer stopped");
    exit
}

async fn send_close<K>(sink: &mut K, code: u16, reason: &'static str)
where
    K: Sink<WsMessage> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sink.send(WsMessage::Close(Some(frame))).await;
}
