use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle of one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Authorizing,
    Live,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Opening => "opening",
            SessionState::Authorizing => "authorizing",
            SessionState::Live => "live",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What the registry knows about a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    /// `None` for a chat feed, which spans all of the user's private chats.
    pub channel_id: Option<Uuid>,
    pub user_id: Uuid,
    pub opened_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn new(
        session_id: Uuid,
        channel_id: Option<Uuid>,
        user_id: Uuid,
        cancel: CancellationToken,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            session_id,
            channel_id,
            user_id,
            opened_at: Utc::now(),
            cancel,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Asks the session to close. It tears down on its own task.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Tracks every live session so they can be enumerated and shut down together.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    /// Parent of every session's token; cancelling it closes them all.
    shutdown: CancellationToken,
    /// Signalled whenever a session is removed.
    removed: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                removed: Notify::new(),
            }),
        }
    }

    /// A token for a new session, cancelled on [`shutdown`](Self::shutdown).
    pub fn session_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Adds a session. It stays registered until the returned guard drops.
    pub fn register(&self, handle: SessionHandle) -> Registration {
        let session_id = handle.session_id;
        debug!(%session_id, channel_id = ?handle.channel_id, "Session registered");
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, handle);
        Registration {
            registry: self.clone(),
            session_id,
        }
    }

    fn remove(&self, session_id: Uuid) {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
        if removed.is_some() {
            debug!(%session_id, "Session unregistered");
            self.inner.removed.notify_waiters();
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned()
    }

    pub fn sessions_for_channel(&self, channel_id: Uuid) -> Vec<SessionHandle> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.channel_id == Some(channel_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every session, current and future.
    pub fn shutdown(&self) {
        info!("Closing {} live session(s)", self.len());
        self.inner.shutdown.cancel();
    }

    /// Waits until no sessions remain. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let removed = self.inner.removed.notified();
                if self.is_empty() {
                    return;
                }
                removed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a session registered; removes it on drop.
#[must_use = "the session is unregistered when this guard drops"]
pub struct Registration {
    registry: SessionRegistry,
    session_id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.session_id);
    }
}
