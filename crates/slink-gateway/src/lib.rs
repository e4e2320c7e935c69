pub mod chats;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod moderation;
pub mod registry;
pub mod session;
pub mod watcher;

use std::sync::Arc;

use uuid::Uuid;

use slink_db::Store;
use slink_types::models::Principal;

pub use chats::{ChatFeed, ChatWatcher};
pub use coordinator::WriteCoordinator;
pub use error::ChatError;
pub use membership::MembershipGuard;
pub use moderation::{Censor, WordListCensor};
pub use registry::{SessionHandle, SessionRegistry, SessionState};
pub use session::{AuthorizedSession, ConnectionSession, SessionConfig};
pub use watcher::ChangeWatcher;

/// Entry point for live sessions: owns the shared write path and the
/// registry every session is tracked in.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn Store>,
    coordinator: WriteCoordinator,
    registry: SessionRegistry,
    config: SessionConfig,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>, coordinator: WriteCoordinator, config: SessionConfig) -> Self {
        Self {
            store,
            coordinator,
            registry: SessionRegistry::new(),
            config,
        }
    }

    pub fn open_session(&self, principal: Principal, channel_id: Uuid) -> ConnectionSession {
        ConnectionSession::new(
            principal,
            channel_id,
            self.store.clone(),
            self.coordinator.clone(),
            self.registry.clone(),
            self.config,
        )
    }

    pub fn open_chat_feed(&self, principal: Principal) -> ChatFeed {
        ChatFeed::new(
            principal,
            self.store.clone(),
            self.registry.clone(),
            self.config,
        )
    }

    pub fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}
