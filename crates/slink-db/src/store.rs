use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Document, Kind, Model};
use crate::query::{Batch, FieldUpdate, Query};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: Kind, id: Uuid },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: Kind, id: Uuid },

    #[error("expected a {expected} document, found {found}")]
    WrongKind { expected: Kind, found: Kind },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend: {0}")]
    Backend(String),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Why a watch stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("watch deadline exceeded")]
    DeadlineExceeded,

    #[error("watch cancelled")]
    Cancelled,

    #[error("watch fell behind by {0} changes")]
    Lagged(u64),

    #[error("watch transport: {0}")]
    Transport(String),
}

impl WatchError {
    /// Deadline and cancellation are normal ends of a subscription, not failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, WatchError::DeadlineExceeded | WatchError::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub doc: Document,
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<Change, WatchError>> + Send>>;

/// An open watch against the store.
///
/// The underlying subscription is released exactly once: on [`stop`](Self::stop)
/// or, failing that, when the handle is dropped.
pub struct Subscription {
    stream: Option<ChangeStream>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(stream: ChangeStream, on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stream: Some(stream),
            on_stop: Some(Box::new(on_stop)),
        }
    }

    /// Next change, or `None` once the stream is exhausted or stopped.
    pub async fn next(&mut self) -> Option<Result<Change, WatchError>> {
        let stream = self.stream.as_mut()?;
        stream.next().await
    }

    pub fn stop(&mut self) {
        self.stream = None;
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.on_stop.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// The document store collaborator.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get(&self, kind: Kind, id: Uuid) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: Query) -> Result<Vec<Document>, StoreError>;

    /// Applies every operation in the batch or none of them.
    async fn commit(&self, batch: Batch) -> Result<(), StoreError>;

    async fn update(
        &self,
        kind: Kind,
        id: Uuid,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        self.commit(Batch::new().update(kind, id, updates)).await
    }

    /// Registers a watch for documents matching `query`. Current matches are
    /// delivered first as `Added`, followed by live changes.
    async fn watch(&self, query: Query) -> Result<Subscription, StoreError>;
}

// Typed accessors so callers never match on `Document` themselves.
impl dyn Store {
    pub async fn fetch<M: Model>(&self, id: Uuid) -> Result<Option<M>, StoreError> {
        self.get(M::KIND, id)
            .await?
            .map(M::from_document)
            .transpose()
    }

    pub async fn fetch_many<M: Model>(&self, ids: &[Uuid]) -> Result<Vec<M>, StoreError> {
        let mut models = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(model) = self.fetch::<M>(*id).await? {
                models.push(model);
            }
        }
        Ok(models)
    }

    pub async fn query_as<M: Model>(&self, query: Query) -> Result<Vec<M>, StoreError> {
        self.query(query)
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    pub async fn first<M: Model>(&self, query: Query) -> Result<Option<M>, StoreError> {
        Ok(self.query_as::<M>(query.limit(1)).await?.into_iter().next())
    }

    pub async fn create<M: Model>(&self, model: M) -> Result<(), StoreError> {
        self.commit(Batch::new().create(model.into_document())).await
    }
}
