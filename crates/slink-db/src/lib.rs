pub mod migrations;
pub mod models;
pub mod queries;
pub mod query;
pub mod store;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;

pub use models::{Document, Kind, Model, UserRecord, fields};
pub use query::{Batch, FieldUpdate, Filter, Operation, Order, Query};
pub use store::{Change, ChangeKind, Store, StoreError, Subscription, WatchError};

/// Committed changes buffered per watcher before it is considered lagged.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// SQLite-backed document store with an in-process change feed for watches.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    active_watches: Arc<AtomicUsize>,
    watch_deadline: Option<Duration>,
}

struct DatabaseInner {
    conn: Mutex<Connection>,
    /// Every committed change, in commit order.
    changes: broadcast::Sender<Change>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                conn: Mutex::new(conn),
                changes,
            }),
            active_watches: Arc::new(AtomicUsize::new(0)),
            watch_deadline: None,
        })
    }

    /// Bounds every watch opened from this handle; `None` means unbounded.
    pub fn with_watch_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.watch_deadline = deadline;
        self
    }

    /// Number of watch subscriptions not yet stopped.
    pub fn active_watches(&self) -> usize {
        self.active_watches.load(Ordering::SeqCst)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self
            .inner
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("DB lock poisoned: {e}")))?;
        f(&mut conn)
    }
}
