use std::collections::HashSet;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::Database;
use crate::models::{Document, Kind};
use crate::query::{Batch, Filter, Operation, Order, Query};
use crate::store::{Change, ChangeKind, Store, StoreError, Subscription, WatchError};

impl Database {
    /// Runs blocking SQLite work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn get_blocking(&self, kind: Kind, id: Uuid) -> Result<Option<Document>, StoreError> {
        self.with_conn(|conn| load(conn, kind, id))
    }

    fn query_blocking(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let (sql, params) = build_select(query)?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|data| Document::from_value(query.kind, serde_json::from_str(&data)?))
                .collect()
        })
    }

    fn commit_blocking(&self, batch: Batch) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut changes = Vec::with_capacity(batch.operations.len());

            for op in batch.operations {
                match op {
                    Operation::Create(doc) => {
                        insert(&tx, &doc)?;
                        changes.push(Change { kind: ChangeKind::Added, doc });
                    }
                    Operation::Update { kind, id, updates } => {
                        let mut data = load_value(&tx, kind, id)?
                            .ok_or(StoreError::NotFound { kind, id })?;
                        for update in &updates {
                            update.apply(&mut data)?;
                        }
                        // Round-trip through the typed model so a bad update
                        // cannot leave a document that no longer decodes.
                        let doc = Document::from_value(kind, data)?;
                        tx.execute(
                            "UPDATE documents SET data = ?1 WHERE kind = ?2 AND id = ?3",
                            rusqlite::params![
                                doc.to_value()?.to_string(),
                                kind.as_str(),
                                id.to_string()
                            ],
                        )?;
                        changes.push(Change { kind: ChangeKind::Modified, doc });
                    }
                }
            }

            tx.commit()?;

            // Published while the connection is still held, so watchers see
            // changes in commit order.
            for change in changes {
                trace!(kind = %change.doc.kind(), id = %change.doc.id(), "change committed");
                let _ = self.inner.changes.send(change);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Store for Database {
    async fn get(&self, kind: Kind, id: Uuid) -> Result<Option<Document>, StoreError> {
        self.blocking(move |db| db.get_blocking(kind, id)).await
    }

    async fn query(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        self.blocking(move |db| db.query_blocking(&query)).await
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.blocking(move |db| db.commit_blocking(batch)).await
    }

    async fn watch(&self, query: Query) -> Result<Subscription, StoreError> {
        // Subscribe before reading the snapshot so nothing committed in
        // between is missed; duplicates are dropped below.
        let mut rx = self.inner.changes.subscribe();
        let initial = self.query(query.clone()).await?;
        // A deadline too far out to represent is treated as none at all.
        let deadline = self
            .watch_deadline
            .and_then(|d| tokio::time::Instant::now().checked_add(d));

        let active = self.active_watches.clone();
        active.fetch_add(1, Ordering::SeqCst);
        debug!(kind = %query.kind, initial = initial.len(), "watch registered");

        let stream = async_stream::stream! {
            let mut seen: HashSet<Uuid> = HashSet::with_capacity(initial.len());
            for doc in initial {
                seen.insert(doc.id());
                yield Ok(Change { kind: ChangeKind::Added, doc });
            }

            loop {
                let received = match deadline {
                    Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                        Ok(received) => received,
                        Err(_) => {
                            yield Err(WatchError::DeadlineExceeded);
                            break;
                        }
                    },
                    None => rx.recv().await,
                };

                match received {
                    Ok(change) => {
                        if change.kind == ChangeKind::Added && seen.remove(&change.doc.id()) {
                            continue;
                        }
                        match query.matches(&change.doc) {
                            Ok(true) => yield Ok(change),
                            Ok(false) => {}
                            Err(e) => {
                                yield Err(WatchError::Transport(e.to_string()));
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        yield Err(WatchError::Lagged(n));
                        break;
                    }
                    Err(RecvError::Closed) => {
                        yield Err(WatchError::Cancelled);
                        break;
                    }
                }
            }
        };

        Ok(Subscription::new(Box::pin(stream), move || {
            active.fetch_sub(1, Ordering::SeqCst);
            debug!("watch stopped");
        }))
    }
}

fn load(conn: &Connection, kind: Kind, id: Uuid) -> Result<Option<Document>, StoreError> {
    load_value(conn, kind, id)?
        .map(|data| Document::from_value(kind, data))
        .transpose()
}

fn load_value(conn: &Connection, kind: Kind, id: Uuid) -> Result<Option<Value>, StoreError> {
    let mut stmt = conn.prepare("SELECT data FROM documents WHERE kind = ?1 AND id = ?2")?;
    let data: Option<String> = stmt
        .query_row(rusqlite::params![kind.as_str(), id.to_string()], |row| row.get(0))
        .optional()?;

    Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
}

fn insert(conn: &Connection, doc: &Document) -> Result<(), StoreError> {
    let kind = doc.kind();
    let id = doc.id();
    let result = conn.execute(
        "INSERT INTO documents (kind, id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            kind.as_str(),
            id.to_string(),
            doc.to_value()?.to_string(),
            nanos(doc.created_at())?,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::AlreadyExists { kind, id })
        }
        Err(e) => Err(e.into()),
    }
}

/// Translates a [`Query`] into SQL over the `documents` table.
fn build_select(query: &Query) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut sql = String::from("SELECT data FROM documents WHERE kind = ?");
    let mut params = vec![SqlValue::Text(query.kind.as_str().to_string())];

    for filter in &query.filters {
        match filter {
            Filter::Eq(path, Value::Null) => {
                sql.push_str(&format!(" AND json_extract(data, {}) IS NULL", json_path(path)?));
            }
            Filter::Eq(path, value) => {
                sql.push_str(&format!(" AND json_extract(data, {}) = ?", json_path(path)?));
                params.push(sql_value(value));
            }
            Filter::Contains(path, value) => {
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM json_each(documents.data, {}) WHERE json_each.value = ?)",
                    json_path(path)?
                ));
                params.push(sql_value(value));
            }
            Filter::CreatedAfter(instant) => {
                sql.push_str(" AND created_at > ?");
                params.push(SqlValue::Integer(nanos(*instant)?));
            }
        }
    }

    sql.push_str(match query.order {
        Order::OldestFirst => " ORDER BY created_at ASC, id ASC",
        Order::NewestFirst => " ORDER BY created_at DESC, id DESC",
    });

    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::from(limit)));
    }

    Ok((sql, params))
}

/// The `created_at` column holds nanoseconds since the epoch.
fn nanos(at: DateTime<Utc>) -> Result<i64, StoreError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {at}")))
}

/// Field paths are inlined so expression indexes apply; only plain
/// identifiers are accepted.
fn json_path(path: &str) -> Result<String, StoreError> {
    if path.is_empty() || !path.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::Backend(format!("invalid field path: {path:?}")));
    }
    Ok(format!("'$.{path}'"))
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use slink_types::models::{Channel, Message, WORLD_CHAT_ID};
    use tokio::time::timeout;

    use super::*;
    use crate::fields;
    use crate::query::FieldUpdate;

    fn channel(owner: Uuid) -> Channel {
        let now = Utc::now();
        Channel {
            id: Uuid::new_v4(),
            name: "general".into(),
            user_id: owner,
            user_ids: [owner].into_iter().collect(),
            private: false,
            last_message_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(channel_id: Uuid, body: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::now_v7(),
            channel_id,
            user_id: Uuid::new_v4(),
            body: body.into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn store() -> (Database, Arc<dyn Store>) {
        let db = Database::open_in_memory().unwrap();
        let store: Arc<dyn Store> = Arc::new(db.clone());
        (db, store)
    }

    #[tokio::test]
    async fn migrations_seed_world_chat() {
        let (_, store) = store();
        let world = store.fetch::<Channel>(WORLD_CHAT_ID).await.unwrap().unwrap();
        assert_eq!(world.name, "World Chat");
        assert!(!world.private);
    }

    #[tokio::test]
    async fn create_then_fetch() {
        let (_, store) = store();
        let owner = Uuid::new_v4();
        let ch = channel(owner);
        store.create(ch.clone()).await.unwrap();

        let fetched = store.fetch::<Channel>(ch.id).await.unwrap();
        assert_eq!(fetched, Some(ch.clone()));

        let err = store.create(ch).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { kind: Kind::Channel, .. }));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let (_, store) = store();
        let owner = Uuid::new_v4();
        let ch = channel(owner);
        let other = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();
        store.create(other.clone()).await.unwrap();

        let first = message(ch.id, "one");
        store.create(first.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = message(ch.id, "two");
        store.create(second.clone()).await.unwrap();
        store.create(message(other.id, "elsewhere")).await.unwrap();

        let in_channel = Query::new(Kind::Message)
            .filter(Filter::eq(fields::CHANNEL_ID, ch.id.to_string()));

        let oldest: Vec<Message> = store.query_as(in_channel.clone()).await.unwrap();
        assert_eq!(oldest, vec![first.clone(), second.clone()]);

        let newest: Vec<Message> = store
            .query_as(in_channel.order(Order::NewestFirst).limit(1))
            .await
            .unwrap();
        assert_eq!(newest, vec![second]);

        let mine: Vec<Channel> = store
            .query_as(Query::new(Kind::Channel).filter(Filter::contains(
                fields::USER_IDS,
                owner.to_string(),
            )))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, ch.id);

        let public: Vec<Channel> = store
            .query_as(Query::new(Kind::Channel).filter(Filter::eq(fields::PRIVATE, false)))
            .await
            .unwrap();
        assert_eq!(public.len(), 3);
    }

    #[tokio::test]
    async fn query_rejects_unsafe_paths() {
        let (_, store) = store();
        let err = store
            .query(Query::new(Kind::Channel).filter(Filter::eq("name') OR 1=1 --", "x")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_behind() {
        let (_, store) = store();
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();

        let msg = message(ch.id, "orphan");
        let missing = Uuid::new_v4();
        let batch = Batch::new()
            .create(Document::Message(msg.clone()))
            .update(Kind::Channel, missing, vec![FieldUpdate::set_time(
                fields::LAST_MESSAGE_SENT_AT,
                Utc::now(),
            )]);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: Kind::Channel, .. }));
        assert_eq!(store.fetch::<Message>(msg.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn batch_applies_create_and_update_together() {
        let (_, store) = store();
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();

        let msg = message(ch.id, "hi");
        let touched = msg.created_at;
        store
            .commit(
                Batch::new()
                    .create(Document::Message(msg.clone()))
                    .update(Kind::Channel, ch.id, vec![FieldUpdate::set_time(
                        fields::LAST_MESSAGE_SENT_AT,
                        touched,
                    )]),
            )
            .await
            .unwrap();

        let reloaded = store.fetch::<Channel>(ch.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_message_sent_at, Some(touched));
        assert_eq!(store.fetch::<Message>(msg.id).await.unwrap(), Some(msg));
    }

    #[tokio::test]
    async fn array_updates_keep_membership_a_set() {
        let (_, store) = store();
        let owner = Uuid::new_v4();
        let joiner = Uuid::new_v4();
        let ch = channel(owner);
        store.create(ch.clone()).await.unwrap();

        for _ in 0..2 {
            store
                .update(Kind::Channel, ch.id, vec![FieldUpdate::array_union(
                    fields::USER_IDS,
                    joiner.to_string(),
                )])
                .await
                .unwrap();
        }
        let reloaded = store.fetch::<Channel>(ch.id).await.unwrap().unwrap();
        assert_eq!(reloaded.user_ids.len(), 2);

        store
            .update(Kind::Channel, ch.id, vec![FieldUpdate::array_remove(
                fields::USER_IDS,
                owner.to_string(),
            )])
            .await
            .unwrap();
        let reloaded = store.fetch::<Channel>(ch.id).await.unwrap().unwrap();
        assert!(!reloaded.is_member(owner));
        assert!(reloaded.is_member(joiner));
    }

    #[tokio::test]
    async fn watch_yields_snapshot_then_live_changes() {
        let (db, store) = store();
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();
        let before = message(ch.id, "before");
        store.create(before.clone()).await.unwrap();

        let query = Query::new(Kind::Message)
            .filter(Filter::eq(fields::CHANNEL_ID, ch.id.to_string()));
        let mut sub = store.watch(query).await.unwrap();
        assert_eq!(db.active_watches(), 1);

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.doc, Document::Message(before));

        store.create(message(Uuid::new_v4(), "other channel")).await.unwrap();
        let live = message(ch.id, "live");
        store.create(live.clone()).await.unwrap();

        let next = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(next.doc, Document::Message(live));

        sub.stop();
        assert!(sub.next().await.is_none());
        assert_eq!(db.active_watches(), 0);
    }

    #[tokio::test]
    async fn watch_cutover_excludes_older_messages() {
        let (_, store) = store();
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();
        store.create(message(ch.id, "old")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let cutover = Utc::now();
        let mut sub = store
            .watch(
                Query::new(Kind::Message)
                    .filter(Filter::eq(fields::CHANNEL_ID, ch.id.to_string()))
                    .created_after(cutover),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let fresh = message(ch.id, "fresh");
        store.create(fresh.clone()).await.unwrap();

        let change = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(change.doc, Document::Message(fresh));
    }

    #[tokio::test]
    async fn cutover_separates_messages_within_one_microsecond() {
        let (_, store) = store();
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();

        let cutover = Utc::now();
        let mut at_cutover = message(ch.id, "at cutover");
        at_cutover.created_at = cutover;
        let mut just_after = message(ch.id, "just after");
        just_after.created_at = cutover + chrono::Duration::nanoseconds(1);
        store.create(at_cutover).await.unwrap();
        store.create(just_after.clone()).await.unwrap();

        let after: Vec<Message> = store
            .query_as(
                Query::new(Kind::Message)
                    .filter(Filter::eq(fields::CHANNEL_ID, ch.id.to_string()))
                    .created_after(cutover),
            )
            .await
            .unwrap();
        assert_eq!(after, vec![just_after]);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_means_unbounded() {
        let db = Database::open_in_memory()
            .unwrap()
            .with_watch_deadline(Some(Duration::MAX));
        let store: Arc<dyn Store> = Arc::new(db.clone());
        let ch = channel(Uuid::new_v4());
        store.create(ch.clone()).await.unwrap();

        let mut sub = store
            .watch(Query::new(Kind::Message).filter(Filter::eq(fields::CHANNEL_ID, ch.id.to_string())))
            .await
            .unwrap();
        assert_eq!(db.active_watches(), 1);

        let live = message(ch.id, "still watching");
        store.create(live.clone()).await.unwrap();
        let change = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(change.doc, Document::Message(live));
    }

    #[tokio::test]
    async fn dropping_subscription_releases_it() {
        let (db, store) = store();
        {
            let _sub = store.watch(Query::new(Kind::Message)).await.unwrap();
            assert_eq!(db.active_watches(), 1);
        }
        assert_eq!(db.active_watches(), 0);
    }

    #[tokio::test]
    async fn watch_deadline_ends_stream_benignly() {
        let db = Database::open_in_memory()
            .unwrap()
            .with_watch_deadline(Some(Duration::from_millis(20)));
        let store: Arc<dyn Store> = Arc::new(db);

        let mut sub = store.watch(Query::new(Kind::Message)).await.unwrap();
        let err = sub.next().await.unwrap().unwrap_err();
        assert_eq!(err, WatchError::DeadlineExceeded);
        assert!(err.is_benign());
        assert!(sub.next().await.is_none());
    }
}
