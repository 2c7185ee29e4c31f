use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docstore_protocol::{Error, EventEnvelope, EventType};
use rusqlite::types::Value as SqlValue;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::events::{build_kind, dedup_by_id, subscription_matches, RawEventRow};
use crate::gateway::SqlGateway;
use crate::triggers::TriggerInstaller;
use crate::util::new_id;

/// A single async callback invoked per dispatched event. Modeled as a
/// trait rather than a bare closure so the runner can hold heterogeneous
/// subscribers uniformly (spec.md §9). Returning `Err` marks the delivery
/// as failed: the runner logs it, backs off, and redelivers on the next
/// iteration — the cursor for that subscription is not advanced.
#[async_trait]
pub trait SubscriptionCallback: Send + Sync {
    async fn on_event(&self, event: EventEnvelope) -> anyhow::Result<()>;
}

/// Adapts a plain async closure into a `SubscriptionCallback`, for call
/// sites that don't want to name a type.
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F, Fut> SubscriptionCallback for FnCallback<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_event(&self, event: EventEnvelope) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

struct Subscription {
    id: String,
    on: EventType,
    cursor: i64,
    callback: Arc<dyn SubscriptionCallback>,
}

/// One cooperative poll/dispatch loop per collection with at least one live
/// subscription (spec.md §4.F).
struct Runner {
    collection: String,
    gateway: SqlGateway,
    subs: AsyncMutex<Vec<Subscription>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl Runner {
    fn new(collection: String, gateway: SqlGateway) -> Self {
        Self {
            collection,
            gateway,
            subs: AsyncMutex::new(Vec::new()),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn wake(&self) {
        self.notify.notify_one();
    }

    fn spawn(self: Arc<Self>) {
        tokio::spawn(async move { self.run_loop().await });
    }

    async fn run_loop(self: Arc<Self>) {
        let mut empty_polls: u32 = 0;

        'poll: loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let earliest = {
                let subs = self.subs.lock().await;
                match subs.iter().map(|s| s.cursor).min() {
                    Some(c) => c,
                    None => return,
                }
            };

            let peek: Option<RawEventRow> = match self
                .gateway
                .find_one(
                    format!(
                        "SELECT col, id, type, date, before, after FROM _events \
                         WHERE col = ? AND date > ? ORDER BY date ASC LIMIT 1"
                    ),
                    vec![SqlValue::Text(self.collection.clone()), SqlValue::Integer(earliest)],
                )
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(collection = %self.collection, error = %e, "event poll failed");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue 'poll;
                }
            };

            let Some(peek) = peek else {
                let delay = backoff(empty_polls);
                empty_polls = empty_polls.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = self.notify.notified() => {},
                }
                continue 'poll;
            };

            let batch_date = peek.date;
            let batch: Vec<RawEventRow> = match self
                .gateway
                .query(
                    "SELECT col, id, type, date, before, after FROM _events \
                     WHERE col = ? AND date = ? ORDER BY date ASC"
                        .to_string(),
                    vec![SqlValue::Text(self.collection.clone()), SqlValue::Integer(batch_date)],
                )
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(collection = %self.collection, error = %e, "batch fetch failed");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue 'poll;
                }
            };

            let batch = dedup_by_id(batch);

            // Snapshot the subscriptions eligible for this batch *before*
            // delivering anything, rather than consulting the live cursor
            // mid-batch: every row in `batch` shares `batch_date`, so a
            // live-cursor check would go stale after the first delivery and
            // silently drop the rest of the batch (spec.md S5 requires every
            // distinct id in a tied batch to be delivered). The lock is held
            // only long enough to clone the handful of fields each callback
            // needs — never across an `.await`.
            struct Eligible {
                id: String,
                on: EventType,
                callback: Arc<dyn SubscriptionCallback>,
            }
            let eligible: Vec<Eligible> = {
                let subs = self.subs.lock().await;
                subs.iter()
                    .filter(|s| s.cursor < batch_date)
                    .map(|s| Eligible {
                        id: s.id.clone(),
                        on: s.on,
                        callback: s.callback.clone(),
                    })
                    .collect()
            };

            for elig in &eligible {
                let mut failed = false;

                for raw in &batch {
                    let Some(row_type) = EventType::from_str(&raw.row_type) else {
                        tracing::warn!(row_type = %raw.row_type, "unknown event type in _events row, skipping");
                        continue;
                    };
                    if !subscription_matches(elig.on, row_type) {
                        continue;
                    }

                    let kind = match build_kind(elig.on, raw) {
                        Ok(k) => k,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed event row, skipping delivery");
                            continue;
                        }
                    };

                    let envelope = EventEnvelope {
                        collection: self.collection.clone(),
                        id: raw.id.clone(),
                        date: raw.date,
                        kind,
                    };

                    match elig.callback.on_event(envelope).await {
                        Ok(()) => {
                            if let Err(e) = self
                                .gateway
                                .run(
                                    "UPDATE _cursors SET date = ? WHERE name = ?".to_string(),
                                    vec![SqlValue::Integer(raw.date), SqlValue::Text(elig.id.clone())],
                                )
                                .await
                            {
                                tracing::error!(error = %e, "failed to persist cursor");
                            }
                            let mut subs = self.subs.lock().await;
                            if let Some(sub) = subs.iter_mut().find(|s| s.id == elig.id) {
                                sub.cursor = raw.date;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                collection = %self.collection,
                                subscription = %elig.id,
                                error = %e,
                                "subscriber callback failed, will redeliver"
                            );
                            failed = true;
                            break;
                        }
                    }
                }

                if failed {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue 'poll;
                }
            }

            empty_polls = 0;
        }
    }
}

struct CursorDate(i64);

impl crate::gateway::FromRow for CursorDate {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(row.get(0)?))
    }
}

struct Inner {
    gateway: SqlGateway,
    schema_ready: AsyncMutex<bool>,
    runners: AsyncMutex<HashMap<String, Arc<Runner>>>,
}

/// Maintains the event log and cursor tables, manages subscriptions, and
/// runs one poll loop per collection (spec.md §4.F).
#[derive(Clone)]
pub struct CdcEngine {
    inner: Arc<Inner>,
}

impl CdcEngine {
    pub fn new(gateway: SqlGateway) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                schema_ready: AsyncMutex::new(false),
                runners: AsyncMutex::new(HashMap::new()),
            }),
        }
    }

    async fn ensure_schema(&self) -> Result<(), Error> {
        let mut ready = self.inner.schema_ready.lock().await;
        if *ready {
            return Ok(());
        }
        self.inner
            .gateway
            .run(
                "CREATE TABLE IF NOT EXISTS _events \
                 (col TEXT NOT NULL, id TEXT NOT NULL, type TEXT NOT NULL, \
                  date INTEGER NOT NULL, before TEXT, after TEXT)"
                    .to_string(),
                vec![],
            )
            .await?;
        self.inner
            .gateway
            .run(
                "CREATE INDEX IF NOT EXISTS date_col_type ON _events (date, col, type)".to_string(),
                vec![],
            )
            .await?;
        self.inner
            .gateway
            .run(
                "CREATE TABLE IF NOT EXISTS _cursors \
                 (name VARCHAR(32) PRIMARY KEY NOT NULL, date INTEGER NOT NULL)"
                    .to_string(),
                vec![],
            )
            .await?;
        *ready = true;
        Ok(())
    }

    /// Installs the trigger for `(collection, on)`, mints a subscription
    /// with a fresh cursor set to `now()` (no historical replay, per
    /// spec.md §9's resolution of the ambiguous source behavior), and
    /// attaches it to that collection's runner, starting it if needed.
    pub async fn register(
        &self,
        collection: impl Into<String>,
        on: EventType,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> Result<SubscriptionHandle, Error> {
        let collection = collection.into();
        self.ensure_schema().await?;
        TriggerInstaller::install(&self.inner.gateway, &collection, on).await?;

        let sub_id = new_id();
        let cursor = crate::util::now_millis();
        self.inner
            .gateway
            .run(
                "INSERT INTO _cursors (name, date) VALUES (?, ?)".to_string(),
                vec![SqlValue::Text(sub_id.clone()), SqlValue::Integer(cursor)],
            )
            .await?;

        self.attach(collection.clone(), sub_id.clone(), on, cursor, callback).await;

        Ok(SubscriptionHandle {
            engine: self.clone(),
            collection,
            sub_id,
        })
    }

    /// Re-attaches a previously registered subscription by id, picking up
    /// its cursor from the persisted `_cursors` row rather than starting a
    /// fresh one at `now()`. This is how a subscription survives an engine
    /// restart (spec.md §8 testable property 7): the caller remembers
    /// `sub_id` across the restart and calls `resume` instead of `register`,
    /// so no events between the old cursor and now are skipped. Fails if no
    /// such cursor row exists — callers must `register` first.
    pub async fn resume(
        &self,
        collection: impl Into<String>,
        sub_id: impl Into<String>,
        on: EventType,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> Result<SubscriptionHandle, Error> {
        let collection = collection.into();
        let sub_id = sub_id.into();
        self.ensure_schema().await?;
        TriggerInstaller::install(&self.inner.gateway, &collection, on).await?;

        let cursor = self
            .inner
            .gateway
            .find_one::<CursorDate>(
                "SELECT date FROM _cursors WHERE name = ?".to_string(),
                vec![SqlValue::Text(sub_id.clone())],
            )
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: "_cursors".to_string(),
                id: sub_id.clone(),
            })?
            .0;

        self.attach(collection.clone(), sub_id.clone(), on, cursor, callback).await;

        Ok(SubscriptionHandle {
            engine: self.clone(),
            collection,
            sub_id,
        })
    }

    async fn attach(
        &self,
        collection: String,
        sub_id: String,
        on: EventType,
        cursor: i64,
        callback: Arc<dyn SubscriptionCallback>,
    ) {
        let runner = {
            let mut runners = self.inner.runners.lock().await;
            runners
                .entry(collection.clone())
                .or_insert_with(|| {
                    let runner = Arc::new(Runner::new(collection.clone(), self.inner.gateway.clone()));
                    runner.clone().spawn();
                    runner
                })
                .clone()
        };

        {
            let mut subs = runner.subs.lock().await;
            subs.push(Subscription {
                id: sub_id,
                on,
                cursor,
                callback,
            });
        }
        runner.wake();
    }

    async fn unregister(&self, collection: &str, sub_id: &str) -> Result<(), Error> {
        let runner = {
            let runners = self.inner.runners.lock().await;
            runners.get(collection).cloned()
        };

        if let Some(runner) = runner {
            let mut subs = runner.subs.lock().await;
            subs.retain(|s| s.id != sub_id);
            let empty = subs.is_empty();
            drop(subs);
            if empty {
                runner.stop();
                self.inner.runners.lock().await.remove(collection);
            }
        }

        self.inner
            .gateway
            .run(
                "DELETE FROM _cursors WHERE name = ?".to_string(),
                vec![SqlValue::Text(sub_id.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Stops every runner and clears in-memory subscription state. Table
    /// teardown (`_events`, `_cursors`, and user tables) is the document
    /// store / database's `reset` job; after this, the engine re-initializes
    /// its schema on the next `register`.
    pub async fn stop(&self) {
        let mut runners = self.inner.runners.lock().await;
        for (_, runner) in runners.drain() {
            runner.stop();
        }
        *self.inner.schema_ready.lock().await = false;
    }
}

/// Returned by `register`; dropping this without calling `unsubscribe`
/// leaves the subscription (and its runner) running — unsubscription is
/// explicit, matching spec.md's "destroyed by the unsubscribe handle".
pub struct SubscriptionHandle {
    engine: CdcEngine,
    collection: String,
    sub_id: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.sub_id
    }

    pub async fn unsubscribe(self) -> Result<(), Error> {
        self.engine.unregister(&self.collection, &self.sub_id).await
    }
}

/// Idle-poll backoff: 250ms for the first <=10 empty polls, 1s through 60,
/// 2s thereafter (spec.md §4.F).
fn backoff(empty_polls: u32) -> Duration {
    if empty_polls <= 10 {
        Duration::from_millis(250)
    } else if empty_polls <= 60 {
        Duration::from_millis(1000)
    } else {
        Duration::from_millis(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentStore;
    use docstore_protocol::Document;
    use rusqlite::Connection;
    use serde_json::json;
    use tokio::sync::Mutex as TokioMutex;
    use tokio::time::timeout;

    struct Collector {
        events: Arc<TokioMutex<Vec<EventEnvelope>>>,
    }

    #[async_trait]
    impl SubscriptionCallback for Collector {
        async fn on_event(&self, event: EventEnvelope) -> anyhow::Result<()> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn write_subscription_sees_insert_then_update_as_write_events() {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        let store = DocumentStore::create(gateway.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc = CdcEngine::new(gateway);

        let events = Arc::new(TokioMutex::new(Vec::new()));
        let handle = cdc
            .register(
                "todos",
                EventType::Write,
                Arc::new(Collector { events: events.clone() }),
            )
            .await
            .unwrap();

        store
            .save(Document::from_value(json!({"id": "a", "title": "x"})).unwrap())
            .await
            .unwrap();
        wait_for(|| events.try_lock().map(|e| e.len()).unwrap_or(0) >= 1).await;

        store
            .save(Document::from_value(json!({"id": "a", "title": "y"})).unwrap())
            .await
            .unwrap();
        wait_for(|| events.try_lock().map(|e| e.len()).unwrap_or(0) >= 2).await;

        let collected = events.lock().await;
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|e| e.kind.event_type() == EventType::Write));
        assert_eq!(collected[1].kind.before().unwrap().get("title").unwrap(), "x");
        assert_eq!(collected[1].kind.after().unwrap().get("title").unwrap(), "y");

        handle.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn delete_subscription_sees_before_with_no_after() {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        let store = DocumentStore::create(gateway.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc = CdcEngine::new(gateway);

        let events = Arc::new(TokioMutex::new(Vec::new()));
        let handle = cdc
            .register(
                "todos",
                EventType::Delete,
                Arc::new(Collector { events: events.clone() }),
            )
            .await
            .unwrap();

        store
            .save(Document::from_value(json!({"id": "b"})).unwrap())
            .await
            .unwrap();
        store.delete("b").await.unwrap();
        wait_for(|| events.try_lock().map(|e| e.len()).unwrap_or(0) >= 1).await;

        let collected = events.lock().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].kind.before().unwrap().get("id").unwrap(), "b");
        assert!(collected[0].kind.after().is_none());

        handle.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_removes_cursor_row() {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        let store = DocumentStore::create(gateway.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc = CdcEngine::new(gateway.clone());

        let events = Arc::new(TokioMutex::new(Vec::new()));
        let handle = cdc
            .register(
                "todos",
                EventType::Write,
                Arc::new(Collector { events: events.clone() }),
            )
            .await
            .unwrap();
        let sub_id = handle.id().to_string();
        handle.unsubscribe().await.unwrap();

        store
            .save(Document::from_value(json!({"id": "z"})).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.lock().await.is_empty());

        use crate::gateway::FromRow;
        struct CursorCount(i64);
        impl FromRow for CursorCount {
            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(Self(row.get(0)?))
            }
        }
        let remaining: i64 = gateway
            .get::<CursorCount>(
                "SELECT COUNT(*) FROM _cursors WHERE name = ?".to_string(),
                vec![SqlValue::Text(sub_id)],
            )
            .await
            .unwrap()
            .map(|c| c.0)
            .unwrap_or(0);
        assert_eq!(remaining, 0);
    }

    /// Directly seeds `_events` rows sharing one `date` so the batch is
    /// deterministic, bypassing the triggers (which stamp `unixepoch`).
    async fn seed_event(gateway: &SqlGateway, col: &str, id: &str, row_type: &str, date: i64) {
        gateway
            .run(
                "INSERT INTO _events (col, id, type, date, before, after) VALUES (?, ?, ?, ?, NULL, ?)"
                    .to_string(),
                vec![
                    SqlValue::Text(col.to_string()),
                    SqlValue::Text(id.to_string()),
                    SqlValue::Text(row_type.to_string()),
                    SqlValue::Integer(date),
                    SqlValue::Text(json!({"id": id}).to_string()),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tie_batch_delivers_every_distinct_id_in_id_order() {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        let _store = DocumentStore::create(gateway.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc = CdcEngine::new(gateway.clone());

        let events = Arc::new(TokioMutex::new(Vec::new()));
        let handle = cdc
            .register(
                "todos",
                EventType::Insert,
                Arc::new(Collector { events: events.clone() }),
            )
            .await
            .unwrap();

        // All three share one millisecond, well after the subscription's
        // `now()` cursor, and arrive out of id order — the runner must still
        // deliver all three (spec.md S5), sorted by id.
        let tie_date = crate::util::now_millis() + 60_000;
        seed_event(&gateway, "todos", "c", "insert", tie_date).await;
        seed_event(&gateway, "todos", "a", "insert", tie_date).await;
        seed_event(&gateway, "todos", "b", "insert", tie_date).await;

        wait_for(|| events.try_lock().map(|e| e.len()).unwrap_or(0) >= 3).await;

        let collected = events.lock().await;
        let ids: Vec<&str> = collected.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        handle.unsubscribe().await.unwrap();
    }

    struct FlakyOnce {
        attempts: Arc<std::sync::atomic::AtomicUsize>,
        delivered: Arc<TokioMutex<Vec<EventEnvelope>>>,
    }

    #[async_trait]
    impl SubscriptionCallback for FlakyOnce {
        async fn on_event(&self, event: EventEnvelope) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if attempt == 0 {
                anyhow::bail!("simulated callback failure");
            }
            self.delivered.lock().await.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn callback_failure_redelivers_and_cursor_advances_once() {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        let store = DocumentStore::create(gateway.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc = CdcEngine::new(gateway.clone());

        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let delivered = Arc::new(TokioMutex::new(Vec::new()));
        let handle = cdc
            .register(
                "todos",
                EventType::Write,
                Arc::new(FlakyOnce {
                    attempts: attempts.clone(),
                    delivered: delivered.clone(),
                }),
            )
            .await
            .unwrap();
        let sub_id = handle.id().to_string();

        store
            .save(Document::from_value(json!({"id": "a", "title": "x"})).unwrap())
            .await
            .unwrap();

        // First attempt fails and backs off 10s before retrying; give it
        // room to fail once and succeed on redelivery.
        timeout(Duration::from_secs(15), async {
            while attempts.load(std::sync::atomic::Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("callback was never retried");

        wait_for(|| delivered.try_lock().map(|e| e.len()).unwrap_or(0) >= 1).await;
        assert_eq!(delivered.lock().await.len(), 1);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);

        let cursor: i64 = gateway
            .get::<CursorDate>(
                "SELECT date FROM _cursors WHERE name = ?".to_string(),
                vec![SqlValue::Text(sub_id)],
            )
            .await
            .unwrap()
            .map(|c| c.0)
            .unwrap();
        let event_date: i64 = gateway
            .get::<CursorDate>(
                "SELECT date FROM _events WHERE col = 'todos' AND id = 'a'".to_string(),
                vec![],
            )
            .await
            .unwrap()
            .map(|c| c.0)
            .unwrap();
        assert_eq!(cursor, event_date);

        handle.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn cursor_survives_restart_and_resumes_from_persisted_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdc.sqlite");

        let gateway1 = SqlGateway::new(Connection::open(&path).unwrap());
        let store1 = DocumentStore::create(gateway1.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc1 = CdcEngine::new(gateway1.clone());

        let first_round = Arc::new(TokioMutex::new(Vec::new()));
        let handle1 = cdc1
            .register(
                "todos",
                EventType::Write,
                Arc::new(Collector { events: first_round.clone() }),
            )
            .await
            .unwrap();
        let sub_id = handle1.id().to_string();

        for i in 0..2 {
            store1
                .save(Document::from_value(json!({"id": format!("d{i}")})).unwrap())
                .await
                .unwrap();
        }
        wait_for(|| first_round.try_lock().map(|e| e.len()).unwrap_or(0) >= 2).await;
        cdc1.stop().await;
        // Drop everything that keeps the first connection alive without
        // going through `unsubscribe` — a real restart doesn't get the
        // chance to clean up, and the whole point is that the `_cursors`
        // row survives for `resume` to pick back up.
        drop(handle1);
        drop(cdc1);
        drop(store1);
        drop(gateway1);

        // "Restart": a fresh connection to the same file, a fresh engine,
        // and `resume` reattaching to the cursor row left behind by the
        // first engine instead of `register` minting a new one at `now()`.
        let gateway2 = SqlGateway::new(Connection::open(&path).unwrap());
        let store2 = DocumentStore::create(gateway2.clone(), "todos", vec![], None)
            .await
            .unwrap();
        let cdc2 = CdcEngine::new(gateway2.clone());

        let second_round = Arc::new(TokioMutex::new(Vec::new()));
        let handle2 = cdc2
            .resume(
                "todos",
                sub_id,
                EventType::Write,
                Arc::new(Collector { events: second_round.clone() }),
            )
            .await
            .unwrap();

        for i in 2..5 {
            store2
                .save(Document::from_value(json!({"id": format!("d{i}")})).unwrap())
                .await
                .unwrap();
        }
        wait_for(|| second_round.try_lock().map(|e| e.len()).unwrap_or(0) >= 3).await;

        let second = second_round.lock().await;
        assert_eq!(second.len(), 3);
        let ids: std::collections::HashSet<&str> = second.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            std::collections::HashSet::from(["d2", "d3", "d4"])
        );

        handle2.unsubscribe().await.unwrap();
    }
}
