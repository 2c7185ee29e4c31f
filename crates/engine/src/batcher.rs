use docstore_protocol::{Document, Error};
use rusqlite::types::Value as SqlValue;

use crate::document::{compose_upsert, DocumentStore};
use crate::gateway::SqlGateway;

/// Accumulates deferred writes and flushes them inside a single SQL
/// transaction (spec.md §4.H). A failure mid-`execute` aborts the
/// transaction and leaves the queue untouched, so the caller can inspect or
/// retry it.
pub struct Batcher {
    gateway: SqlGateway,
    queue: Vec<(String, Vec<SqlValue>)>,
}

impl Batcher {
    pub(crate) fn new(gateway: SqlGateway) -> Self {
        Self {
            gateway,
            queue: Vec::new(),
        }
    }

    /// Queues a deferred write, composed by the same upsert builder `save`
    /// uses, against `store`'s table and declared indices.
    pub fn add(&mut self, store: &DocumentStore, doc: Document) -> Result<(), Error> {
        let (sql, args, _doc, _date) = compose_upsert(store.name(), store.indices(), doc)?;
        self.queue.push((sql, args));
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Opens one transaction and issues every queued statement. The queue is
    /// only cleared once the transaction has actually committed, so a
    /// failure partway through leaves every queued write intact for the
    /// caller to retry (spec.md §4.H / §8 testable property 9).
    pub async fn execute(&mut self) -> Result<usize, Error> {
        if self.queue.is_empty() {
            return Ok(0);
        }
        let count = self.queue.len();
        let queued = self.queue.clone();
        self.gateway
            .transaction(move |tx| {
                for (sql, args) in &queued {
                    tx.execute(sql, rusqlite::params_from_iter(args.iter()))?;
                }
                Ok(())
            })
            .await?;
        self.queue.clear();
        Ok(count)
    }

    /// Repeatedly invokes `step`, which may call `add` any number of times,
    /// flushing whenever the queue reaches `batch_size`. A final flush runs
    /// after the iterator is exhausted. Returns the total committed count.
    pub async fn execute_batch<I, F>(
        &mut self,
        items: I,
        mut step: F,
        batch_size: usize,
    ) -> Result<usize, Error>
    where
        I: IntoIterator,
        F: FnMut(&mut Batcher, I::Item) -> Result<(), Error>,
    {
        let mut total = 0;
        for item in items {
            step(self, item)?;
            if self.queue.len() >= batch_size {
                total += self.execute().await?;
            }
        }
        total += self.execute().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    async fn temp_store() -> DocumentStore {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        DocumentStore::create(gateway, "todos", vec![], None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn execute_commits_all_queued_writes() {
        let store = temp_store().await;
        let mut batcher = store.transaction();
        for i in 0..5 {
            batcher
                .add(
                    &store,
                    Document::from_value(json!({"id": format!("d{i}"), "n": i})).unwrap(),
                )
                .unwrap();
        }
        let committed = batcher.execute().await.unwrap();
        assert_eq!(committed, 5);
        assert_eq!(store.count().await.unwrap(), 5);
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test]
    async fn execute_batch_flushes_on_threshold_and_at_the_end() {
        let store = temp_store().await;
        let mut batcher = store.transaction();
        let total = batcher
            .execute_batch(
                0..7,
                |b, i| {
                    b.add(&store, Document::from_value(json!({"id": format!("d{i}")})).unwrap())
                },
                3,
            )
            .await
            .unwrap();
        assert_eq!(total, 7);
        assert_eq!(store.count().await.unwrap(), 7);
    }
}
