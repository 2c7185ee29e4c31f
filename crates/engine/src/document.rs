use std::collections::HashSet;

use docstore_protocol::{path_to_column, Document, Error, IndexSpec, Query};
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value as Json;

use crate::bus::{BusEvent, LightEventBus};
use crate::gateway::{ColumnInfo, FromRow, SqlGateway};
use crate::schema::SchemaManager;
use crate::translator::Translator;
use crate::util::{json_to_sql, new_id, now_millis};
use crate::Batcher;
use docstore_protocol::EventType;

struct DocRow {
    id: String,
    json: String,
    date: i64,
}

impl FromRow for DocRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            json: row.get(1)?,
            date: row.get(2)?,
        })
    }
}

fn inflate(row: DocRow) -> Result<Document, Error> {
    let mut doc = Document::from_json_str(&row.json)?;
    doc.set_saved(row.date);
    Ok(doc)
}

struct CountRow(i64);
impl FromRow for CountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(row.get(0)?))
    }
}

struct DateRow(i64);
impl FromRow for DateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(row.get(0)?))
    }
}

/// Composes the `INSERT ... ON CONFLICT DO UPDATE` statement `save` and the
/// transaction batcher both need. `json` always embeds `id` (spec.md §4.D),
/// and `date` is the write time, not pulled from the document.
pub(crate) fn compose_upsert(
    table: &str,
    indices: &[IndexSpec],
    mut doc: Document,
) -> Result<(String, Vec<SqlValue>, Document, i64), Error> {
    let id = doc.id().map(str::to_string).unwrap_or_else(new_id);
    doc.set_id(id.clone());
    let date = now_millis();
    let json = doc.to_json_string()?;

    let mut columns = vec!["id".to_string(), "json".to_string(), "date".to_string()];
    let mut insert_args = vec![
        SqlValue::Text(id.clone()),
        SqlValue::Text(json.clone()),
        SqlValue::Integer(date),
    ];
    let mut assignments = vec!["json = ?".to_string(), "date = ?".to_string()];
    let mut update_args = vec![SqlValue::Text(json), SqlValue::Integer(date)];

    let mut seen = HashSet::new();
    for index in indices {
        for (path, _) in index.fields() {
            let column = path_to_column(path);
            if !seen.insert(column.clone()) {
                continue;
            }
            let value = doc.get_path(path).cloned().unwrap_or(Json::Null);
            let sql_value = json_to_sql(&value);
            columns.push(column.clone());
            insert_args.push(sql_value.clone());
            assignments.push(format!("{column} = ?"));
            update_args.push(sql_value);
        }
    }

    insert_args.extend(update_args);

    let sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {assignments}",
        cols = columns.join(", "),
        placeholders = vec!["?"; columns.len()].join(", "),
        assignments = assignments.join(", "),
    );

    Ok((sql, insert_args, doc, date))
}

/// A collection of documents backed by one SQL table, composing the gateway,
/// schema manager, and query translator (spec.md §4.D).
pub struct DocumentStore {
    name: String,
    gateway: SqlGateway,
    indices: Vec<IndexSpec>,
    bus: Option<LightEventBus>,
}

impl DocumentStore {
    pub(crate) async fn create(
        gateway: SqlGateway,
        name: impl Into<String>,
        indices: Vec<IndexSpec>,
        bus: Option<LightEventBus>,
    ) -> Result<Self, Error> {
        let name = name.into();
        SchemaManager::ensure_collection(&gateway, &name, &indices).await?;
        Ok(Self {
            name,
            gateway,
            indices,
            bus,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn indices(&self) -> &[IndexSpec] {
        &self.indices
    }

    pub(crate) fn gateway(&self) -> &SqlGateway {
        &self.gateway
    }

    /// Upsert by primary key. Generates an id when absent.
    pub async fn save(&self, doc: Document) -> Result<Document, Error> {
        let (sql, args, mut doc, date) = compose_upsert(&self.name, &self.indices, doc)?;
        self.gateway.run(sql, args).await?;
        doc.set_saved(date);
        self.publish(EventType::Write, &doc, date);
        Ok(doc)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, Error> {
        let row: Option<DocRow> = self
            .gateway
            .get(
                format!("SELECT id, json, date FROM {} WHERE id = ?", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;
        row.map(inflate).transpose()
    }

    pub async fn all(&self) -> Result<Vec<Document>, Error> {
        let rows: Vec<DocRow> = self
            .gateway
            .query(format!("SELECT id, json, date FROM {}", self.name), vec![])
            .await?;
        rows.into_iter().map(inflate).collect()
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<Document>, Error> {
        let (sql, args) = Translator::translate(&self.name, query, false);
        let rows: Vec<DocRow> = self.gateway.query(sql, args).await?;
        rows.into_iter().map(inflate).collect()
    }

    /// Finds the first matching document. Matching on more than one row is
    /// treated as accumulated duplicate state: everything past the first is
    /// deleted and a warning is logged (spec.md §4.D). This needs the full
    /// match set rather than a `LIMIT 1` query, since the dedup decision
    /// depends on knowing whether more than one row exists.
    pub async fn find_one(&self, query: &Query) -> Result<Option<Document>, Error> {
        let (sql, args) = Translator::translate(&self.name, query, false);
        let mut rows: Vec<DocRow> = self.gateway.query(sql, args).await?;

        if rows.len() > 1 {
            tracing::warn!(
                collection = %self.name,
                matched = rows.len(),
                "find_one matched duplicate rows, deleting extras"
            );
            let extras: Vec<String> = rows[1..].iter().map(|r| r.id.clone()).collect();
            for id in extras {
                self.delete(&id).await?;
            }
            rows.truncate(1);
        }

        rows.into_iter().next().map(inflate).transpose()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, Error> {
        let before = self.get(id).await?;
        let n = self
            .gateway
            .run(
                format!("DELETE FROM {} WHERE id = ?", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;
        if n > 0 {
            if let Some(before) = before {
                self.publish(EventType::Delete, &before, now_millis());
            }
        }
        Ok(n > 0)
    }

    /// Equality-only per spec.md §4.D: deletes the first row matching `query`.
    pub async fn delete_one(&self, query: &Query) -> Result<bool, Error> {
        match self.find_one(query).await? {
            Some(doc) => {
                let id = doc.id().expect("saved documents always carry an id").to_string();
                self.delete(&id).await
            }
            None => Ok(false),
        }
    }

    pub async fn wipe(&self) -> Result<(), Error> {
        self.gateway
            .run(format!("DELETE FROM {}", self.name), vec![])
            .await?;
        Ok(())
    }

    pub async fn drop_collection(&self) -> Result<(), Error> {
        self.gateway
            .run(format!("DROP TABLE IF EXISTS {}", self.name), vec![])
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, Error> {
        let row: Option<CountRow> = self
            .gateway
            .get(format!("SELECT COUNT(*) FROM {}", self.name), vec![])
            .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }

    pub async fn describe(&self) -> Result<Vec<ColumnInfo>, Error> {
        self.gateway.describe_table(&self.name).await
    }

    /// Read-modify-write. `NotFound` if `id` does not exist.
    pub async fn update(
        &self,
        id: &str,
        patch: impl FnOnce(&mut Document),
    ) -> Result<Document, Error> {
        let mut doc = self.get(id).await?.ok_or_else(|| Error::NotFound {
            collection: self.name.clone(),
            id: id.to_string(),
        })?;
        patch(&mut doc);
        self.save(doc).await
    }

    pub async fn date_saved(&self, id: &str) -> Result<Option<i64>, Error> {
        let row: Option<DateRow> = self
            .gateway
            .find_one(
                format!("SELECT date FROM {} WHERE id = ?", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;
        Ok(row.map(|r| r.0))
    }

    pub fn transaction(&self) -> Batcher {
        Batcher::new(self.gateway.clone())
    }

    fn publish(&self, event_type: EventType, doc: &Document, date: i64) {
        if let Some(bus) = &self.bus {
            bus.publish(BusEvent {
                collection: self.name.clone(),
                id: doc.id().unwrap_or_default().to_string(),
                event_type,
                date,
                data: Some(doc.clone()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_protocol::{IndexType, Operator};
    use rusqlite::Connection;
    use serde_json::json;

    async fn temp_store(indices: Vec<IndexSpec>) -> DocumentStore {
        let gateway = SqlGateway::new(Connection::open_in_memory().unwrap());
        DocumentStore::create(gateway, "todos", indices, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn save_then_get_round_trips_with_saved_timestamp() {
        let store = temp_store(vec![]).await;
        let doc = Document::from_value(json!({"id": "a", "title": "x", "done": false})).unwrap();
        let saved = store.save(doc).await.unwrap();
        assert!(saved.saved().is_some());

        let fetched = store.get("a").await.unwrap().unwrap();
        assert_eq!(fetched.get("title").unwrap(), "x");
        assert_eq!(fetched.saved(), saved.saved());
    }

    #[tokio::test]
    async fn find_filters_by_index_column() {
        let store = temp_store(vec![IndexSpec::single_typed("done", IndexType::Boolean)]).await;
        store
            .save(Document::from_value(json!({"id": "a", "title": "x", "done": false})).unwrap())
            .await
            .unwrap();

        let query = Query::new().field("done", false);
        let found = store.find(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().unwrap(), "a");

        let none = store.find(&Query::new().field("done", true)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn compound_index_query_resolves_nested_and_typed_fields() {
        let store = temp_store(vec![IndexSpec::compound(vec![
            docstore_protocol::IndexField::new("user.id", IndexType::V32),
            docstore_protocol::IndexField::new("priority", IndexType::Int),
        ])])
        .await;
        store
            .save(
                Document::from_value(json!({
                    "id": "t1", "user": {"id": "u1"}, "priority": 2
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let query = Query::new()
            .field("user__id", "u1")
            .op("priority", Operator::Gt, 1);
        let found = store.find(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().unwrap(), "t1");
    }

    #[tokio::test]
    async fn find_one_deletes_duplicate_matches() {
        let store = temp_store(vec![IndexSpec::single_typed("tag", IndexType::Text)]).await;
        store
            .save(Document::from_value(json!({"id": "a", "tag": "x"})).unwrap())
            .await
            .unwrap();
        store
            .save(Document::from_value(json!({"id": "b", "tag": "x"})).unwrap())
            .await
            .unwrap();

        let found = store
            .find_one(&Query::new().field("tag", "x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id().unwrap(), "a");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_fails_on_missing_id() {
        let store = temp_store(vec![]).await;
        let err = store.update("missing", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
