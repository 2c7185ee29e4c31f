use std::sync::{Arc, Mutex};

use docstore_protocol::Error;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};

/// Maps one result row into a plain record. Implemented for the small set of
/// row shapes the engine's own queries produce (document rows, pragma rows,
/// counts) — there is no generic SQL-to-struct derive here, the query
/// surface is fixed per spec.md §1's Non-goals.
pub trait FromRow: Send + 'static {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>
    where
        Self: Sized;
}

/// Thin async facade over a `rusqlite::Connection`. Every method runs the
/// statement on a blocking-pool thread via `spawn_blocking`: SQLite itself is
/// synchronous, so this is the same "async wrapper over a sync driver"
/// pattern used by e.g. `tokio-rusqlite`, kept lightweight here rather than
/// pulled in as a dependency since the gateway's surface is tiny (run,
/// query, get, find_one, insert, try_add_column, transaction).
#[derive(Clone)]
pub struct SqlGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqlGateway {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sql connection mutex poisoned");
            f(&conn)
        })
        .await
        .expect("sql gateway worker panicked")
    }

    /// Executes one DDL/DML statement, returning the number of rows affected.
    pub async fn run(&self, sql: impl Into<String>, args: Vec<SqlValue>) -> Result<usize, Error> {
        let sql = sql.into();
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(args.iter()))
                .map_err(|e| Error::Sql(e.to_string()))
        })
        .await
    }

    /// Executes a query, materializing every matching row.
    pub async fn query<T: FromRow>(
        &self,
        sql: impl Into<String>,
        args: Vec<SqlValue>,
    ) -> Result<Vec<T>, Error> {
        let sql = sql.into();
        self.with_conn(move |conn| -> Result<Vec<T>, Error> {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::Sql(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), T::from_row)
                .map_err(|e| Error::Sql(e.to_string()))?;
            rows.collect::<rusqlite::Result<Vec<T>>>()
                .map_err(|e| Error::Sql(e.to_string()))
        })
        .await
    }

    /// Exactly one row expected: `Cardinality` if more than one is returned.
    pub async fn get<T: FromRow>(
        &self,
        sql: impl Into<String>,
        args: Vec<SqlValue>,
    ) -> Result<Option<T>, Error> {
        let mut rows = self.query::<T>(sql, args).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.pop().expect("checked len == 1"))),
            got => Err(Error::Cardinality {
                expected: "at most one row",
                got,
            }),
        }
    }

    /// The first row, or none — no cardinality check.
    pub async fn find_one<T: FromRow>(
        &self,
        sql: impl Into<String>,
        args: Vec<SqlValue>,
    ) -> Result<Option<T>, Error> {
        let mut rows = self.query::<T>(sql, args).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    /// For `... RETURNING` statements: returns the first row, if any, and
    /// warns when more than one row came back.
    pub async fn insert<T: FromRow>(
        &self,
        sql: impl Into<String>,
        args: Vec<SqlValue>,
    ) -> Result<Option<T>, Error> {
        let mut rows = self.query::<T>(sql, args).await?;
        if rows.len() > 1 {
            tracing::warn!(count = rows.len(), "insert returned more than one row");
        }
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    /// Idempotent `ALTER TABLE ... ADD COLUMN`: swallows a duplicate-column
    /// error (logged at info) and reports `Ok(false)`; any other engine
    /// error still propagates, matching the teacher's `ensure_column`.
    pub async fn try_add_column(&self, sql: impl Into<String>) -> Result<bool, Error> {
        let sql = sql.into();
        self.with_conn(move |conn| match conn.execute(&sql, []) {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().to_lowercase().contains("duplicate column") => {
                tracing::info!(sql = %sql, "column already present, skipping");
                Ok(false)
            }
            Err(e) => Err(Error::Sql(e.to_string())),
        })
        .await
    }

    /// Runs `body` inside one SQL transaction, committing on success.
    pub async fn transaction<F>(&self, body: F) -> Result<(), Error>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<()> + Send + 'static,
    {
        self.with_conn(move |conn| -> Result<(), Error> {
            // `with_conn` hands us `&Connection`; transactions need a
            // mutable borrow, so reach for `unchecked_transaction` which
            // only requires a shared reference (single-connection model,
            // no concurrent statement execution possible from here).
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::Sql(e.to_string()))?;
            body(&tx).map_err(|e| Error::Sql(e.to_string()))?;
            tx.commit().map_err(|e| Error::Sql(e.to_string()))
        })
        .await
    }

    /// Column names currently present on `table`, via `PRAGMA table_info`.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let rows: Vec<ColumnName> = self
            .query(format!("PRAGMA table_info({table})"), vec![])
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Full `PRAGMA table_info` rows, for `DocumentStore::describe`.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>, Error> {
        self.query(format!("PRAGMA table_info({table})"), vec![])
            .await
    }
}

struct ColumnName(String);

impl FromRow for ColumnName {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(row.get(1)?))
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

impl FromRow for ColumnInfo {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cid: row.get(0)?,
            name: row.get(1)?,
            decl_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            default_value: row.get(4)?,
            primary_key: row.get::<_, i64>(5)? != 0,
        })
    }
}
