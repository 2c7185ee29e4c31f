use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use docstore_protocol::{Error, IndexSpec};
use rusqlite::Connection;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

use crate::bus::LightEventBus;
use crate::cdc::CdcEngine;
use crate::document::DocumentStore;
use crate::gateway::SqlGateway;

/// The `{name, version, description, size}` open parameters spec.md §6
/// names, built the way the teacher's `Engine::new` takes its path: a plain
/// constructor plus a small set of `with_*` builder methods, not a
/// persisted config file.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    name: String,
    version: u32,
    description: String,
    size: i64,
    path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            description: String::new(),
            size: -1,
            path: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Overrides the on-disk location; defaults to `<name>.sqlite` under the
    /// current directory when unset.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.sqlite", self.name)))
    }
}

struct Inner {
    config: DatabaseConfig,
    gateway: SqlGateway,
    cdc: CdcEngine,
    bus: LightEventBus,
    collections: AsyncMutex<HashMap<String, Arc<DocumentStore>>>,
}

/// One open database: a gateway, its CDC engine, its light event bus, and
/// the document stores it has handed out. Cheap to clone — everything lives
/// behind the shared `Arc<Inner>`.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

type Registry = StdMutex<HashMap<String, Arc<OnceCell<Result<Database, String>>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: std::sync::OnceLock<Registry> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

impl Database {
    /// Process-wide memoized open: concurrent `connect` calls for the same
    /// `name` share one initialization rather than racing to open the file
    /// twice (spec.md §6/§9).
    pub async fn connect(config: DatabaseConfig) -> Result<Database, Error> {
        let name = config.name().to_string();
        let cell = {
            let mut map = registry().lock().expect("database registry mutex poisoned");
            map.entry(name).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let result = cell
            .get_or_init(|| async move { Self::open(config).await.map_err(|e| e.to_string()) })
            .await;

        result.clone().map_err(Error::Sql)
    }

    async fn open(config: DatabaseConfig) -> Result<Database, Error> {
        let path = config.resolved_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Sql(format!("failed to create {}: {e}", parent.display())))?;
            }
        }

        let conn = Self::open_connection(&path)?;
        let gateway = SqlGateway::new(conn);
        let cdc = CdcEngine::new(gateway.clone());
        let bus = LightEventBus::new();

        Ok(Database {
            inner: Arc::new(Inner {
                config,
                gateway,
                cdc,
                bus,
                collections: AsyncMutex::new(HashMap::new()),
            }),
        })
    }

    fn open_connection(path: &Path) -> Result<Connection, Error> {
        let conn = Connection::open(path).map_err(|e| Error::Sql(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Sql(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| Error::Sql(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| Error::Sql(e.to_string()))?;
        Ok(conn)
    }

    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    pub fn version(&self) -> u32 {
        self.inner.config.version()
    }

    pub fn description(&self) -> &str {
        self.inner.config.description()
    }

    pub fn cdc(&self) -> &CdcEngine {
        &self.inner.cdc
    }

    pub fn bus(&self) -> &LightEventBus {
        &self.inner.bus
    }

    /// Returns the named collection, declaring its schema on first access
    /// and memoizing the `DocumentStore` thereafter (spec.md §4.D).
    pub async fn collection(
        &self,
        name: impl Into<String>,
        indices: Vec<IndexSpec>,
    ) -> Result<Arc<DocumentStore>, Error> {
        let name = name.into();
        let mut collections = self.inner.collections.lock().await;
        if let Some(store) = collections.get(&name) {
            return Ok(store.clone());
        }
        let store = Arc::new(
            DocumentStore::create(self.inner.gateway.clone(), name.clone(), indices, Some(self.inner.bus.clone()))
                .await?,
        );
        collections.insert(name, store.clone());
        Ok(store)
    }

    /// Drops every user table plus `_events`/`_cursors`, stops all CDC
    /// runners, and clears the in-memory collection cache (spec.md §8
    /// testable property 8). Declared schemas are re-created lazily on the
    /// next `collection` call, as though freshly opened.
    pub async fn reset(&self) -> Result<(), Error> {
        self.inner.cdc.stop().await;

        let tables: Vec<String> = {
            struct TableName(String);
            impl crate::gateway::FromRow for TableName {
                fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                    Ok(Self(row.get(0)?))
                }
            }
            self.inner
                .gateway
                .query::<TableName>(
                    "SELECT name FROM sqlite_master WHERE type = 'table' \
                     AND name NOT LIKE 'sqlite_%'"
                        .to_string(),
                    vec![],
                )
                .await?
                .into_iter()
                .map(|t| t.0)
                .collect()
        };

        for table in tables {
            self.inner
                .gateway
                .run(format!("DROP TABLE IF EXISTS {table}"), vec![])
                .await?;
        }

        self.inner.collections.lock().await.clear();
        Ok(())
    }

    #[cfg(test)]
    pub async fn reset_registry() {
        registry().lock().expect("database registry mutex poisoned").clear();
    }
}
