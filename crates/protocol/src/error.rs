use thiserror::Error;

/// Errors surfaced across the public document-store/CDC boundary.
///
/// `DuplicateColumn` and `CallbackError` from the design's error taxonomy are
/// intentionally absent here: the former never escapes
/// `SqlGateway::try_add_column` (it is swallowed and logged at info), and the
/// latter never escapes the CDC runner (it is logged and retried).
#[derive(Debug, Error)]
pub enum Error {
    #[error("sql error: {0}")]
    Sql(String),

    #[error("expected {expected}, got {got} rows")]
    Cardinality { expected: &'static str, got: usize },

    #[error("document {id:?} not found in collection {collection:?}")]
    NotFound { collection: String, id: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
