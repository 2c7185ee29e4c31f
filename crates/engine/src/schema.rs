use docstore_protocol::{Error, IndexSpec};

use crate::gateway::SqlGateway;

/// Translates index specifications into column + index DDL and reconciles
/// the materialized schema with what's declared, on every `create`.
pub struct SchemaManager;

impl SchemaManager {
    /// Idempotent: safe to call on every open/collection access.
    pub async fn ensure_collection(
        gateway: &SqlGateway,
        collection: &str,
        indices: &[IndexSpec],
    ) -> Result<(), Error> {
        gateway
            .run(
                format!(
                    "CREATE TABLE IF NOT EXISTS {collection} \
                     (id VARCHAR(32) PRIMARY KEY, json TEXT NOT NULL, date INTEGER NOT NULL)"
                ),
                vec![],
            )
            .await?;

        let existing = gateway.table_columns(collection).await?;

        let mut required = Vec::new();
        for index in indices {
            for column in index.columns() {
                if !required.contains(&column) {
                    required.push(column);
                }
            }
        }

        for column in &required {
            if !existing.contains(column) {
                // Column type is intentionally absent from the ADD COLUMN
                // statement — index columns are type-dynamic (spec.md §4.B).
                gateway
                    .try_add_column(format!("ALTER TABLE {collection} ADD COLUMN {column}"))
                    .await?;
            }
        }

        for index in indices {
            let unique = if index.is_unique() { "UNIQUE " } else { "" };
            let columns = index.columns().join(", ");
            let name = index.index_name();
            gateway
                .run(
                    format!("CREATE {unique}INDEX IF NOT EXISTS {name} ON {collection} ({columns})"),
                    vec![],
                )
                .await?;
        }

        Ok(())
    }
}
