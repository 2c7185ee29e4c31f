use docstore_protocol::{Error, EventType};

use crate::gateway::SqlGateway;

/// Installs per-collection, per-event-type SQL triggers that append rows to
/// the `_events` log. Each trigger is named `${collection}_${on}`, except
/// `write`, which installs two independently-named triggers
/// (`${collection}_write_insert` / `${collection}_write_update`) that each
/// write rows tagged `type = 'write'` directly — distinct from the plain
/// `insert`/`update` triggers, satisfying spec.md's invariant that at most
/// one trigger exists per `(collection, subscribed-type)` pair.
pub struct TriggerInstaller;

impl TriggerInstaller {
    pub async fn install(
        gateway: &SqlGateway,
        collection: &str,
        on: EventType,
    ) -> Result<(), Error> {
        match on {
            EventType::Insert => Self::install_row_trigger(gateway, collection, "insert").await,
            EventType::Update => Self::install_row_trigger(gateway, collection, "update").await,
            EventType::Delete => Self::install_delete(gateway, collection).await,
            EventType::Write => {
                Self::install_write_insert(gateway, collection).await?;
                Self::install_write_update(gateway, collection).await
            }
        }
    }

    async fn install_row_trigger(
        gateway: &SqlGateway,
        collection: &str,
        on: &str,
    ) -> Result<(), Error> {
        let name = format!("{collection}_{on}");
        let sql = match on {
            "insert" => format!(
                "CREATE TRIGGER IF NOT EXISTS {name} AFTER INSERT ON {collection} BEGIN \
                 INSERT INTO _events (col, id, type, date, before, after) \
                 VALUES ('{collection}', new.id, 'insert', unixepoch('subsec')*1000, NULL, new.json); \
                 END"
            ),
            "update" => format!(
                "CREATE TRIGGER IF NOT EXISTS {name} AFTER UPDATE ON {collection} BEGIN \
                 INSERT INTO _events (col, id, type, date, before, after) \
                 VALUES ('{collection}', old.id, 'update', unixepoch('subsec')*1000, old.json, new.json); \
                 END"
            ),
            other => unreachable!("install_row_trigger called with {other}"),
        };
        gateway.run(sql, vec![]).await?;
        Ok(())
    }

    async fn install_delete(gateway: &SqlGateway, collection: &str) -> Result<(), Error> {
        let name = format!("{collection}_delete");
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {name} AFTER DELETE ON {collection} BEGIN \
             INSERT INTO _events (col, id, type, date, before, after) \
             VALUES ('{collection}', old.id, 'delete', unixepoch('subsec')*1000, old.json, NULL); \
             END"
        );
        gateway.run(sql, vec![]).await?;
        Ok(())
    }

    async fn install_write_insert(gateway: &SqlGateway, collection: &str) -> Result<(), Error> {
        let name = format!("{collection}_write_insert");
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {name} AFTER INSERT ON {collection} BEGIN \
             INSERT INTO _events (col, id, type, date, before, after) \
             VALUES ('{collection}', new.id, 'write', unixepoch('subsec')*1000, NULL, new.json); \
             END"
        );
        gateway.run(sql, vec![]).await?;
        Ok(())
    }

    async fn install_write_update(gateway: &SqlGateway, collection: &str) -> Result<(), Error> {
        let name = format!("{collection}_write_update");
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {name} AFTER UPDATE ON {collection} BEGIN \
             INSERT INTO _events (col, id, type, date, before, after) \
             VALUES ('{collection}', old.id, 'write', unixepoch('subsec')*1000, old.json, new.json); \
             END"
        );
        gateway.run(sql, vec![]).await?;
        Ok(())
    }
}
