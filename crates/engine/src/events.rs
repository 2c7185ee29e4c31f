use std::collections::HashMap;

use docstore_protocol::{Document, Error, EventKind, EventType};
use rusqlite::Row;

use crate::gateway::FromRow;

/// The raw shape of an `_events` row, before it's matched against a
/// subscription and inflated into an `EventKind`.
#[derive(Debug, Clone)]
pub struct RawEventRow {
    pub id: String,
    pub row_type: String,
    pub date: i64,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl FromRow for RawEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        // Column order fixed by the runner's queries: col, id, type, date, before, after.
        Ok(Self {
            id: row.get(1)?,
            row_type: row.get(2)?,
            date: row.get(3)?,
            before: row.get(4)?,
            after: row.get(5)?,
        })
    }
}

/// Deduplicates a same-`date` batch by id, last-writer-wins, then sorts the
/// survivors by id so delivery order is deterministic (spec.md S5).
pub fn dedup_by_id(rows: Vec<RawEventRow>) -> Vec<RawEventRow> {
    let mut by_id: HashMap<String, RawEventRow> = HashMap::with_capacity(rows.len());
    for row in rows {
        by_id.insert(row.id.clone(), row);
    }
    let mut out: Vec<RawEventRow> = by_id.into_values().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Spec.md §4.F's delivery predicate: deliver when the subscription's type
/// matches the row's stored type exactly, or when the subscription wants
/// `write` and the row is one of insert/update/write.
pub fn subscription_matches(sub_on: EventType, row_type: EventType) -> bool {
    sub_on == row_type
        || (sub_on == EventType::Write
            && matches!(row_type, EventType::Insert | EventType::Update | EventType::Write))
}

/// Builds the `EventKind` a subscriber of type `sub_on` should see from a raw
/// row. Shaped to the subscription, not to the row: a `write` subscriber
/// sees `Write { before, after }` even when the underlying row happens to be
/// an `insert`-shaped one (`before = NULL`).
pub fn build_kind(sub_on: EventType, raw: &RawEventRow) -> Result<EventKind, Error> {
    let after = raw.after.as_deref().map(Document::from_json_str).transpose()?;
    let before = raw.before.as_deref().map(Document::from_json_str).transpose()?;

    let missing = |field: &'static str| {
        Error::Sql(format!(
            "corrupt _events row for id {:?}: missing {field}",
            raw.id
        ))
    };

    Ok(match sub_on {
        EventType::Insert => EventKind::Insert {
            after: after.ok_or_else(|| missing("after"))?,
        },
        EventType::Update => EventKind::Update {
            before: before.ok_or_else(|| missing("before"))?,
            after: after.ok_or_else(|| missing("after"))?,
        },
        EventType::Write => EventKind::Write {
            before,
            after: after.ok_or_else(|| missing("after"))?,
        },
        EventType::Delete => EventKind::Delete {
            before: before.ok_or_else(|| missing("before"))?,
        },
    })
}
