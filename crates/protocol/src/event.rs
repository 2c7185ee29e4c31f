use crate::Document;

/// The four event shapes a trigger can append to the log, and a subscription
/// can be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Insert,
    Update,
    Write,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A dispatched event, shaped to the subscription's requested type rather
/// than to the raw trigger row: a `write` subscriber always sees `Write`,
/// even though the row it was sourced from is tagged `insert` or `update` in
/// `_events`. Per-variant field constraints replace an all-optional struct.
#[derive(Debug, Clone)]
pub enum EventKind {
    Insert { after: Document },
    Update { before: Document, after: Document },
    Write { before: Option<Document>, after: Document },
    Delete { before: Document },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Insert { .. } => EventType::Insert,
            Self::Update { .. } => EventType::Update,
            Self::Write { .. } => EventType::Write,
            Self::Delete { .. } => EventType::Delete,
        }
    }

    pub fn before(&self) -> Option<&Document> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { before, .. } => Some(before),
            Self::Write { before, .. } => before.as_ref(),
            Self::Delete { before } => Some(before),
        }
    }

    pub fn after(&self) -> Option<&Document> {
        match self {
            Self::Insert { after } => Some(after),
            Self::Update { after, .. } => Some(after),
            Self::Write { after, .. } => Some(after),
            Self::Delete { .. } => None,
        }
    }
}

/// A fully inflated event ready for dispatch to a subscriber callback.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub collection: String,
    pub id: String,
    pub date: i64,
    pub kind: EventKind,
}

/// The raw, un-inflated shape of a row in `_events`: `before`/`after` are
/// still serialized JSON (or absent), as stored.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub collection: String,
    pub id: String,
    pub row_type: EventType,
    pub date: i64,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// A per-subscription durable high-water mark.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub name: String,
    pub date: i64,
}
