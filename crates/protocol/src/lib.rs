mod document;
mod error;
mod event;
mod index;
mod query;

pub use document::Document;
pub use error::{Error, Result};
pub use event::{Cursor, EventEnvelope, EventKind, EventType, RawEvent};
pub use index::{column_to_path, path_to_column, IndexField, IndexSpec, IndexType};
pub use query::{Condition, Operator, Query};
