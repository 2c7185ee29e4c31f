pub mod batcher;
pub mod bus;
pub mod cdc;
pub mod database;
pub mod document;
pub mod events;
pub mod gateway;
pub mod schema;
pub mod translator;
pub mod triggers;
pub mod util;

pub use batcher::Batcher;
pub use bus::{BusEvent, LightEventBus};
pub use cdc::{CdcEngine, FnCallback, SubscriptionCallback, SubscriptionHandle};
pub use database::{Database, DatabaseConfig};
pub use document::DocumentStore;
pub use gateway::{ColumnInfo, SqlGateway};
pub use schema::SchemaManager;
pub use translator::Translator;
pub use triggers::TriggerInstaller;

pub use docstore_protocol::*;
