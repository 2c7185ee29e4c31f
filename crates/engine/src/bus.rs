use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use docstore_protocol::{Document, EventType};

/// An event emitted synchronously from `save`/`delete`, with no persistence
/// and no replay — the non-durable fast path alongside the CDC engine.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub collection: String,
    pub id: String,
    pub event_type: EventType,
    pub date: i64,
    pub data: Option<Document>,
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// In-process synchronous fan-out keyed by `collection.type` and
/// `collection.id.type`.
#[derive(Clone, Default)]
pub struct LightEventBus {
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl LightEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_collection(
        &self,
        collection: &str,
        event_type: EventType,
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) {
        let key = format!("{collection}.{}", event_type.as_str());
        self.handlers
            .lock()
            .expect("event bus mutex poisoned")
            .entry(key)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        event_type: EventType,
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) {
        let key = format!("{collection}.{id}.{}", event_type.as_str());
        self.handlers
            .lock()
            .expect("event bus mutex poisoned")
            .entry(key)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn publish(&self, event: BusEvent) {
        let by_collection = format!("{}.{}", event.collection, event.event_type.as_str());
        let by_document = format!(
            "{}.{}.{}",
            event.collection,
            event.id,
            event.event_type.as_str()
        );
        let handlers = self.handlers.lock().expect("event bus mutex poisoned");
        for key in [&by_collection, &by_document] {
            if let Some(hs) = handlers.get(key) {
                for h in hs {
                    h(&event);
                }
            }
        }
    }
}
