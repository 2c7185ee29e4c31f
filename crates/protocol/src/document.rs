use serde_json::{Map, Value};

use crate::error::Error;

/// A JSON-serializable record keyed by a string `id`.
///
/// Backed by a `serde_json::Map` rather than a fixed struct: collections are
/// schemaless beyond `id`/`json`/`date`, so callers shape their own document
/// fields and the store only ever needs to read `id`, splice `saved`, and
/// project index paths out of the rest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        use serde::de::Error as _;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Json(serde_json::Error::custom(format!(
                "expected a JSON object, got {other}"
            )))),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert("id".to_string(), Value::String(id.into()));
    }

    pub fn saved(&self) -> Option<i64> {
        self.0.get("saved").and_then(Value::as_i64)
    }

    pub fn set_saved(&mut self, millis: i64) {
        self.0.insert("saved".to_string(), Value::from(millis));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Resolves a dotted path (`"owner.id"`) against nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut cur = self.0.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_object()?.get(part)?;
        }
        Some(cur)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_dotted_paths() {
        let doc = Document::from_value(json!({
            "id": "a",
            "owner": { "id": "u1", "team": { "name": "x" } }
        }))
        .unwrap();
        assert_eq!(doc.get_path("owner.id").unwrap(), "u1");
        assert_eq!(doc.get_path("owner.team.name").unwrap(), "x");
        assert!(doc.get_path("owner.missing").is_none());
        assert!(doc.get_path("nope").is_none());
    }

    #[test]
    fn splices_saved_without_disturbing_other_fields() {
        let mut doc = Document::from_value(json!({"id": "a", "title": "x"})).unwrap();
        doc.set_saved(1234);
        assert_eq!(doc.saved(), Some(1234));
        assert_eq!(doc.get("title").unwrap(), "x");
    }
}
