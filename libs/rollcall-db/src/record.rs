use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use rollcall_security::fields;

/// A row as exchanged with the data backend: a JSON object keyed by column.
///
/// UUID columns are stored as their hyphenated string form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; `None` unless it is an object.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.0.get(field).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn get_uuid(&self, field: &str) -> Option<Uuid> {
        self.get_str(field).and_then(|s| Uuid::parse_str(s).ok())
    }

    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.get_uuid(fields::ID)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_owned(), value.into());
    }

    pub fn set_uuid(&mut self, field: &str, value: Uuid) {
        self.set(field, value.to_string());
    }

    /// Builder-style [`Self::set`].
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    #[must_use]
    pub fn with_uuid(mut self, field: &str, value: Uuid) -> Self {
        self.set_uuid(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Overwrite this record's fields with those present in `patch`.
    pub fn merge(&mut self, patch: &Record) {
        for (k, v) in &patch.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_json()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_accessors() {
        let id = Uuid::new_v4();
        let rec = Record::new()
            .with_uuid("id", id)
            .with("max_capacity", 12)
            .with("title", "CPR basics")
            .with("archived", false);

        assert_eq!(rec.id(), Some(id));
        assert_eq!(rec.get_i64("max_capacity"), Some(12));
        assert_eq!(rec.get_str("title"), Some("CPR basics"));
        assert_eq!(rec.get_bool("archived"), Some(false));
        assert_eq!(rec.get_uuid("title"), None);
        assert_eq!(rec.get_i64("missing"), None);
    }

    #[test]
    fn from_json_requires_object() {
        assert!(Record::from_json(json!({"a": 1})).is_some());
        assert!(Record::from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn merge_overwrites_present_fields_only() {
        let mut rec = Record::new().with("a", 1).with("b", 2);
        rec.merge(&Record::new().with("b", 3).with("c", 4));
        assert_eq!(rec.into_json(), json!({"a": 1, "b": 3, "c": 4}));
    }
}
