//! Documents stored by a [`DocumentStore`](crate::DocumentStore).

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use polystore_common::{Error, Result};

use crate::core::{Record, Value};

/// Field stamped once, on the first save.
pub const CREATED_AT: &str = "createdAt";
/// Field stamped on every save.
pub const UPDATED_AT: &str = "updatedAt";

/// A schema-flexible payload paired with an id and a collection name.
///
/// The id is assigned by the driver on the first save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Option<String>,
    pub collection: Option<String>,
    pub payload: Record,
}

impl Document {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            id: None,
            collection: Some(collection.into()),
            payload: Record::new(),
        }
    }

    pub fn with_payload(collection: impl Into<String>, payload: Record) -> Self {
        Self {
            payload,
            ..Self::new(collection)
        }
    }

    /// Build a document from any serializable object.
    ///
    /// The object must serialize to a map.
    pub fn from_serializable<T: Serialize>(collection: impl Into<String>, object: &T) -> Result<Self> {
        match Value::from(serde_json::to_value(object)?) {
            Value::Object(payload) => Ok(Self::with_payload(collection, payload)),
            other => Err(Error::Serialization(format!(
                "expected an object to serialize into a map, got {}",
                other.type_name()
            ))),
        }
    }

    /// Deserialize the payload into an application type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let json = serde_json::Value::from(Value::Object(self.payload.clone()));
        Ok(serde_json::from_value(json)?)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(field.into(), value.into());
    }

    /// Timestamp stored in `field`, in any of the shapes backends return.
    #[must_use]
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(value_as_datetime)
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp(CREATED_AT)
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp(UPDATED_AT)
    }
}

/// Read a timestamp from an RFC 3339 string, epoch milliseconds, or an
/// extended JSON `{"$date": ...}` wrapper.
#[must_use]
pub fn value_as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Integer(millis) => Utc.timestamp_millis_opt(*millis).single(),
        Value::Object(map) => {
            let inner = map.get("$date").or_else(|| map.get("$numberLong"))?;
            match inner {
                Value::String(s) if map.contains_key("$numberLong") => {
                    s.parse().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                }
                other => value_as_datetime(other),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Car {
        model: String,
        brand: String,
        price: i64,
    }

    #[test]
    fn test_from_serializable() {
        let car = Car {
            model: "Hilux".into(),
            brand: "Toyota".into(),
            price: 120_000,
        };
        let doc = Document::from_serializable("cars", &car).unwrap();
        assert_eq!(doc.collection.as_deref(), Some("cars"));
        assert!(doc.id.is_none());
        assert_eq!(doc.get("price"), Some(&Value::Integer(120_000)));

        let back: Car = doc.deserialize().unwrap();
        assert_eq!(back, car);
    }

    #[test]
    fn test_from_serializable_requires_map() {
        assert!(Document::from_serializable("cars", &vec![1, 2]).is_err());
    }

    #[test]
    fn test_timestamp_shapes() {
        let mut doc = Document::new("x");
        doc.set("a", "2024-05-01T10:00:00Z");
        doc.set("b", 1_714_557_600_000_i64);
        let mut wrapped = HashMap::new();
        wrapped.insert("$date".to_string(), Value::from("2024-05-01T10:00:00.000Z"));
        doc.set("c", Value::Object(wrapped));
        let mut nested = HashMap::new();
        nested.insert("$numberLong".to_string(), Value::from("1714557600000"));
        let mut outer = HashMap::new();
        outer.insert("$date".to_string(), Value::Object(nested));
        doc.set("d", Value::Object(outer));

        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for field in ["a", "b", "c", "d"] {
            assert_eq!(doc.timestamp(field), Some(expected), "field {field}");
        }
        assert!(doc.timestamp("missing").is_none());
    }
}
