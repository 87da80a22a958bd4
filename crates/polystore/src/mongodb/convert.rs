//! Conversion between BSON and [`Value`].
//!
//! Portable BSON types map onto the matching [`Value`] variant. Everything
//! else (ObjectId, DateTime, Binary, Decimal128, Timestamp, JavaScript, ...)
//! becomes its relaxed Extended JSON mapping, e.g. `{"$oid": "..."}`, which
//! converts back to the same BSON type on the way in.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use chrono::{DateTime, Utc};

use crate::core::{Record, Value};

/// Extended JSON wrapper keys recognised on the way back to BSON
const EXTJSON_KEYS: &[&str] = &[
    "$oid",
    "$date",
    "$numberLong",
    "$numberInt",
    "$numberDouble",
    "$numberDecimal",
    "$binary",
    "$uuid",
    "$timestamp",
    "$regularExpression",
    "$code",
    "$symbol",
    "$minKey",
    "$maxKey",
    "$undefined",
    "$dbPointer",
];

pub fn bson_to_value(bson: Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Integer(i64::from(i)),
        Bson::Int64(i) => Value::Integer(i),
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) => Value::String(s),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Object(document_to_record(doc)),
        other => Value::from(other.into_relaxed_extjson()),
    }
}

pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Integer(i) => i32::try_from(*i).map_or(Bson::Int64(*i), Bson::Int32),
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Bytes(b) => binary(b),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Object(map) => extjson_to_bson(value)
            .unwrap_or_else(|| Bson::Document(record_to_document(map))),
        Value::StringSet(items) => Bson::Array(items.iter().cloned().map(Bson::String).collect()),
        Value::NumberSet(items) => Bson::Array(
            items
                .iter()
                .map(|n| value_to_bson(&Value::from(*n)))
                .collect(),
        ),
        Value::BinarySet(items) => Bson::Array(items.iter().map(|b| binary(b)).collect()),
    }
}

fn binary(bytes: &[u8]) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.to_vec(),
    })
}

/// Convert a single-wrapper map such as `{"$oid": ".."}` back to BSON
fn extjson_to_bson(value: &Value) -> Option<Bson> {
    let map = value.as_object()?;
    let is_wrapper = !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
        && map.keys().any(|k| EXTJSON_KEYS.contains(&k.as_str()));
    if !is_wrapper {
        return None;
    }
    Bson::try_from(serde_json::Value::from(value.clone())).ok()
}

pub fn document_to_record(doc: Document) -> Record {
    doc.into_iter()
        .map(|(key, value)| (key, bson_to_value(value)))
        .collect()
}

pub fn record_to_document(record: &Record) -> Document {
    record
        .iter()
        .map(|(key, value)| (key.clone(), value_to_bson(value)))
        .collect()
}

/// Timestamp value written into documents; stored as a BSON date
#[must_use]
pub fn datetime_value(at: DateTime<Utc>) -> Value {
    bson_to_value(Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis())))
}
