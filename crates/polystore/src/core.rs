//! Core types and traits shared by every driver.
//!
//! [`Value`] is the loosely-typed field value that flows between application
//! code and the backends. [`KeyValueStore`] and [`DocumentStore`] are the two
//! capability interfaces a driver can implement.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use polystore_common::{Error, Result};

use crate::document::Document;
use crate::filter::Filter;
use crate::options::KeyValueOptions;

/// A record: field name to value, keys unique, order irrelevant.
pub type Record = HashMap<String, Value>;

/// Lazily evaluated sequence of records returned by [`KeyValueStore::iter`].
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Universal value type for every supported backend.
///
/// - Scalars: null, booleans, integers, floats, strings, blobs
/// - Composites: lists and maps with heterogeneous nested values
/// - Sets: homogeneous string, number and binary sets (DynamoDB SS/NS/BS)
///
/// # Serialization
///
/// Serializes as plain JSON: sets become arrays and bytes become base64
/// strings, so binary values do not survive a JSON round trip as bytes.
///
/// # Example
///
/// ```rust
/// use polystore::Value;
///
/// let s = Value::from("hello");
/// let n = Value::from(42);
/// let arr = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
/// assert_eq!(n.to_plain_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Missing or null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Ordered list of values
    Array(Vec<Value>),
    /// String-keyed map of values
    Object(HashMap<String, Value>),
    /// String set (DynamoDB SS)
    StringSet(Vec<String>),
    /// Number set (DynamoDB NS)
    NumberSet(Vec<Number>),
    /// Binary set (DynamoDB BS)
    BinarySet(Vec<Vec<u8>>),
}

/// Element of a number set; integers and floats stay distinct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    /// Numeric view of a scalar value
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(Number::Integer(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Integer(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(i) => Value::Integer(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl Value {
    /// Check if the value is null
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as integer
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get as float
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get as array
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as object/map
    #[must_use]
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::StringSet(_) => "string_set",
            Value::NumberSet(_) => "number_set",
            Value::BinarySet(_) => "binary_set",
        }
    }

    /// Elements of a sequence-like value, or the value itself as a
    /// single element.
    #[must_use]
    pub fn to_elements(&self) -> Vec<Value> {
        match self {
            Value::Array(a) => a.clone(),
            Value::StringSet(s) => s.iter().cloned().map(Value::String).collect(),
            Value::NumberSet(n) => n.iter().copied().map(Value::from).collect(),
            Value::BinarySet(b) => b.iter().cloned().map(Value::Bytes).collect(),
            other => vec![other.clone()],
        }
    }

    /// Scalar string form used wherever a backend wants text.
    ///
    /// Integral floats keep a fractional part (`3.0`) so that the text still
    /// reads back as a float. Bytes are base64, composites are JSON text.
    #[must_use]
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => BASE64.encode(b),
            other => serde_json::Value::from(other.clone()).to_string(),
        }
    }

    /// Loose boolean coercion.
    ///
    /// `""`, `"0"` and `"false"` are false, as are zero numbers and empty
    /// collections.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
            _ => !self.is_empty(),
        }
    }

    /// True for null, `""`, empty bytes and empty collections.
    ///
    /// Scalars such as `false`, `0` and `"0"` are values, not emptiness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(_) | Value::Integer(_) | Value::Float(_) => false,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::StringSet(s) => s.is_empty(),
            Value::NumberSet(n) => n.is_empty(),
            Value::BinarySet(b) => b.is_empty(),
        }
    }

    /// Body bytes for object and HTTP KV backends.
    ///
    /// Bytes and strings are sent as-is, anything else as JSON.
    pub fn to_body(&self) -> Result<Bytes> {
        match self {
            Value::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Ok(Bytes::from(serde_json::to_vec(other)?)),
        }
    }

    /// Inverse of [`Value::to_body`]: UTF-8 bodies become strings.
    #[must_use]
    pub fn from_body(body: Bytes) -> Self {
        match String::from_utf8(body.to_vec()) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }
}

fn format_float(f: f64) -> String {
    if !f.is_finite() || f.fract() != 0.0 {
        f.to_string()
    } else if f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f:e}")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(v: HashMap<String, T>) -> Self {
        Value::Object(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::StringSet(s) => {
                serde_json::Value::Array(s.into_iter().map(serde_json::Value::String).collect())
            }
            Value::NumberSet(n) => serde_json::Value::Array(
                n.into_iter()
                    .map(|number| serde_json::Value::from(Value::from(number)))
                    .collect(),
            ),
            Value::BinarySet(b) => serde_json::Value::Array(
                b.into_iter()
                    .map(|bytes| serde_json::Value::String(BASE64.encode(bytes)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serde_json::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// One key/value pair of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueEntry {
    pub key: Value,
    pub value: Value,
}

impl KeyValueEntry {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Operations a key-value backend supports.
///
/// Calling an unsupported operation fails with [`Error::NotImplemented`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub remove: bool,
    pub iterate: bool,
    pub batch: bool,
    pub rename: bool,
    pub chunk_read: bool,
}

/// Uniform key-value interface over a physical backend.
///
/// # Consistency
///
/// `has` followed by `get` is not atomic: a concurrent delete may land in
/// between. `rename` is a copy followed by a delete; a failure in between
/// leaves both keys present.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logging and metrics
    fn backend_name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Fetch the value stored under `key`, `None` when absent.
    async fn get(&self, key: &Value, options: &KeyValueOptions) -> Result<Option<Value>>;

    /// Store `value` under `key`.
    async fn put(&self, key: &Value, value: Value, options: &KeyValueOptions) -> Result<()>;

    async fn remove(&self, key: &Value, options: &KeyValueOptions) -> Result<()>;

    /// True when a non-empty value is stored under `key`.
    async fn has(&self, key: &Value, options: &KeyValueOptions) -> Result<bool> {
        Ok(self
            .get(key, options)
            .await?
            .is_some_and(|value| !value.is_empty()))
    }

    /// Lazily list records. Argument errors are reported before any
    /// backend call; backend errors surface as stream items.
    fn iter(&self, options: &KeyValueOptions) -> Result<RecordStream>;

    /// Read bytes `[offset * size, offset * size + size - 1]` of a value.
    async fn get_chunk(
        &self,
        _key: &Value,
        _options: &KeyValueOptions,
        _size: u64,
        _offset: u64,
    ) -> Result<Bytes> {
        Err(Error::not_implemented(format!(
            "{} does not support chunked reads",
            self.backend_name()
        )))
    }

    async fn rename(&self, _old_key: &Value, _new_key: &Value, _options: &KeyValueOptions) -> Result<()> {
        Err(Error::not_implemented(format!(
            "{} does not support rename",
            self.backend_name()
        )))
    }

    async fn put_batch(&self, entries: Vec<KeyValueEntry>, options: &KeyValueOptions) -> Result<()>;

    async fn remove_batch(&self, keys: Vec<Value>, options: &KeyValueOptions) -> Result<()>;
}

/// CRUD over a document collection.
///
/// Every operation takes an optional collection; drivers fail with
/// [`Error::InvalidArgument`] when neither the call nor the document names one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get_document_by_id(&self, id: &str, collection: Option<&str>) -> Result<Option<Document>>;

    async fn get_documents(&self, filter: &Filter, collection: Option<&str>) -> Result<Vec<Document>>;

    /// Insert or upsert the document, assigning its id and timestamps in place.
    async fn save(&self, document: &mut Document) -> Result<()>;

    /// Returns the number of deleted documents.
    async fn delete_document_by_id(&self, id: &str, collection: Option<&str>) -> Result<u64>;

    async fn delete_documents(&self, filter: &Filter, collection: Option<&str>) -> Result<u64>;

    /// Set the fields of `data` on every matching document, leaving other
    /// fields untouched. Returns the number of matched documents.
    async fn update_documents(&self, filter: &Filter, data: Record, collection: Option<&str>) -> Result<u64>;
}
