//! Per-call options for key-value operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

use polystore_common::{Error, Result};

use crate::attribute::AttributeType;
use crate::core::Value;

/// DynamoDB legacy comparison operators used by `KeyConditions` and
/// `ScanFilter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
    NotNull,
    Null,
    Contains,
    NotContains,
    BeginsWith,
    In,
    Between,
}

/// A single legacy condition on one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Condition {
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub attribute_value_list: Vec<Value>,
}

impl Condition {
    pub fn new(operator: ComparisonOperator, values: Vec<Value>) -> Self {
        Self {
            comparison_operator: operator,
            attribute_value_list: values,
        }
    }

    pub fn equals(value: impl Into<Value>) -> Self {
        Self::new(ComparisonOperator::Eq, vec![value.into()])
    }
}

/// Field name to condition.
pub type Conditions = BTreeMap<String, Condition>;

/// Recognized per-call options.
///
/// Serialized field names match the option keys backends document
/// (`KeyName`, `Types`, `TableName`, `KeyConditions`, `ScanFilter`, `prefix`).
/// Anything else lands in `extra` and is interpreted by the backend that
/// understands it (`ACL`, `ContentType`, `Limit`, `cursor`, `expiration_ttl` ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValueOptions {
    /// Field holding the record key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,

    /// Declared attribute types per field
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub types: HashMap<String, AttributeType>,

    /// Table, bucket or collection override
    #[serde(default, alias = "collection", skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,

    /// Query mode listing conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_conditions: Option<Conditions>,

    /// Scan mode listing conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_filter: Option<Conditions>,

    /// Listing scope
    #[serde(default, rename = "prefix", skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl KeyValueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON object
    pub fn from_json(value: JsonValue) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::invalid(format!("Invalid options: {e}")))
    }

    #[must_use]
    pub fn key_name(mut self, name: impl Into<String>) -> Self {
        self.key_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, field: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.types.insert(field.into(), attribute_type);
        self
    }

    #[must_use]
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn key_conditions(mut self, conditions: Conditions) -> Self {
        self.key_conditions = Some(conditions);
        self
    }

    #[must_use]
    pub fn scan_filter(mut self, conditions: Conditions) -> Self {
        self.scan_filter = Some(conditions);
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a backend-specific option
    #[must_use]
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// The declared key field, required by attribute-tagged backends.
    pub fn require_key_name(&self) -> Result<&str> {
        self.key_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::invalid("the KeyName option is required"))
    }

    #[must_use]
    pub fn extra_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(JsonValue::as_str)
    }

    /// Numeric option, accepting numbers or numeric strings
    #[must_use]
    pub fn extra_u64(&self, name: &str) -> Option<u64> {
        match self.extra.get(name)? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_options() {
        let options = KeyValueOptions::from_json(json!({
            "KeyName": "id",
            "Types": {"id": "NUMBER", "Active": "BOOL"},
            "TableName": "users",
            "ScanFilter": {
                "Active": {"ComparisonOperator": "EQ", "AttributeValueList": [true]}
            },
            "ACL": "public-read",
            "Limit": 10
        }))
        .unwrap();

        assert_eq!(options.require_key_name().unwrap(), "id");
        assert_eq!(options.types["id"], AttributeType::Number);
        assert_eq!(options.types["Active"], AttributeType::Boolean);
        assert_eq!(options.table_name.as_deref(), Some("users"));
        let scan = options.scan_filter.as_ref().unwrap();
        assert_eq!(scan["Active"].comparison_operator, ComparisonOperator::Eq);
        assert_eq!(options.extra_str("ACL"), Some("public-read"));
        assert_eq!(options.extra_u64("Limit"), Some(10));
        assert!(options.key_conditions.is_none());
    }

    #[test]
    fn test_collection_alias_and_prefix() {
        let options =
            KeyValueOptions::from_json(json!({"collection": "cars", "prefix": "a/"})).unwrap();
        assert_eq!(options.table_name.as_deref(), Some("cars"));
        assert_eq!(options.prefix.as_deref(), Some("a/"));
    }

    #[test]
    fn test_missing_key_name() {
        let err = KeyValueOptions::new().require_key_name().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(KeyValueOptions::from_json(json!({"Types": {"a": "DATE"}})).is_err());
    }

    #[test]
    fn test_builder() {
        let options = KeyValueOptions::new()
            .key_name("id")
            .with_type("id", AttributeType::Number)
            .extra("expiration_ttl", "60");
        assert_eq!(options.extra_u64("expiration_ttl"), Some(60));
        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!({"KeyName": "id", "Types": {"id": "N"}, "expiration_ttl": "60"})
        );
    }
}
