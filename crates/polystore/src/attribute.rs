//! DynamoDB attribute type tags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use polystore_common::Error;

use crate::core::Value;

/// Native value-type tag of a DynamoDB attribute.
///
/// Deserializes from either the raw tag (`"N"`) or the enumerator name
/// (`"NUMBER"`) and always serializes as the raw tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "S", alias = "STRING")]
    String,
    #[serde(rename = "N", alias = "NUMBER")]
    Number,
    #[serde(rename = "BOOL", alias = "BOOLEAN")]
    Boolean,
    #[serde(rename = "NULL")]
    Null,
    #[serde(rename = "L", alias = "LIST")]
    List,
    #[serde(rename = "M", alias = "MAP")]
    Map,
    #[serde(rename = "SS", alias = "STRING_SET")]
    StringSet,
    #[serde(rename = "NS", alias = "NUMBER_SET")]
    NumberSet,
    #[serde(rename = "B", alias = "BINARY")]
    Binary,
    #[serde(rename = "BS", alias = "BINARY_SET")]
    BinarySet,
}

impl AttributeType {
    pub const ALL: [AttributeType; 10] = [
        AttributeType::String,
        AttributeType::Number,
        AttributeType::Boolean,
        AttributeType::Null,
        AttributeType::List,
        AttributeType::Map,
        AttributeType::StringSet,
        AttributeType::NumberSet,
        AttributeType::Binary,
        AttributeType::BinarySet,
    ];

    /// Declared tag of `field`, STRING when undeclared.
    #[must_use]
    pub fn for_field(field: &str, types: &HashMap<String, AttributeType>) -> Self {
        types.get(field).copied().unwrap_or(AttributeType::String)
    }

    /// Wire tag, e.g. `"N"`
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Boolean => "BOOL",
            AttributeType::Null => "NULL",
            AttributeType::List => "L",
            AttributeType::Map => "M",
            AttributeType::StringSet => "SS",
            AttributeType::NumberSet => "NS",
            AttributeType::Binary => "B",
            AttributeType::BinarySet => "BS",
        }
    }

    /// Enumerator name, e.g. `"NUMBER"`
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            AttributeType::String => "STRING",
            AttributeType::Number => "NUMBER",
            AttributeType::Boolean => "BOOLEAN",
            AttributeType::Null => "NULL",
            AttributeType::List => "LIST",
            AttributeType::Map => "MAP",
            AttributeType::StringSet => "STRING_SET",
            AttributeType::NumberSet => "NUMBER_SET",
            AttributeType::Binary => "BINARY",
            AttributeType::BinarySet => "BINARY_SET",
        }
    }

    /// Look up a wire tag. Enumerator names are not accepted here.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Element tag of a set type; other types are their own element type.
    #[must_use]
    pub fn element_type(self) -> Self {
        match self {
            AttributeType::StringSet => AttributeType::String,
            AttributeType::NumberSet => AttributeType::Number,
            AttributeType::BinarySet => AttributeType::Binary,
            other => other,
        }
    }

    /// Tag inferred from a value's runtime type.
    #[must_use]
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => AttributeType::Null,
            Value::Bool(_) => AttributeType::Boolean,
            Value::Integer(_) | Value::Float(_) => AttributeType::Number,
            Value::String(_) => AttributeType::String,
            Value::Bytes(_) => AttributeType::Binary,
            Value::Array(_) => AttributeType::List,
            Value::Object(_) => AttributeType::Map,
            Value::StringSet(_) => AttributeType::StringSet,
            Value::NumberSet(_) => AttributeType::NumberSet,
            Value::BinarySet(_) => AttributeType::BinarySet,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AttributeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == upper || t.name() == upper)
            .ok_or_else(|| Error::invalid(format!("Unknown attribute type: {s}")))
    }
}
