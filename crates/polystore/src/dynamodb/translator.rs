//! DynamoDB JSON format translator
//!
//! Converts between generic records and DynamoDB's tagged attribute values
//! (`{"N": "42"}`), and between relational filters and legacy conditions.

use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

use polystore_common::{Error, Result};

use crate::attribute::AttributeType;
use crate::core::{Number, Record, Value};
use crate::filter::{Filter, Relation};
use crate::options::{ComparisonOperator, Condition, Conditions};

/// Encode a record into a DynamoDB item.
///
/// Each field is encoded with its declared type, STRING when undeclared.
#[must_use]
pub fn encode_record(record: &Record, types: &HashMap<String, AttributeType>) -> Map<String, JsonValue> {
    record
        .iter()
        .map(|(field, value)| {
            let tag = AttributeType::for_field(field, types);
            (field.clone(), encode_attribute(value, tag))
        })
        .collect()
}

/// Encode one value under an explicit type tag
#[must_use]
pub fn encode_attribute(value: &Value, tag: AttributeType) -> JsonValue {
    match tag {
        AttributeType::Boolean => json!({"BOOL": value.is_truthy()}),
        AttributeType::Null => json!({"NULL": true}),
        AttributeType::Number => json!({"N": value.to_plain_string()}),
        AttributeType::StringSet | AttributeType::NumberSet | AttributeType::BinarySet => {
            let items: Vec<String> = value.to_elements().iter().map(Value::to_plain_string).collect();
            json!({ tag.tag(): items })
        }
        AttributeType::List => {
            let items: Vec<JsonValue> = value.to_elements().iter().map(encode_inferred).collect();
            json!({"L": items})
        }
        AttributeType::Map => match value {
            Value::Object(map) => json!({"M": encode_map(map)}),
            other => json!({"S": other.to_plain_string()}),
        },
        AttributeType::String | AttributeType::Binary => json!({ tag.tag(): value.to_plain_string() }),
    }
}

/// Encode a list or map element, inferring its tag from the runtime type.
/// Values that are already tagged pass through unchanged.
#[must_use]
pub fn encode_inferred(value: &Value) -> JsonValue {
    if is_tagged(value) {
        return JsonValue::from(value.clone());
    }
    match value {
        Value::Array(items) => json!({"L": items.iter().map(encode_inferred).collect::<Vec<_>>()}),
        Value::Object(map) => json!({"M": encode_map(map)}),
        other => encode_attribute(other, AttributeType::infer(other)),
    }
}

fn encode_map(map: &HashMap<String, Value>) -> Map<String, JsonValue> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_inferred(v)))
        .collect()
}

/// True for a single-key map whose key is a known type tag
#[must_use]
pub fn is_tagged(value: &Value) -> bool {
    match value {
        Value::Object(map) if map.len() == 1 => map
            .keys()
            .next()
            .is_some_and(|k| AttributeType::from_tag(k).is_some()),
        _ => false,
    }
}

/// Decode a DynamoDB item; an empty item means "not found".
#[must_use]
pub fn decode_item(item: &Map<String, JsonValue>) -> Option<Record> {
    if item.is_empty() {
        return None;
    }
    Some(
        item.iter()
            .map(|(field, attr)| (field.clone(), decode_attribute(attr)))
            .collect(),
    )
}

/// Decode one tagged attribute value.
///
/// Lists and maps are decoded recursively. Binary values and unknown or
/// malformed tags are returned still tagged.
#[must_use]
pub fn decode_attribute(attr: &JsonValue) -> Value {
    let Some((tag, inner)) = single_entry(attr) else {
        return Value::from(attr.clone());
    };

    match (tag, inner) {
        ("S", JsonValue::String(s)) => Value::String(s.clone()),
        ("N", JsonValue::String(s)) => parse_number(s),
        ("N", JsonValue::Number(_)) => Value::from(inner.clone()),
        ("BOOL", _) => Value::Bool(Value::from(inner.clone()).is_truthy()),
        ("NULL", _) => Value::Null,
        ("L", JsonValue::Array(items)) => Value::Array(items.iter().map(decode_attribute).collect()),
        ("M", JsonValue::Object(map)) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), decode_attribute(v)))
                .collect(),
        ),
        ("SS", JsonValue::Array(items)) => Value::StringSet(
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), String::from))
                .collect(),
        ),
        ("NS", JsonValue::Array(items)) => items
            .iter()
            .map(number_element)
            .collect::<Option<Vec<Number>>>()
            .map_or_else(|| Value::from(attr.clone()), Value::NumberSet),
        _ => Value::from(attr.clone()),
    }
}

/// One NS element; `None` when it is not a number
fn number_element(element: &JsonValue) -> Option<Number> {
    match element {
        JsonValue::String(text) => Number::from_value(&parse_number(text)),
        JsonValue::Number(_) => Number::from_value(&Value::from(element.clone())),
        _ => None,
    }
}

fn single_entry(attr: &JsonValue) -> Option<(&str, &JsonValue)> {
    match attr {
        JsonValue::Object(map) if map.len() == 1 => map.iter().next().map(|(k, v)| (k.as_str(), v)),
        _ => None,
    }
}

/// Integer unless the text has a fractional part or exponent. Text that is
/// not a number at all is kept as a string.
#[must_use]
pub fn parse_number(text: &str) -> Value {
    let is_float = text.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Integer(i);
        }
    }
    text.parse::<f64>()
        .map_or_else(|_| Value::String(text.to_string()), Value::Float)
}

/// Build the `Key` map of a single-item request
#[must_use]
pub fn encode_key(key_name: &str, key: &Value, types: &HashMap<String, AttributeType>) -> Map<String, JsonValue> {
    let mut map = Map::with_capacity(1);
    map.insert(
        key_name.to_string(),
        encode_attribute(key, AttributeType::for_field(key_name, types)),
    );
    map
}

/// Encode legacy `KeyConditions`/`ScanFilter` conditions.
///
/// Operands that are already tagged pass through; otherwise a declared
/// type (its element type for sets) is used, falling back to inference.
#[must_use]
pub fn encode_conditions(conditions: &Conditions, types: &HashMap<String, AttributeType>) -> Map<String, JsonValue> {
    conditions
        .iter()
        .map(|(field, condition)| {
            let operands: Vec<JsonValue> = condition
                .attribute_value_list
                .iter()
                .map(|operand| {
                    if is_tagged(operand) {
                        JsonValue::from(operand.clone())
                    } else if let Some(declared) = types.get(field) {
                        encode_attribute(operand, declared.element_type())
                    } else {
                        encode_inferred(operand)
                    }
                })
                .collect();
            let mut encoded = Map::new();
            encoded.insert(
                "ComparisonOperator".to_string(),
                serde_json::to_value(condition.comparison_operator).unwrap_or(JsonValue::Null),
            );
            if !operands.is_empty() {
                encoded.insert("AttributeValueList".to_string(), JsonValue::Array(operands));
            }
            (field.clone(), JsonValue::Object(encoded))
        })
        .collect()
}

/// Translate a relational filter into `ScanFilter` conditions.
///
/// Only conjunctive filters naming each field once are accepted; `NotIn`
/// has no legacy equivalent.
pub fn conditions_from_filter(filter: &Filter) -> Result<Conditions> {
    let mut conditions = Conditions::new();
    for clause in filter.conjunctive_clauses()? {
        let (operator, operands) = match clause.relation {
            Relation::Equal => (ComparisonOperator::Eq, vec![clause.value.clone()]),
            Relation::NotEqual => (ComparisonOperator::Ne, vec![clause.value.clone()]),
            Relation::GreaterThan => (ComparisonOperator::Gt, vec![clause.value.clone()]),
            Relation::GreaterOrEqual => (ComparisonOperator::Ge, vec![clause.value.clone()]),
            Relation::LessThan => (ComparisonOperator::Lt, vec![clause.value.clone()]),
            Relation::LessOrEqual => (ComparisonOperator::Le, vec![clause.value.clone()]),
            Relation::StartsWith => (ComparisonOperator::BeginsWith, vec![clause.value.clone()]),
            Relation::Contains => (ComparisonOperator::Contains, vec![clause.value.clone()]),
            Relation::In => (ComparisonOperator::In, clause.value.to_elements()),
            Relation::NotIn => {
                return Err(Error::invalid(format!(
                    "NOT_IN cannot be expressed as a DynamoDB condition (field {})",
                    clause.field
                )))
            }
        };
        conditions.insert(clause.field.clone(), Condition::new(operator, operands));
    }
    Ok(conditions)
}
