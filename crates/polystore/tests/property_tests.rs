//! Property tests for the pure helpers

use std::collections::HashMap;

use polystore::dynamodb::translator::{decode_attribute, decode_item, encode_attribute, encode_record, parse_number};
use polystore::s3::chunk_range;
use polystore::{AttributeType, ConnectionString, Number, Record, Value};
use proptest::prelude::*;

fn finite_float() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<f64>().prop_filter("finite", |f| f.is_finite()),
        // Integral floats must not come back as integers.
        (-1_000_000i32..1_000_000).prop_map(f64::from),
        (-300i32..300).prop_map(|e| 10f64.powi(e)),
    ]
}

fn number() -> impl Strategy<Value = Number> {
    prop_oneof![any::<i64>().prop_map(Number::Integer), finite_float().prop_map(Number::Float)]
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        finite_float().prop_map(Value::Float),
        "\\PC{0,16}".prop_map(Value::String),
        prop::collection::vec("\\PC{0,8}", 0..4).prop_map(Value::StringSet),
        prop::collection::vec(number(), 0..4).prop_map(Value::NumberSet),
    ]
}

/// Any value the tagged encoding can carry; binary values stay tagged on
/// decode and are left out.
fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("k_[a-z]{1,6}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Sets compare without regard to element order
fn canonical(value: Value) -> Value {
    match value {
        Value::StringSet(mut items) => {
            items.sort();
            Value::StringSet(items)
        }
        Value::NumberSet(mut items) => {
            items.sort_by_key(|n| Value::from(*n).to_plain_string());
            Value::NumberSet(items)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, canonical(v))).collect()),
        other => other,
    }
}

fn canonical_record(record: Record) -> Record {
    record.into_iter().map(|(k, v)| (k, canonical(v))).collect()
}

proptest! {
    #[test]
    fn test_chunk_range_covers_exactly_size_bytes(size in 1u64..1 << 32, offset in 0u64..1 << 16) {
        let (first, last) = chunk_range(size, offset).unwrap();
        prop_assert_eq!(first, size * offset);
        prop_assert_eq!(last - first + 1, size);
    }

    #[test]
    fn test_integers_survive_number_tag(n in any::<i64>()) {
        let encoded = encode_attribute(&Value::Integer(n), AttributeType::Number);
        prop_assert_eq!(decode_attribute(&encoded), Value::Integer(n));
        prop_assert_eq!(parse_number(&n.to_string()), Value::Integer(n));
    }

    #[test]
    fn test_strings_survive_string_tag(s in "\\PC*") {
        let encoded = encode_attribute(&Value::String(s.clone()), AttributeType::String);
        prop_assert_eq!(decode_attribute(&encoded), Value::String(s));
    }

    #[test]
    fn test_values_survive_their_inferred_tag(v in value()) {
        let encoded = encode_attribute(&v, AttributeType::infer(&v));
        prop_assert_eq!(canonical(decode_attribute(&encoded)), canonical(v));
    }

    #[test]
    fn test_records_survive_encoding(record in prop::collection::hash_map("[a-z]{1,8}", value(), 1..6)) {
        let types: HashMap<String, AttributeType> = record
            .iter()
            .map(|(field, v)| (field.clone(), AttributeType::infer(v)))
            .collect();
        let decoded = decode_item(&encode_record(&record, &types)).unwrap();
        prop_assert_eq!(canonical_record(decoded), canonical_record(record));
    }

    #[test]
    fn test_numeric_params_are_coerced(n in any::<i64>(), word in "[a-z]{1,12}") {
        let conn = ConnectionString::parse(&format!("s3://host/bucket?limit={n}&name=w{word}")).unwrap();
        prop_assert_eq!(conn.param("limit"), Some(&Value::Integer(n)));
        prop_assert_eq!(conn.param("name"), Some(&Value::String(format!("w{word}"))));
    }
}
