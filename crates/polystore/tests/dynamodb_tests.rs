//! DynamoDB driver tests against the in-memory table service

use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use polystore::dynamodb::DynamoDbDriver;
use polystore::storage::MemoryDynamoDb;
use polystore::{
    AttributeType, ComparisonOperator, Condition, Conditions, Error, KeyValueEntry, KeyValueOptions,
    KeyValueStore, Record, Value,
};
use serde_json::json;

fn create_driver() -> DynamoDbDriver {
    DynamoDbDriver::new(
        Arc::new(MemoryDynamoDb::new().with_table("users", "id").with_page_size(3)),
        Some("users".to_string()),
    )
}

fn user_options() -> KeyValueOptions {
    KeyValueOptions::from_json(json!({
        "KeyName": "id",
        "Types": {"id": "N", "Name": "S", "Active": "BOOL"}
    }))
    .unwrap()
}

fn user(name: &str, active: bool) -> Value {
    let mut record = HashMap::new();
    record.insert("Name".to_string(), Value::from(name));
    record.insert("Active".to_string(), Value::Bool(active));
    Value::Object(record)
}

// ===== Single Item Operations =====

mod items {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_merges_key() {
        let driver = create_driver();
        let options = user_options();

        driver.put(&Value::Integer(1), user("John", true), &options).await.unwrap();

        let stored = driver.get(&Value::Integer(1), &options).await.unwrap().unwrap();
        match stored {
            Value::Object(record) => {
                assert_eq!(record.len(), 3);
                assert_eq!(record["Name"], Value::from("John"));
                assert_eq!(record["Active"], Value::Bool(true));
                assert_eq!(record["id"], Value::Integer(1));
            }
            _ => panic!("Expected record"),
        }
    }

    #[tokio::test]
    async fn test_has_missing_key() {
        let driver = create_driver();
        assert!(!driver.has(&Value::Integer(42), &user_options()).await.unwrap());

        driver.put(&Value::Integer(42), user("Ann", false), &user_options()).await.unwrap();
        assert!(driver.has(&Value::Integer(42), &user_options()).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let driver = create_driver();
        let options = user_options();
        driver.put(&Value::Integer(7), user("Bo", true), &options).await.unwrap();
        assert!(driver.has(&Value::Integer(7), &options).await.unwrap());
        driver.remove(&Value::Integer(7), &options).await.unwrap();
        assert!(driver.get(&Value::Integer(7), &options).await.unwrap().is_none());
        assert!(!driver.has(&Value::Integer(7), &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_key_name_required() {
        let driver = create_driver();
        let err = driver
            .get(&Value::Integer(1), &KeyValueOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_value_must_be_map() {
        let driver = create_driver();
        let err = driver
            .put(&Value::Integer(1), Value::from("plain"), &user_options())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_table_name_option_overrides_default() {
        let driver = create_driver();
        let options = user_options().table("missing");
        let err = driver.get(&Value::Integer(1), &options).await.unwrap_err();
        match err {
            Error::Backend(backend) => assert_eq!(backend.status(), Some(400)),
            _ => panic!("Expected backend error"),
        }
    }
}

// ===== Listings =====

mod listings {
    use super::*;

    async fn seeded() -> DynamoDbDriver {
        let driver = create_driver();
        let options = user_options();
        for (id, name, active) in [(1, "Ann", true), (2, "Bob", false), (3, "Cid", true), (4, "Dee", true), (5, "Eve", false)] {
            driver.put(&Value::Integer(id), user(name, active), &options).await.unwrap();
        }
        driver
    }

    #[tokio::test]
    async fn test_scan_follows_pages() {
        let driver = seeded().await;
        let mut filter = Conditions::new();
        filter.insert("Active".to_string(), Condition::equals(true));
        let options = user_options().scan_filter(filter);

        let records: Vec<Record> = driver.iter(&options).unwrap().try_collect().await.unwrap();
        let mut names: Vec<String> = records.iter().map(|r| r["Name"].to_plain_string()).collect();
        names.sort();
        assert_eq!(names, vec!["Ann", "Cid", "Dee"]);
    }

    #[tokio::test]
    async fn test_query_by_key() {
        let driver = seeded().await;
        let mut conditions = Conditions::new();
        conditions.insert("id".to_string(), Condition::equals(2));
        let options = user_options().key_conditions(conditions);

        let records: Vec<Record> = driver.iter(&options).unwrap().try_collect().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["Name"], Value::from("Bob"));
    }

    #[tokio::test]
    async fn test_scan_with_limit_option() {
        let driver = seeded().await;
        let mut filter = Conditions::new();
        filter.insert("Name".to_string(), Condition::new(ComparisonOperator::NotNull, vec![]));
        let options = user_options().scan_filter(filter).extra("Limit", 2);

        let records: Vec<Record> = driver.iter(&options).unwrap().try_collect().await.unwrap();
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn test_query_and_scan_are_exclusive() {
        let driver = create_driver();
        let mut conditions = Conditions::new();
        conditions.insert("id".to_string(), Condition::equals(1));
        let options = user_options()
            .key_conditions(conditions.clone())
            .scan_filter(conditions);
        match driver.iter(&options) {
            Err(err) => assert!(err.is_invalid_argument()),
            Ok(_) => panic!("Expected invalid argument"),
        }
    }

    #[tokio::test]
    async fn test_empty_key_conditions_fall_back_to_scan() {
        let driver = seeded().await;
        let mut filter = Conditions::new();
        filter.insert("Active".to_string(), Condition::equals(false));
        let options = user_options()
            .key_conditions(Conditions::new())
            .scan_filter(filter);

        let records: Vec<Record> = driver.iter(&options).unwrap().try_collect().await.unwrap();
        let mut names: Vec<String> = records.iter().map(|r| r["Name"].to_plain_string()).collect();
        names.sort();
        assert_eq!(names, vec!["Bob", "Eve"]);
    }

    #[test]
    fn test_listing_mode_required() {
        let driver = create_driver();
        match driver.iter(&user_options()) {
            Err(err) => assert!(err.is_invalid_argument()),
            Ok(_) => panic!("Expected invalid argument"),
        }
        let empty = user_options()
            .key_conditions(Conditions::new())
            .scan_filter(Conditions::new());
        match driver.iter(&empty) {
            Err(err) => assert!(err.is_invalid_argument()),
            Ok(_) => panic!("Expected invalid argument"),
        }
    }
}

// ===== Batches and Unsupported Operations =====

mod batches {
    use super::*;

    #[tokio::test]
    async fn test_put_batch_larger_than_one_request() {
        let db = Arc::new(MemoryDynamoDb::new().with_table("users", "id"));
        let driver = DynamoDbDriver::new(db.clone(), Some("users".to_string()));
        let entries: Vec<KeyValueEntry> = (0..60)
            .map(|i| KeyValueEntry::new(i64::from(i), user("n", i % 2 == 0)))
            .collect();

        driver.put_batch(entries, &user_options()).await.unwrap();
        assert_eq!(db.item_count("users"), 60);

        let keys: Vec<Value> = (0..30).map(|i| Value::Integer(i)).collect();
        driver.remove_batch(keys, &user_options()).await.unwrap();
        assert_eq!(db.item_count("users"), 30);
    }

    #[tokio::test]
    async fn test_rename_and_chunks_not_implemented() {
        let driver = create_driver();
        let options = user_options();
        assert!(!driver.capabilities().rename);

        let err = driver
            .rename(&Value::Integer(1), &Value::Integer(2), &options)
            .await
            .unwrap_err();
        assert!(err.is_not_implemented());

        let err = driver
            .get_chunk(&Value::Integer(1), &options, 10, 0)
            .await
            .unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[tokio::test]
    async fn test_declared_types_survive() {
        let driver = create_driver();
        let options = user_options()
            .with_type("Tags", AttributeType::StringSet)
            .with_type("Score", AttributeType::Number);
        let mut record = HashMap::new();
        record.insert("Tags".to_string(), Value::from(vec!["a", "b"]));
        record.insert("Score".to_string(), Value::from("12.5"));
        driver.put(&Value::Integer(9), Value::Object(record), &options).await.unwrap();

        let stored = driver.get(&Value::Integer(9), &options).await.unwrap().unwrap();
        let record = stored.as_object().unwrap();
        assert_eq!(record["Tags"], Value::StringSet(vec!["a".into(), "b".into()]));
        assert_eq!(record["Score"], Value::Float(12.5));
    }
}
