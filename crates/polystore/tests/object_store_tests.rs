//! S3 driver tests against the in-memory object store

use std::sync::Arc;

use futures::TryStreamExt;
use polystore::s3::{chunk_range, S3Driver};
use polystore::storage::MemoryObjectStore;
use polystore::{KeyValueEntry, KeyValueOptions, KeyValueStore, Record, Value};

fn create_store() -> Arc<MemoryObjectStore> {
    Arc::new(MemoryObjectStore::new().with_bucket("files").with_page_size(2))
}

fn create_driver(store: &Arc<MemoryObjectStore>) -> S3Driver {
    S3Driver::new(store.clone(), Some("files".to_string()))
}

// ===== Objects =====

mod objects {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();

        driver
            .put(&Value::from("notes/a.txt"), Value::from("hello"), &options)
            .await
            .unwrap();
        assert_eq!(
            driver.get(&Value::from("notes/a.txt"), &options).await.unwrap(),
            Some(Value::from("hello"))
        );
        assert!(driver.has(&Value::from("notes/a.txt"), &options).await.unwrap());

        driver.remove(&Value::from("notes/a.txt"), &options).await.unwrap();
        assert!(driver.get(&Value::from("notes/a.txt"), &options).await.unwrap().is_none());
        assert!(!driver.has(&Value::from("notes/a.txt"), &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_binary_values_stay_binary() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();
        driver
            .put(&Value::from("blob"), Value::Bytes(vec![0xff, 0xfe, 0x00]), &options)
            .await
            .unwrap();
        match driver.get(&Value::from("blob"), &options).await.unwrap() {
            Some(Value::Bytes(bytes)) => assert_eq!(bytes, vec![0xff, 0xfe, 0x00]),
            _ => panic!("Expected bytes"),
        }
    }

    #[tokio::test]
    async fn test_acl_and_content_type_options() {
        let store = create_store();
        let driver = create_driver(&store);

        driver
            .put(&Value::from("private"), Value::from("x"), &KeyValueOptions::new())
            .await
            .unwrap();
        let stored = store.object_options("files", "private").unwrap();
        assert_eq!(stored.acl.as_deref(), Some("private"));

        let options = KeyValueOptions::new()
            .extra("ACL", "public-read")
            .extra("ContentType", "text/plain");
        driver.put(&Value::from("public"), Value::from("x"), &options).await.unwrap();
        let stored = store.object_options("files", "public").unwrap();
        assert_eq!(stored.acl.as_deref(), Some("public-read"));
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_bucket_option_overrides_connection() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new().table("other");
        assert!(driver.get(&Value::from("k"), &options).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_invalid_argument() {
        let driver = S3Driver::new(create_store(), None);
        let err = driver
            .get(&Value::from("k"), &KeyValueOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_ensure_bucket() {
        let store = Arc::new(MemoryObjectStore::new());
        let driver = S3Driver::new(store.clone(), Some("fresh".to_string()));
        driver.ensure_bucket("fresh").await.unwrap();
        // A second call finds the bucket and leaves it alone.
        driver.ensure_bucket("fresh").await.unwrap();
        driver
            .put(&Value::from("k"), Value::from("v"), &KeyValueOptions::new())
            .await
            .unwrap();
    }
}

// ===== Chunks and Rename =====

mod chunks {
    use super::*;

    #[test]
    fn test_chunk_range() {
        assert_eq!(chunk_range(4, 0).unwrap(), (0, 3));
        assert_eq!(chunk_range(4, 2).unwrap(), (8, 11));
        assert!(chunk_range(0, 1).unwrap_err().is_invalid_argument());
        assert!(chunk_range(u64::MAX, 2).is_err());
    }

    #[tokio::test]
    async fn test_get_chunk() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();
        driver
            .put(&Value::from("digits"), Value::from("0123456789"), &options)
            .await
            .unwrap();

        let chunk = driver.get_chunk(&Value::from("digits"), &options, 4, 1).await.unwrap();
        assert_eq!(&chunk[..], b"4567");
        let last = driver.get_chunk(&Value::from("digits"), &options, 4, 2).await.unwrap();
        assert_eq!(&last[..], b"89");
        let missing = driver.get_chunk(&Value::from("nope"), &options, 4, 0).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_rename() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();
        driver.put(&Value::from("old"), Value::from("v"), &options).await.unwrap();

        driver
            .rename(&Value::from("old"), &Value::from("new"), &options)
            .await
            .unwrap();
        assert!(driver.get(&Value::from("old"), &options).await.unwrap().is_none());
        assert_eq!(
            driver.get(&Value::from("new"), &options).await.unwrap(),
            Some(Value::from("v"))
        );
    }

    #[tokio::test]
    async fn test_rename_missing_source_fails() {
        let store = create_store();
        let driver = create_driver(&store);
        assert!(driver
            .rename(&Value::from("nope"), &Value::from("new"), &KeyValueOptions::new())
            .await
            .is_err());
    }
}

// ===== Listings and Batches =====

mod listings {
    use super::*;

    #[tokio::test]
    async fn test_iter_pages_through_prefix() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();
        let entries = ["logs/1", "logs/2", "logs/3", "logs/4", "logs/5", "other"]
            .into_iter()
            .map(|key| KeyValueEntry::new(key, "line"))
            .collect();
        driver.put_batch(entries, &options).await.unwrap();

        let records: Vec<Record> = driver
            .iter(&KeyValueOptions::new().prefix("logs/"))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<String> = records.iter().map(|r| r["Key"].to_plain_string()).collect();
        assert_eq!(keys, vec!["logs/1", "logs/2", "logs/3", "logs/4", "logs/5"]);
        assert_eq!(records[0]["Size"], Value::Integer(4));
        assert!(records[0]["ETag"].as_str().is_some());
        assert!(records[0]["LastModified"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_remove_batch() {
        let store = create_store();
        let driver = create_driver(&store);
        let options = KeyValueOptions::new();
        let entries = vec![KeyValueEntry::new("a", "1"), KeyValueEntry::new("b", "2")];
        driver.put_batch(entries, &options).await.unwrap();

        driver
            .remove_batch(vec![Value::from("a"), Value::from("b")], &options)
            .await
            .unwrap();
        let records: Vec<Record> = driver.iter(&options).unwrap().try_collect().await.unwrap();
        assert!(records.is_empty());
    }
}
