//! S3 key-value driver
//!
//! Keys are object keys, values are object bodies. The bucket comes from the
//! connection-string path unless the `TableName` option overrides it.
//!
//! Connection string: `s3://key:secret@region/bucket?endpoint=...&use_path_style_endpoint=true&create=true`

pub mod client;
pub mod xml;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use polystore_common::metrics::{record_items_decoded, OperationTimer};
use polystore_common::{Config, Error, Result};

use crate::aws::{credentials_from, region_from, Signer};
use crate::connection::ConnectionString;
use crate::core::{Capabilities, KeyValueEntry, KeyValueStore, Record, RecordStream, Value};
use crate::options::KeyValueOptions;
use crate::registry::KeyValueConnector;

pub use client::{HttpObjectStore, ObjectListing, ObjectStoreApi, ObjectSummary, PutObjectOptions};
use client::SERVICE;

/// Canned ACL applied when the `ACL` option is absent
pub const DEFAULT_ACL: &str = "private";

/// Key-value driver backed by an S3 bucket
pub struct S3Driver {
    store: Arc<dyn ObjectStoreApi>,
    default_bucket: Option<String>,
}

impl S3Driver {
    pub fn new(store: Arc<dyn ObjectStoreApi>, default_bucket: Option<String>) -> Self {
        Self {
            store,
            default_bucket: default_bucket.filter(|b| !b.is_empty()),
        }
    }

    /// Build an HTTP-backed driver, creating the bucket first when the
    /// connection string carries `create=true` and the bucket is missing.
    pub async fn from_connection(conn: &ConnectionString, config: &Config) -> Result<Self> {
        let signer = Signer::new(credentials_from(conn)?, region_from(conn), SERVICE);
        let endpoint = conn.param_str("endpoint");
        let store = HttpObjectStore::new(
            signer,
            endpoint.as_deref(),
            conn.param_flag("use_path_style_endpoint"),
            conn.param_flag("use_accelerate_endpoint"),
            &config.http,
        )?;
        let driver = Self::new(Arc::new(store), Some(conn.path.clone()));
        if conn.param_flag("create") {
            driver.ensure_bucket(&conn.path).await?;
        }
        Ok(driver)
    }

    /// Create `bucket` unless it already exists
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if bucket.is_empty() {
            return Err(Error::invalid("cannot create a bucket without a name"));
        }
        if !self.store.head_bucket(bucket).await? {
            info!(bucket, "creating missing bucket");
            self.store.create_bucket(bucket).await?;
        }
        Ok(())
    }

    fn bucket<'a>(&'a self, options: &'a KeyValueOptions) -> Result<&'a str> {
        options
            .table_name
            .as_deref()
            .filter(|b| !b.is_empty())
            .or(self.default_bucket.as_deref())
            .ok_or_else(|| Error::invalid("no bucket: set the TableName option or the connection path"))
    }

    fn object_key(key: &Value) -> Result<String> {
        let key = key.to_plain_string();
        if key.is_empty() {
            return Err(Error::invalid("S3 object keys cannot be empty"));
        }
        Ok(key)
    }

    fn put_options(options: &KeyValueOptions) -> PutObjectOptions {
        PutObjectOptions {
            content_type: options.extra_str("ContentType").map(String::from),
            acl: Some(options.extra_str("ACL").unwrap_or(DEFAULT_ACL).to_string()),
        }
    }
}

/// Inclusive byte range of chunk `offset` when reading `size`-byte chunks
pub fn chunk_range(size: u64, offset: u64) -> Result<(u64, u64)> {
    if size == 0 {
        return Err(Error::invalid("chunk size must be positive"));
    }
    let first = size
        .checked_mul(offset)
        .ok_or_else(|| Error::invalid("chunk offset out of range"))?;
    let last = first
        .checked_add(size - 1)
        .ok_or_else(|| Error::invalid("chunk offset out of range"))?;
    Ok((first, last))
}

fn summary_record(summary: ObjectSummary) -> Record {
    let mut record = Record::new();
    record.insert("Key".to_string(), Value::String(summary.key));
    record.insert(
        "Size".to_string(),
        Value::Integer(i64::try_from(summary.size).unwrap_or(i64::MAX)),
    );
    record.insert("LastModified".to_string(), summary.last_modified.into());
    record.insert("ETag".to_string(), summary.etag.into());
    record
}

#[async_trait]
impl KeyValueStore for S3Driver {
    fn backend_name(&self) -> &'static str {
        SERVICE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: true,
            write: true,
            remove: true,
            iterate: true,
            batch: true,
            rename: true,
            chunk_read: true,
        }
    }

    #[instrument(skip(self, options))]
    async fn get(&self, key: &Value, options: &KeyValueOptions) -> Result<Option<Value>> {
        let bucket = self.bucket(options)?;
        let key = Self::object_key(key)?;
        let timer = OperationTimer::start(SERVICE, "get");
        let body = timer.finish(self.store.get_object(bucket, &key, None).await)?;
        Ok(body.map(Value::from_body))
    }

    #[instrument(skip(self, value, options))]
    async fn put(&self, key: &Value, value: Value, options: &KeyValueOptions) -> Result<()> {
        let bucket = self.bucket(options)?;
        let key = Self::object_key(key)?;
        let body = value.to_body()?;
        let timer = OperationTimer::start(SERVICE, "put");
        timer.finish(
            self.store
                .put_object(bucket, &key, body, &Self::put_options(options))
                .await,
        )
    }

    #[instrument(skip(self, options))]
    async fn remove(&self, key: &Value, options: &KeyValueOptions) -> Result<()> {
        let bucket = self.bucket(options)?;
        let key = Self::object_key(key)?;
        let timer = OperationTimer::start(SERVICE, "remove");
        timer.finish(self.store.delete_object(bucket, &key).await)
    }

    async fn has(&self, key: &Value, options: &KeyValueOptions) -> Result<bool> {
        let bucket = self.bucket(options)?;
        let key = Self::object_key(key)?;
        self.store.head_object(bucket, &key).await
    }

    /// Every object under the `prefix` option as `{Key, Size, LastModified, ETag}`
    fn iter(&self, options: &KeyValueOptions) -> Result<RecordStream> {
        let bucket = self.bucket(options)?.to_string();
        let prefix = options.prefix.clone();
        let store = Arc::clone(&self.store);
        debug!(%bucket, ?prefix, "listing objects");

        let pages = stream::try_unfold(Some(None::<String>), move |state| {
            let store = Arc::clone(&store);
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            async move {
                let Some(token) = state else {
                    return Ok(None);
                };
                let listing = store
                    .list_objects(&bucket, prefix.as_deref(), token.as_deref())
                    .await?;
                record_items_decoded(SERVICE, listing.objects.len());
                let next = listing.next_token.map(Some);
                let records: Vec<Record> = listing.objects.into_iter().map(summary_record).collect();
                Ok::<_, Error>(Some((records, next)))
            }
        });

        Ok(pages
            .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }

    #[instrument(skip(self, options))]
    async fn get_chunk(&self, key: &Value, options: &KeyValueOptions, size: u64, offset: u64) -> Result<Bytes> {
        let bucket = self.bucket(options)?;
        let key = Self::object_key(key)?;
        let range = chunk_range(size, offset)?;
        let timer = OperationTimer::start(SERVICE, "get_chunk");
        let body = timer.finish(self.store.get_object(bucket, &key, Some(range)).await)?;
        Ok(body.unwrap_or_default())
    }

    /// Copy then delete; not atomic.
    #[instrument(skip(self, options))]
    async fn rename(&self, old_key: &Value, new_key: &Value, options: &KeyValueOptions) -> Result<()> {
        let bucket = self.bucket(options)?;
        let source = Self::object_key(old_key)?;
        let destination = Self::object_key(new_key)?;
        let timer = OperationTimer::start(SERVICE, "rename");
        let result = match self.store.copy_object(bucket, &source, &destination).await {
            Ok(()) => self.store.delete_object(bucket, &source).await,
            Err(e) => Err(e),
        };
        timer.finish(result)
    }

    async fn put_batch(&self, entries: Vec<KeyValueEntry>, options: &KeyValueOptions) -> Result<()> {
        for entry in entries {
            self.put(&entry.key, entry.value, options).await?;
        }
        Ok(())
    }

    async fn remove_batch(&self, keys: Vec<Value>, options: &KeyValueOptions) -> Result<()> {
        for key in &keys {
            self.remove(key, options).await?;
        }
        Ok(())
    }
}

/// Registers the `s3` scheme
pub struct S3Connector;

#[async_trait]
impl KeyValueConnector for S3Connector {
    fn schemes(&self) -> &'static [&'static str] {
        &["s3"]
    }

    async fn connect(&self, conn: &ConnectionString, config: &Config) -> Result<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(S3Driver::from_connection(conn, config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_range() {
        assert_eq!(chunk_range(4, 0).unwrap(), (0, 3));
        assert_eq!(chunk_range(4, 2).unwrap(), (8, 11));
        assert!(chunk_range(0, 1).unwrap_err().is_invalid_argument());
        assert!(chunk_range(u64::MAX, 2).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_summary_record() {
        let record = summary_record(ObjectSummary {
            key: "a.txt".to_string(),
            size: 3,
            last_modified: None,
            etag: Some("abc".to_string()),
        });
        assert_eq!(record["Key"], Value::from("a.txt"));
        assert_eq!(record["Size"], Value::Integer(3));
        assert_eq!(record["LastModified"], Value::Null);
        assert_eq!(record["ETag"], Value::from("abc"));
    }
}
