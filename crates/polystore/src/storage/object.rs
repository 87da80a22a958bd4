//! In-memory object store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use polystore_common::{BackendError, Result};

use crate::s3::client::SERVICE;
use crate::s3::{ObjectListing, ObjectStoreApi, ObjectSummary, PutObjectOptions};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    options: PutObjectOptions,
    last_modified: DateTime<Utc>,
    etag: String,
}

type Bucket = RwLock<BTreeMap<String, StoredObject>>;

/// Bucket/key store with S3 listing, range and copy behaviour
pub struct MemoryObjectStore {
    buckets: DashMap<String, Arc<Bucket>>,
    page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            page_size: 1000,
        }
    }

    #[must_use]
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets.insert(bucket.to_string(), Arc::default());
        self
    }

    /// Maximum keys returned per listing page
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Options an object was stored with
    pub fn object_options(&self, bucket: &str, key: &str) -> Option<PutObjectOptions> {
        let bucket = self.buckets.get(bucket)?;
        let objects = bucket.read();
        objects.get(key).map(|o| o.options.clone())
    }

    fn bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        self.buckets
            .get(name)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| error(404, "NoSuchBucket", "The specified bucket does not exist").into())
    }
}

fn error(status: u16, code: &str, message: &str) -> BackendError {
    BackendError::Http {
        service: SERVICE,
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

fn etag(body: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(body));
    format!("\"{}\"", &digest[..32])
}

#[async_trait]
impl ObjectStoreApi for MemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str, range: Option<(u64, u64)>) -> Result<Option<Bytes>> {
        let bucket = self.bucket(bucket)?;
        let objects = bucket.read();
        let Some(object) = objects.get(key) else {
            return Ok(None);
        };
        let Some((first, last)) = range else {
            return Ok(Some(object.body.clone()));
        };
        let len = object.body.len() as u64;
        if first >= len || first > last {
            return Err(error(416, "InvalidRange", "The requested range is not satisfiable").into());
        }
        let end = last.min(len - 1);
        // Both bounds are below `len`, which came from a usize.
        #[allow(clippy::cast_possible_truncation)]
        let slice = object.body.slice(first as usize..=end as usize);
        Ok(Some(slice))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, options: &PutObjectOptions) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        debug!(key, bytes = body.len(), "memory put_object");
        let object = StoredObject {
            etag: etag(&body),
            body,
            options: options.clone(),
            last_modified: Utc::now(),
        };
        bucket.write().insert(key.to_string(), object);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        // Deleting a missing key succeeds, as on S3.
        self.bucket(bucket)?.write().remove(key);
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.bucket(bucket)?.read().contains_key(key))
    }

    async fn copy_object(&self, bucket: &str, source: &str, destination: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        let mut objects = bucket.write();
        let mut object = objects
            .get(source)
            .cloned()
            .ok_or_else(|| error(404, "NoSuchKey", "The specified key does not exist."))?;
        object.last_modified = Utc::now();
        objects.insert(destination.to_string(), object);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>, continuation: Option<&str>) -> Result<ObjectListing> {
        let bucket = self.bucket(bucket)?;
        let objects = bucket.read();
        let prefix = prefix.unwrap_or_default();

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |after| key.as_str() > after))
            .peekable();
        let mut listing = ObjectListing::default();
        while listing.objects.len() < self.page_size {
            let Some((key, object)) = matching.next() else {
                break;
            };
            listing.objects.push(ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true)),
                etag: Some(object.etag.clone()),
            });
        }
        if matching.peek().is_some() {
            listing.next_token = listing.objects.last().map(|o| o.key.clone());
        }
        Ok(listing)
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.contains_key(bucket) {
            return Err(error(409, "BucketAlreadyOwnedByYou", "Your previous request to create the named bucket succeeded and you already own it.").into());
        }
        self.buckets.insert(bucket.to_string(), Arc::default());
        Ok(())
    }
}
