//! In-memory Workers KV namespace

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use polystore_common::{BackendError, Result};

use crate::cloudflare::client::SERVICE;
use crate::cloudflare::{BulkEntry, KeyInfo, KeyPage, KvApi, ListParams, WriteParams};

/// Largest page a listing returns
pub const MAX_LIST_LIMIT: u64 = 1000;
/// Largest bulk write or delete accepted
pub const MAX_BULK: usize = 10_000;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expiration: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        self.expiration.map_or(true, |at| at > now)
    }
}

/// Namespace with cursor listings and lazy expiry
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn bad_request(message: impl Into<String>) -> BackendError {
    BackendError::Http {
        service: SERVICE,
        status: 400,
        code: None,
        message: message.into(),
    }
}

fn checked_key(key: &str) -> Result<&str> {
    if key.is_empty() {
        return Err(bad_request("key names cannot be empty").into());
    }
    Ok(key)
}

fn expires_at(params: WriteParams) -> Option<u64> {
    params
        .expiration
        .or_else(|| params.expiration_ttl.map(|ttl| now().saturating_add(ttl)))
}

#[async_trait]
impl KvApi for MemoryKv {
    async fn get_value(&self, key: &str) -> Result<Option<Bytes>> {
        let now = now();
        let entries = self.entries.read();
        Ok(entries
            .get(checked_key(key)?)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn put_value(&self, key: &str, value: Bytes, params: WriteParams) -> Result<()> {
        let key = checked_key(key)?;
        debug!(key, bytes = value.len(), "memory KV put");
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value,
                expiration: expires_at(params),
            },
        );
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        self.entries.write().remove(checked_key(key)?);
        Ok(())
    }

    async fn bulk_put(&self, entries: Vec<BulkEntry>) -> Result<()> {
        if entries.len() > MAX_BULK {
            return Err(bad_request(format!("at most {MAX_BULK} pairs per bulk write")).into());
        }
        let mut decoded = Vec::with_capacity(entries.len());
        for entry in entries {
            checked_key(&entry.key)?;
            let value = if entry.base64 {
                BASE64
                    .decode(entry.value.as_bytes())
                    .map_err(|e| bad_request(format!("invalid base64 value for {}: {e}", entry.key)))?
            } else {
                entry.value.into_bytes()
            };
            let expiration = expires_at(WriteParams {
                expiration: entry.expiration,
                expiration_ttl: entry.expiration_ttl,
            });
            decoded.push((entry.key, Entry { value: Bytes::from(value), expiration }));
        }
        // Validate everything before writing anything.
        self.entries.write().extend(decoded);
        Ok(())
    }

    async fn bulk_delete(&self, keys: Vec<String>) -> Result<()> {
        if keys.len() > MAX_BULK {
            return Err(bad_request(format!("at most {MAX_BULK} keys per bulk delete")).into());
        }
        let mut entries = self.entries.write();
        for key in &keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, params: &ListParams) -> Result<KeyPage> {
        let limit = params.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let after = match &params.cursor {
            Some(cursor) => {
                let raw = BASE64
                    .decode(cursor.as_bytes())
                    .map_err(|_| bad_request("invalid list cursor"))?;
                Some(String::from_utf8(raw).map_err(|_| bad_request("invalid list cursor"))?)
            }
            None => None,
        };
        let prefix = params.prefix.as_deref().unwrap_or_default();
        let now = now();

        let entries = self.entries.read();
        let mut live = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .filter(|(key, _)| after.as_ref().map_or(true, |after| *key > after))
            .peekable();
        let mut page = KeyPage::default();
        while (page.keys.len() as u64) < limit {
            let Some((key, entry)) = live.next() else {
                break;
            };
            page.keys.push(KeyInfo {
                name: key.clone(),
                expiration: entry.expiration,
                metadata: None,
            });
        }
        if live.peek().is_some() {
            page.cursor = page.keys.last().map(|k| BASE64.encode(k.name.as_bytes()));
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_values_are_hidden() {
        let kv = MemoryKv::new();
        kv.put_value("old", Bytes::from_static(b"x"), WriteParams { expiration: Some(1), expiration_ttl: None })
            .await
            .unwrap();
        kv.put_value("new", Bytes::from_static(b"y"), WriteParams { expiration: None, expiration_ttl: Some(3600) })
            .await
            .unwrap();
        assert!(kv.get_value("old").await.unwrap().is_none());
        assert_eq!(kv.get_value("new").await.unwrap().unwrap(), Bytes::from_static(b"y"));
        let page = kv.list_keys(&ListParams::default()).await.unwrap();
        assert_eq!(page.keys.len(), 1);
        assert!(page.keys[0].expiration.is_some());
    }

    #[tokio::test]
    async fn test_cursor_listing() {
        let kv = MemoryKv::new();
        for key in ["a:1", "a:2", "a:3", "b:1"] {
            kv.put_value(key, Bytes::from_static(b"v"), WriteParams::default())
                .await
                .unwrap();
        }
        let params = ListParams {
            prefix: Some("a:".into()),
            cursor: None,
            limit: Some(2),
        };
        let first = kv.list_keys(&params).await.unwrap();
        assert_eq!(first.keys.len(), 2);
        let cursor = first.cursor.unwrap();

        let second = kv
            .list_keys(&ListParams { cursor: Some(cursor), ..params })
            .await
            .unwrap();
        assert_eq!(second.keys.len(), 1);
        assert_eq!(second.keys[0].name, "a:3");
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_bulk_put_base64() {
        let kv = MemoryKv::new();
        kv.bulk_put(vec![BulkEntry {
            key: "bin".into(),
            value: BASE64.encode([0xff, 0x00]),
            base64: true,
            expiration: None,
            expiration_ttl: None,
        }])
        .await
        .unwrap();
        assert_eq!(&kv.get_value("bin").await.unwrap().unwrap()[..], &[0xff, 0x00]);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let kv = MemoryKv::new();
        assert!(kv.get_value("").await.is_err());
        assert!(kv.is_empty());
    }
}
