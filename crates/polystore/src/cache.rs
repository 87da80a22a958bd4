//! Cache engine over any [`KeyValueStore`].
//!
//! Values are stored as JSON text. An entry with a TTL gets a sibling
//! `"{key}.ttl"` entry holding its expiry in Unix seconds; expired entries
//! are deleted lazily the next time they are looked at.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use polystore_common::metrics::{record_cache_access, record_cache_expiry};
use polystore_common::{Error, Result};

use crate::core::{KeyValueStore, Value};
use crate::options::KeyValueOptions;

/// Suffix of the sibling entry holding an expiry
pub const TTL_SUFFIX: &str = ".ttl";

/// Key of the expiry entry for `key`
#[must_use]
pub fn ttl_key(key: &str) -> String {
    format!("{key}{TTL_SUFFIX}")
}

/// Cache over a key-value store.
///
/// The store must accept string values (S3, Workers KV). `has` followed by
/// `get` is not atomic.
pub struct KeyValueCache {
    store: Arc<dyn KeyValueStore>,
    options: KeyValueOptions,
    default_ttl: Option<Duration>,
}

impl KeyValueCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            options: KeyValueOptions::default(),
            default_ttl: None,
        }
    }

    /// Options passed to every store call
    #[must_use]
    pub fn with_options(mut self, options: KeyValueOptions) -> Self {
        self.options = options;
        self
    }

    /// TTL applied by [`set`](Self::set) when none is given
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl).filter(|t| !t.is_zero());
        self
    }

    /// True when `key` holds a value that has not expired.
    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.lookup(key).await?.is_some())
    }

    /// Cached value of `key`, `None` when missing or expired.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.lookup(key).await? else {
            debug!(key, "cache miss");
            record_cache_access(false);
            return Ok(None);
        };
        debug!(key, "cache hit");
        record_cache_access(true);
        decode(value).map(Some)
    }

    /// Stored value of `key`, deleting it first when its expiry has passed.
    async fn lookup(&self, key: &str) -> Result<Option<Value>> {
        let Some(value) = self.store.get(&Value::from(key), &self.options).await? else {
            return Ok(None);
        };
        let expiry = self
            .store
            .get(&Value::from(ttl_key(key)), &self.options)
            .await?
            .and_then(|v| parse_expiry(&v));
        match expiry {
            Some(expires_at) if Utc::now().timestamp() >= expires_at => {
                info!(key, expires_at, "cache entry expired");
                record_cache_expiry();
                self.delete(key).await?;
                Ok(None)
            }
            _ => Ok(Some(value)),
        }
    }

    /// Store `value` under `key`; `ttl` (or the default TTL) bounds its life.
    ///
    /// A zero TTL means no expiry.
    pub async fn set<T: Serialize + ?Sized + Sync>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.store
            .put(&Value::from(key), Value::String(text), &self.options)
            .await?;

        let ttl_entry = Value::from(ttl_key(key));
        match ttl.filter(|t| !t.is_zero()).or(self.default_ttl) {
            Some(ttl) => {
                let seconds = i64::try_from(ttl.as_secs())
                    .map_err(|_| Error::invalid("cache TTL out of range"))?;
                let expires_at = Utc::now().timestamp().saturating_add(seconds);
                debug!(key, expires_at, "cache set with expiry");
                self.store
                    .put(&ttl_entry, Value::String(expires_at.to_string()), &self.options)
                    .await
            }
            // Drop any expiry left over from an earlier set.
            None => self.store.remove(&ttl_entry, &self.options).await,
        }
    }

    /// Remove `key` and its expiry entry
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(&Value::from(key), &self.options).await?;
        self.store
            .remove(&Value::from(ttl_key(key)), &self.options)
            .await
    }

    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, Option<T>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            found.insert((*key).to_string(), self.get(key).await?);
        }
        Ok(found)
    }

    pub async fn set_many<T: Serialize + Sync>(&self, entries: &[(&str, T)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    pub async fn delete_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

fn parse_expiry(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(match value {
        Value::String(text) => serde_json::from_str(&text)?,
        Value::Bytes(bytes) => serde_json::from_slice(&bytes)?,
        other => serde_json::from_value(serde_json::Value::from(other))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_key() {
        assert_eq!(ttl_key("session"), "session.ttl");
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry(&Value::from("1700000000")), Some(1_700_000_000));
        assert_eq!(parse_expiry(&Value::Integer(5)), Some(5));
        assert_eq!(parse_expiry(&Value::Bytes(b"42\n".to_vec())), Some(42));
        assert_eq!(parse_expiry(&Value::from("soon")), None);
    }

    #[test]
    fn test_decode() {
        let n: i64 = decode(Value::from("42")).unwrap();
        assert_eq!(n, 42);
        let s: String = decode(Value::Bytes(br#""hi""#.to_vec())).unwrap();
        assert_eq!(s, "hi");
        let list: Vec<i64> = decode(Value::from(vec![1, 2])).unwrap();
        assert_eq!(list, vec![1, 2]);
    }
}
