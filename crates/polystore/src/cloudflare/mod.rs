//! Cloudflare Workers KV driver
//!
//! Connection string: `kv://email:api_key@account_id/namespace_id`, or
//! `kv://:api_token@account_id/namespace_id` for a scoped token.
//!
//! Listing returns one page of keys; the cursor of the next page is kept
//! and exposed through [`CloudflareKvDriver::last_cursor`].

pub mod client;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument};

use polystore_common::metrics::{record_items_decoded, OperationTimer};
use polystore_common::{Config, Error, Result};

use crate::connection::ConnectionString;
use crate::core::{Capabilities, KeyValueEntry, KeyValueStore, Record, RecordStream, Value};
use crate::options::KeyValueOptions;
use crate::registry::KeyValueConnector;

pub use client::{BulkEntry, HttpKvClient, KeyInfo, KeyPage, KvApi, KvAuth, ListParams, WriteParams};
use client::SERVICE;

/// Key-value driver backed by one Workers KV namespace
pub struct CloudflareKvDriver {
    client: Arc<dyn KvApi>,
    last_cursor: Arc<Mutex<Option<String>>>,
}

impl CloudflareKvDriver {
    pub fn new(client: Arc<dyn KvApi>) -> Self {
        Self {
            client,
            last_cursor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_connection(conn: &ConnectionString, config: &Config) -> Result<Self> {
        let auth = match (&conn.username, &conn.password) {
            (Some(email), Some(key)) => KvAuth::ApiKey {
                email: email.clone(),
                key: key.clone(),
            },
            (None, Some(token)) => KvAuth::Bearer(token.clone()),
            _ => {
                return Err(Error::invalid(
                    "Workers KV requires credentials (kv://email:key@account/namespace)",
                ))
            }
        };
        let endpoint = conn.param_str("endpoint");
        let client = HttpKvClient::new(&conn.host, &conn.path, auth, endpoint.as_deref(), &config.http)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// Cursor returned by the most recent listing, `None` when that listing
    /// reached the end (or nothing was listed yet).
    ///
    /// Shared by every caller of this driver: with interleaved listings the
    /// value belongs to whichever finished last.
    #[must_use]
    pub fn last_cursor(&self) -> Option<String> {
        self.last_cursor.lock().clone()
    }

    fn write_params(options: &KeyValueOptions) -> WriteParams {
        WriteParams {
            expiration: options.extra_u64("expiration"),
            expiration_ttl: options.extra_u64("expiration_ttl"),
        }
    }

    fn bulk_entry(entry: KeyValueEntry, params: WriteParams) -> Result<BulkEntry> {
        let (value, base64) = match entry.value {
            Value::String(s) => (s, false),
            Value::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => (s, false),
                Err(e) => (BASE64.encode(e.into_bytes()), true),
            },
            other => (serde_json::to_string(&other)?, false),
        };
        Ok(BulkEntry {
            key: entry.key.to_plain_string(),
            value,
            base64,
            expiration: params.expiration,
            expiration_ttl: params.expiration_ttl,
        })
    }
}

fn key_record(info: KeyInfo) -> Record {
    let mut record = Record::new();
    record.insert("name".to_string(), Value::String(info.name));
    if let Some(expiration) = info.expiration {
        record.insert(
            "expiration".to_string(),
            Value::Integer(i64::try_from(expiration).unwrap_or(i64::MAX)),
        );
    }
    if let Some(metadata) = info.metadata {
        record.insert("metadata".to_string(), Value::from(metadata));
    }
    record
}

#[async_trait]
impl KeyValueStore for CloudflareKvDriver {
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
            rename: false,
            chunk_read: false,
        }
    }

    #[instrument(skip(self, _options))]
    async fn get(&self, key: &Value, _options: &KeyValueOptions) -> Result<Option<Value>> {
        let timer = OperationTimer::start(SERVICE, "get");
        let body = timer.finish(self.client.get_value(&key.to_plain_string()).await)?;
        Ok(body.map(Value::from_body))
    }

    #[instrument(skip(self, value, options))]
    async fn put(&self, key: &Value, value: Value, options: &KeyValueOptions) -> Result<()> {
        let body = value.to_body()?;
        let timer = OperationTimer::start(SERVICE, "put");
        timer.finish(
            self.client
                .put_value(&key.to_plain_string(), body, Self::write_params(options))
                .await,
        )
    }

    #[instrument(skip(self, _options))]
    async fn remove(&self, key: &Value, _options: &KeyValueOptions) -> Result<()> {
        let timer = OperationTimer::start(SERVICE, "remove");
        timer.finish(self.client.delete_value(&key.to_plain_string()).await)
    }

    /// One page of keys under `prefix`, starting at the `cursor` option.
    fn iter(&self, options: &KeyValueOptions) -> Result<RecordStream> {
        let params = ListParams {
            prefix: options.prefix.clone().filter(|p| !p.is_empty()),
            cursor: options.extra_str("cursor").map(String::from),
            limit: options.extra_u64("limit"),
        };
        let client = Arc::clone(&self.client);
        let last_cursor = Arc::clone(&self.last_cursor);
        debug!(?params, "listing keys");

        let page = stream::once(async move {
            let page = client.list_keys(&params).await?;
            record_items_decoded(SERVICE, page.keys.len());
            *last_cursor.lock() = page.cursor;
            let records: Vec<Record> = page.keys.into_iter().map(key_record).collect();
            Ok::<_, Error>(stream::iter(records.into_iter().map(Ok)))
        });
        Ok(page.try_flatten().boxed())
    }

    async fn put_batch(&self, entries: Vec<KeyValueEntry>, options: &KeyValueOptions) -> Result<()> {
        let params = Self::write_params(options);
        let entries = entries
            .into_iter()
            .map(|entry| Self::bulk_entry(entry, params))
            .collect::<Result<Vec<_>>>()?;
        let timer = OperationTimer::start(SERVICE, "put_batch");
        timer.finish(self.client.bulk_put(entries).await)
    }

    async fn remove_batch(&self, keys: Vec<Value>, _options: &KeyValueOptions) -> Result<()> {
        let keys = keys.iter().map(Value::to_plain_string).collect();
        let timer = OperationTimer::start(SERVICE, "remove_batch");
        timer.finish(self.client.bulk_delete(keys).await)
    }
}

/// Registers the `kv` scheme
pub struct CloudflareKvConnector;

#[async_trait]
impl KeyValueConnector for CloudflareKvConnector {
    fn schemes(&self) -> &'static [&'static str] {
        &["kv"]
    }

    async fn connect(&self, conn: &ConnectionString, config: &Config) -> Result<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(CloudflareKvDriver::from_connection(conn, config)?))
    }
}
