//! Scheme-based driver lookup.
//!
//! Key-value and document drivers are kept in separate tables, so a
//! connection string can only ever resolve to the capability it was asked
//! for.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, info};

use polystore_common::{Config, Error, Result};

use crate::cloudflare::CloudflareKvConnector;
use crate::connection::ConnectionString;
use crate::core::{DocumentStore, KeyValueStore};
use crate::dynamodb::DynamoDbConnector;
use crate::mongodb::MongoDbConnector;
use crate::s3::S3Connector;

/// Opens key-value drivers for the schemes it declares
#[async_trait]
pub trait KeyValueConnector: Send + Sync {
    fn schemes(&self) -> &'static [&'static str];

    async fn connect(&self, conn: &ConnectionString, config: &Config) -> Result<Arc<dyn KeyValueStore>>;
}

/// Opens document drivers for the schemes it declares
#[async_trait]
pub trait DocumentConnector: Send + Sync {
    fn schemes(&self) -> &'static [&'static str];

    async fn connect(&self, conn: &ConnectionString, config: &Config) -> Result<Arc<dyn DocumentStore>>;
}

/// Scheme to connector tables
#[derive(Default)]
pub struct DriverRegistry {
    key_value: DashMap<String, Arc<dyn KeyValueConnector>>,
    document: DashMap<String, Arc<dyn DocumentConnector>>,
}

static SHARED: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::with_defaults);

impl DriverRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in driver registered
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let builtin: [Arc<dyn KeyValueConnector>; 3] = [
            Arc::new(S3Connector),
            Arc::new(DynamoDbConnector),
            Arc::new(CloudflareKvConnector),
        ];
        for connector in builtin {
            // Built-in scheme lists are never empty.
            let _ = registry.register_key_value(connector);
        }
        let _ = registry.register_document(Arc::new(MongoDbConnector));
        registry
    }

    /// Process-wide registry holding the built-in drivers
    pub fn shared() -> &'static DriverRegistry {
        &SHARED
    }

    /// Register a key-value connector under each of its schemes, replacing
    /// earlier registrations of the same scheme.
    pub fn register_key_value(&self, connector: Arc<dyn KeyValueConnector>) -> Result<()> {
        let schemes = checked_schemes(connector.schemes())?;
        for scheme in schemes {
            debug!(scheme, "registering key-value driver");
            self.key_value.insert(scheme.to_ascii_lowercase(), Arc::clone(&connector));
        }
        Ok(())
    }

    /// Register a document connector under each of its schemes
    pub fn register_document(&self, connector: Arc<dyn DocumentConnector>) -> Result<()> {
        let schemes = checked_schemes(connector.schemes())?;
        for scheme in schemes {
            debug!(scheme, "registering document driver");
            self.document.insert(scheme.to_ascii_lowercase(), Arc::clone(&connector));
        }
        Ok(())
    }

    /// Registered key-value schemes, sorted
    #[must_use]
    pub fn key_value_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.key_value.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        schemes
    }

    /// Registered document schemes, sorted
    #[must_use]
    pub fn document_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.document.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        schemes
    }

    /// Open a key-value driver for `uri`
    pub async fn open_key_value(&self, uri: &str, config: &Config) -> Result<Arc<dyn KeyValueStore>> {
        let conn = ConnectionString::parse(uri)?;
        let connector = self
            .key_value
            .get(&conn.scheme)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| unknown_scheme(&conn.scheme, "key-value"))?;
        info!(scheme = %conn.scheme, host = %conn.host, "opening key-value driver");
        connector.connect(&conn, config).await
    }

    /// Open a document driver for `uri`
    pub async fn open_document(&self, uri: &str, config: &Config) -> Result<Arc<dyn DocumentStore>> {
        let conn = ConnectionString::parse(uri)?;
        let connector = self
            .document
            .get(&conn.scheme)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| unknown_scheme(&conn.scheme, "document"))?;
        info!(scheme = %conn.scheme, host = %conn.host, "opening document driver");
        connector.connect(&conn, config).await
    }
}

fn checked_schemes(schemes: &'static [&'static str]) -> Result<&'static [&'static str]> {
    if schemes.is_empty() || schemes.iter().any(|s| s.is_empty()) {
        return Err(Error::invalid("a driver must declare at least one non-empty scheme"));
    }
    Ok(schemes)
}

fn unknown_scheme(scheme: &str, kind: &str) -> Error {
    Error::invalid(format!("no {kind} driver registered for scheme '{scheme}'"))
}
