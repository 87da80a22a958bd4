//! Configuration management for Polystore

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure for Polystore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP transport configuration shared by the REST drivers
    #[serde(default)]
    pub http: HttpConfig,

    /// MongoDB driver configuration
    #[serde(default)]
    pub mongodb: MongoConfig,

    /// Named connection strings, e.g. `sessions = "dynamodb://..."`
    #[serde(default)]
    pub connections: HashMap<String, String>,
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        let mut config: Config = if path.as_ref().extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {e}")))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {e}")))?
        };

        config.apply_env();
        Ok(config)
    }

    /// Override selected settings from `POLYSTORE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(level) = std::env::var("POLYSTORE_LOG") {
            self.logging.level = level;
        }
        if let Some(secs) = std::env::var("POLYSTORE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.http.timeout_secs = secs;
        }
    }

    /// Resolve either a named connection or a literal connection string
    pub fn connection<'a>(&'a self, name_or_uri: &'a str) -> Result<&'a str> {
        if name_or_uri.contains("://") {
            return Ok(name_or_uri);
        }
        self.connections
            .get(name_or_uri)
            .map(String::as_str)
            .ok_or_else(|| Error::Config(format!("Unknown connection: {name_or_uri}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "polystore=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("polystore/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// Write concern applied to every write
    pub write_concern: String,
    /// Write concern timeout in milliseconds
    pub wtimeout_ms: i64,
    /// Port used when the connection string has none
    pub default_port: u16,
    /// Database used for authentication when `uri.authSource` is absent
    pub auth_source: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            write_concern: "majority".to_string(),
            wtimeout_ms: 100,
            default_port: 27017,
            auth_source: "admin".to_string(),
        }
    }
}
