//! Workers KV REST transport.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, instrument};

use polystore_common::config::HttpConfig;
use polystore_common::{BackendError, Error, Result};

use crate::connection::percent_encode;

pub(crate) const SERVICE: &str = "cloudflare-kv";

/// Default API root
pub const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Expiry applied to a written value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteParams {
    /// Absolute expiry, seconds since the epoch
    pub expiration: Option<u64>,
    /// Relative expiry in seconds
    pub expiration_ttl: Option<u64>,
}

/// One pair of a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEntry {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub base64: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_ttl: Option<u64>,
}

/// Listing parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

/// Key metadata returned by a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

/// One page of keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPage {
    pub keys: Vec<KeyInfo>,
    /// Cursor of the next page; `None` once the listing is complete
    pub cursor: Option<String>,
}

/// Namespace operations of the Workers KV API
#[async_trait]
pub trait KvApi: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<Bytes>>;

    async fn put_value(&self, key: &str, value: Bytes, params: WriteParams) -> Result<()>;

    async fn delete_value(&self, key: &str) -> Result<()>;

    async fn bulk_put(&self, entries: Vec<BulkEntry>) -> Result<()>;

    async fn bulk_delete(&self, keys: Vec<String>) -> Result<()>;

    async fn list_keys(&self, params: &ListParams) -> Result<KeyPage>;
}

/// How requests authenticate
#[derive(Clone)]
pub enum KvAuth {
    /// Global API key (`X-Auth-Email` / `X-Auth-Key`)
    ApiKey { email: String, key: String },
    /// Scoped API token
    Bearer(String),
}

impl std::fmt::Debug for KvAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvAuth::ApiKey { email, .. } => f.debug_struct("ApiKey").field("email", email).finish_non_exhaustive(),
            KvAuth::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// Workers KV client for one namespace
pub struct HttpKvClient {
    http: reqwest::Client,
    namespace_url: String,
    auth: KvAuth,
}

/// Response envelope shared by every JSON endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursor: Option<String>,
}

impl HttpKvClient {
    pub fn new(
        account_id: &str,
        namespace_id: &str,
        auth: KvAuth,
        api_base: Option<&str>,
        http_config: &HttpConfig,
    ) -> Result<Self> {
        if account_id.is_empty() || namespace_id.is_empty() {
            return Err(Error::invalid(
                "Workers KV needs an account id and a namespace id (kv://email:key@account/namespace)",
            ));
        }
        let base = api_base.unwrap_or(API_BASE).trim_end_matches('/');
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(http_config.timeout_secs))
            .user_agent(http_config.user_agent.clone())
            .build()
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        Ok(Self {
            http,
            namespace_url: format!("{base}/accounts/{account_id}/storage/kv/namespaces/{namespace_id}"),
            auth,
        })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{endpoint}", self.namespace_url));
        match &self.auth {
            KvAuth::ApiKey { email, key } => builder
                .header("X-Auth-Email", email.as_str())
                .header("X-Auth-Key", key.as_str()),
            KvAuth::Bearer(token) => builder.bearer_auth(token),
        }
    }

    fn value_path(key: &str) -> String {
        format!("/values/{}", percent_encode(key, false))
    }

    async fn send(builder: RequestBuilder) -> Result<(StatusCode, Bytes)> {
        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        debug!(status = status.as_u16(), bytes = body.len(), "KV response");
        Ok((status, body))
    }

    /// Send and require a successful JSON envelope
    async fn send_checked(builder: RequestBuilder) -> Result<Envelope> {
        let (status, body) = Self::send(builder).await?;
        check_envelope(status.as_u16(), &body)
    }
}

/// Parse the JSON envelope, turning `success: false` into an error whose
/// message lists every `[code] message` pair.
fn check_envelope(status: u16, body: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if (200..300).contains(&status) => {
            return Err(BackendError::protocol(SERVICE, "response is not a JSON envelope").into())
        }
        Err(_) => {
            return Err(BackendError::Http {
                service: SERVICE,
                status,
                code: None,
                message: String::from_utf8_lossy(body).into_owned(),
            }
            .into())
        }
    };
    if envelope.success && (200..300).contains(&status) {
        return Ok(envelope);
    }
    let message = envelope
        .errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("\n");
    Err(BackendError::Http {
        service: SERVICE,
        status,
        code: envelope.errors.first().map(|e| e.code.to_string()),
        message,
    }
    .into())
}

#[async_trait]
impl KvApi for HttpKvClient {
    #[instrument(skip(self))]
    async fn get_value(&self, key: &str) -> Result<Option<Bytes>> {
        let (status, body) = Self::send(self.request(Method::GET, &Self::value_path(key))).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            // Never Ok: the envelope check rejects non-2xx statuses.
            return check_envelope(status.as_u16(), &body).map(|_| None);
        }
        Ok(Some(body))
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn put_value(&self, key: &str, value: Bytes, params: WriteParams) -> Result<()> {
        let mut query = Vec::new();
        if let Some(expiration) = params.expiration {
            query.push(("expiration", expiration));
        }
        if let Some(ttl) = params.expiration_ttl {
            query.push(("expiration_ttl", ttl));
        }
        let builder = self
            .request(Method::PUT, &Self::value_path(key))
            .query(&query)
            .body(value);
        Self::send_checked(builder).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete_value(&self, key: &str) -> Result<()> {
        Self::send_checked(self.request(Method::DELETE, &Self::value_path(key)))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn bulk_put(&self, entries: Vec<BulkEntry>) -> Result<()> {
        Self::send_checked(self.request(Method::PUT, "/bulk").json(&entries))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn bulk_delete(&self, keys: Vec<String>) -> Result<()> {
        Self::send_checked(self.request(Method::DELETE, "/bulk").json(&keys))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, params: &ListParams) -> Result<KeyPage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(prefix) = &params.prefix {
            query.push(("prefix", prefix.clone()));
        }
        if let Some(cursor) = &params.cursor {
            query.push(("cursor", cursor.clone()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        let envelope = Self::send_checked(self.request(Method::GET, "/keys").query(&query)).await?;
        let keys: Vec<KeyInfo> = serde_json::from_value(envelope.result)
            .map_err(|e| BackendError::protocol(SERVICE, format!("invalid key listing: {e}")))?;
        let cursor = envelope
            .result_info
            .and_then(|info| info.cursor)
            .filter(|c| !c.is_empty());
        Ok(KeyPage { keys, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_envelope_success() {
        let envelope = check_envelope(
            200,
            br#"{"success":true,"errors":[],"result":[{"name":"a"}],"result_info":{"cursor":"c1"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.result_info.unwrap().cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn test_check_envelope_errors() {
        let err = check_envelope(
            400,
            br#"{"success":false,"errors":[{"code":10001,"message":"bad key"},{"code":7003,"message":"no route"}]}"#,
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("[10001] bad key"));
        assert!(text.contains("[7003] no route"));
    }

    #[test]
    fn test_check_envelope_not_json() {
        let err = check_envelope(502, b"Bad Gateway").unwrap_err();
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_bulk_entry_serialization() {
        let entry = BulkEntry {
            key: "k".to_string(),
            value: "v".to_string(),
            base64: false,
            expiration: None,
            expiration_ttl: Some(60),
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"key":"k","value":"v","expiration_ttl":60}"#
        );
    }

    #[test]
    fn test_requires_namespace() {
        let auth = KvAuth::Bearer("token".to_string());
        let result = HttpKvClient::new("acct", "", auth, None, &HttpConfig::default());
        assert!(result.err().unwrap().is_invalid_argument());
    }

    #[test]
    fn test_auth_debug_hides_key() {
        let auth = KvAuth::ApiKey {
            email: "a@b.c".to_string(),
            key: "secret".to_string(),
        };
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
