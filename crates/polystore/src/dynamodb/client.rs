//! DynamoDB JSON API transport.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use polystore_common::config::HttpConfig;
use polystore_common::{BackendError, Error, Result};

use crate::aws::sigv4::payload_sha256;
use crate::aws::Signer;

pub(crate) const SERVICE: &str = "dynamodb";

/// Issues DynamoDB JSON API operations (`GetItem`, `Query`, ...).
#[async_trait]
pub trait DynamoDbApi: Send + Sync {
    /// Call `operation` with a JSON request body and return the JSON response.
    async fn call(&self, operation: &str, request: JsonValue) -> Result<JsonValue>;
}

/// DynamoDB client over HTTPS with SigV4 signing
pub struct HttpDynamoDbClient {
    http: reqwest::Client,
    endpoint: Url,
    signer: Signer,
}

impl HttpDynamoDbClient {
    /// Create a client; `endpoint` defaults to the regional AWS endpoint.
    pub fn new(signer: Signer, endpoint: Option<&str>, http_config: &HttpConfig) -> Result<Self> {
        let endpoint = match endpoint {
            Some(e) => e.to_string(),
            None => format!("https://dynamodb.{}.amazonaws.com/", signer.region()),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::invalid(format!("Invalid DynamoDB endpoint {endpoint}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(http_config.timeout_secs))
            .user_agent(http_config.user_agent.clone())
            .build()
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            signer,
        })
    }
}

#[async_trait]
impl DynamoDbApi for HttpDynamoDbClient {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    async fn call(&self, operation: &str, request: JsonValue) -> Result<JsonValue> {
        let body = serde_json::to_vec(&request)?;
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host_header(&self.endpoint));
        headers.insert("content-type".to_string(), "application/x-amz-json-1.0".to_string());
        headers.insert(
            "x-amz-target".to_string(),
            format!("DynamoDB_20120810.{operation}"),
        );
        let authorization = self.signer.sign(
            "POST",
            &self.endpoint,
            &mut headers,
            &payload_sha256(&body),
            Utc::now(),
        );

        let mut builder = self.http.post(self.endpoint.clone()).body(body);
        for (name, value) in &headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        let response = builder
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        debug!(operation, status = status.as_u16(), bytes = bytes.len(), "DynamoDB response");

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &bytes).into());
        }
        if bytes.is_empty() {
            return Ok(JsonValue::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::protocol(SERVICE, format!("invalid JSON response: {e}")).into())
    }
}

/// `host[:port]` as sent in the Host header
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Map a DynamoDB error body (`{"__type": "...#Code", "message": "..."}`)
fn error_from_body(status: u16, body: &[u8]) -> BackendError {
    let parsed: JsonValue = serde_json::from_slice(body).unwrap_or(JsonValue::Null);
    let code = parsed
        .get("__type")
        .and_then(JsonValue::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(JsonValue::as_str)
        .map_or_else(|| String::from_utf8_lossy(body).into_owned(), String::from);
    BackendError::Http {
        service: SERVICE,
        status,
        code,
        message,
    }
}
