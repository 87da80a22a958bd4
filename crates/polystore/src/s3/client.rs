//! S3 REST transport.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use polystore_common::config::HttpConfig;
use polystore_common::{BackendError, Error, Result};

use super::xml;
use crate::aws::sigv4::payload_sha256;
use crate::aws::Signer;
use crate::connection::percent_encode;
use crate::dynamodb::client::host_header;

pub(crate) const SERVICE: &str = "s3";

/// Headers applied to an uploaded object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    pub acl: Option<String>,
}

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// One page of ListObjectsV2
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub objects: Vec<ObjectSummary>,
    /// Continuation token of the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Object storage operations used by the S3 driver.
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// Object body, or the inclusive byte `range`. `None` when the key is absent.
    async fn get_object(&self, bucket: &str, key: &str, range: Option<(u64, u64)>) -> Result<Option<Bytes>>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, options: &PutObjectOptions) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn copy_object(&self, bucket: &str, source: &str, destination: &str) -> Result<()>;

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>, continuation: Option<&str>) -> Result<ObjectListing>;

    async fn head_bucket(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;
}

/// S3 client over HTTPS with SigV4 signing.
///
/// Virtual-hosted addressing (`bucket.host`) by default; path-style
/// (`host/bucket`) when requested or when talking to a custom endpoint
/// that asks for it.
pub struct HttpObjectStore {
    http: reqwest::Client,
    signer: Signer,
    endpoint: Url,
    path_style: bool,
}

impl HttpObjectStore {
    pub fn new(
        signer: Signer,
        endpoint: Option<&str>,
        path_style: bool,
        accelerate: bool,
        http_config: &HttpConfig,
    ) -> Result<Self> {
        let endpoint = match endpoint {
            Some(e) => e.to_string(),
            None if accelerate => "https://s3-accelerate.amazonaws.com".to_string(),
            None => format!("https://s3.{}.amazonaws.com", signer.region()),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::invalid(format!("Invalid S3 endpoint {endpoint}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(http_config.timeout_secs))
            .user_agent(http_config.user_agent.clone())
            .build()
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        Ok(Self {
            http,
            signer,
            endpoint,
            path_style,
        })
    }

    /// URL of `key` in `bucket` (bucket root when `key` is empty)
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let scheme = self.endpoint.scheme();
        let authority = host_header(&self.endpoint);
        let base = self.endpoint.path().trim_end_matches('/');
        let key = percent_encode(key, true);
        let url = if self.path_style {
            format!("{scheme}://{authority}{base}/{bucket}/{key}")
        } else {
            format!("{scheme}://{bucket}.{authority}{base}/{key}")
        };
        Url::parse(&url).map_err(|e| Error::invalid(format!("Invalid S3 object URL {url}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        mut headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let payload_hash = payload_sha256(&body);
        headers.insert("host".to_string(), host_header(&url));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        let authorization = self
            .signer
            .sign(method.as_str(), &url, &mut headers, &payload_hash, Utc::now());

        let mut builder = self.http.request(method.clone(), url.clone());
        for (name, value) in &headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        let response = builder
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        debug!(%method, %url, status = response.status().as_u16(), "S3 response");
        Ok(response)
    }

    async fn expect_success(response: reqwest::Response) -> Result<Bytes> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(error_from_body(status.as_u16(), &body).into())
        }
    }
}

#[async_trait]
impl ObjectStoreApi for HttpObjectStore {
    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str, range: Option<(u64, u64)>) -> Result<Option<Bytes>> {
        let mut headers = BTreeMap::new();
        if let Some((first, last)) = range {
            headers.insert("range".to_string(), format!("bytes={first}-{last}"));
        }
        let url = self.object_url(bucket, key)?;
        let response = self.send(Method::GET, url, headers, Bytes::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_success(response).await.map(Some)
    }

    #[instrument(skip(self, body), fields(bytes = body.len()))]
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, options: &PutObjectOptions) -> Result<()> {
        let mut headers = BTreeMap::new();
        if let Some(acl) = &options.acl {
            headers.insert("x-amz-acl".to_string(), acl.clone());
        }
        if let Some(content_type) = &options.content_type {
            headers.insert("content-type".to_string(), content_type.clone());
        }
        let url = self.object_url(bucket, key)?;
        let response = self.send(Method::PUT, url, headers, body).await?;
        Self::expect_success(response).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key)?;
        let response = self.send(Method::DELETE, url, BTreeMap::new(), Bytes::new()).await?;
        Self::expect_success(response).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool> {
        let url = self.object_url(bucket, key)?;
        let response = self.send(Method::HEAD, url, BTreeMap::new(), Bytes::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(error_from_body(status.as_u16(), &[]).into()),
        }
    }

    #[instrument(skip(self))]
    async fn copy_object(&self, bucket: &str, source: &str, destination: &str) -> Result<()> {
        let mut headers = BTreeMap::new();
        headers.insert(
            "x-amz-copy-source".to_string(),
            format!("/{bucket}/{}", percent_encode(source, true)),
        );
        let url = self.object_url(bucket, destination)?;
        let response = self.send(Method::PUT, url, headers, Bytes::new()).await?;
        let body = Self::expect_success(response).await?;
        // CopyObject can fail with a 200 status and an <Error> body.
        let text = String::from_utf8_lossy(&body);
        if text.contains("<Error>") {
            return Err(error_from_body(200, &body).into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>, continuation: Option<&str>) -> Result<ObjectListing> {
        let mut url = self.object_url(bucket, "")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = continuation {
                query.append_pair("continuation-token", token);
            }
        }
        let response = self.send(Method::GET, url, BTreeMap::new(), Bytes::new()).await?;
        let body = Self::expect_success(response).await?;
        let text = std::str::from_utf8(&body)
            .map_err(|e| BackendError::protocol(SERVICE, format!("listing is not UTF-8: {e}")))?;
        Ok(parse_listing(text))
    }

    #[instrument(skip(self))]
    async fn head_bucket(&self, bucket: &str) -> Result<bool> {
        let url = self.object_url(bucket, "")?;
        let response = self.send(Method::HEAD, url, BTreeMap::new(), Bytes::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(error_from_body(status.as_u16(), &[]).into()),
        }
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let region = self.signer.region();
        let body = if region == "us-east-1" {
            Bytes::new()
        } else {
            Bytes::from(format!(
                "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                xml::escape(region)
            ))
        };
        let url = self.object_url(bucket, "")?;
        let response = self.send(Method::PUT, url, BTreeMap::new(), body).await?;
        Self::expect_success(response).await.map(|_| ())
    }
}

/// Parse a ListObjectsV2 response body
pub(crate) fn parse_listing(body: &str) -> ObjectListing {
    let objects = xml::elements(body, "Contents")
        .into_iter()
        .filter_map(|entry| {
            Some(ObjectSummary {
                key: xml::text(entry, "Key")?,
                size: xml::text(entry, "Size")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                last_modified: xml::text(entry, "LastModified"),
                etag: xml::text(entry, "ETag").map(|e| e.trim_matches('"').to_string()),
            })
        })
        .collect();
    let truncated = xml::text(body, "IsTruncated").is_some_and(|t| t == "true");
    ObjectListing {
        objects,
        next_token: xml::text(body, "NextContinuationToken").filter(|_| truncated),
    }
}

/// Map an S3 `<Error><Code/><Message/></Error>` body
fn error_from_body(status: u16, body: &[u8]) -> BackendError {
    let text = String::from_utf8_lossy(body);
    let code = xml::text(&text, "Code");
    let message = xml::text(&text, "Message").unwrap_or_else(|| {
        if text.is_empty() {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_string()
        } else {
            text.into_owned()
        }
    });
    BackendError::Http {
        service: SERVICE,
        status,
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsCredentials;

    fn store(endpoint: Option<&str>, path_style: bool) -> HttpObjectStore {
        let signer = Signer::new(AwsCredentials::new("AKID", "secret"), "eu-west-1", SERVICE);
        HttpObjectStore::new(signer, endpoint, path_style, false, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_virtual_hosted_url() {
        let url = store(None, false).object_url("photos", "2024/cat 1.png").unwrap();
        assert_eq!(
            url.as_str(),
            "https://photos.s3.eu-west-1.amazonaws.com/2024/cat%201.png"
        );
    }

    #[test]
    fn test_path_style_url() {
        let url = store(Some("http://localhost:9000"), true)
            .object_url("photos", "a.txt")
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/photos/a.txt");
    }

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing(
            r#"<ListBucketResult><IsTruncated>true</IsTruncated>
            <Contents><Key>a.txt</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>&quot;abc&quot;</ETag><Size>3</Size></Contents>
            <NextContinuationToken>next</NextContinuationToken></ListBucketResult>"#,
        );
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(listing.objects[0].key, "a.txt");
        assert_eq!(listing.objects[0].size, 3);
        assert_eq!(listing.objects[0].etag.as_deref(), Some("abc"));
        assert_eq!(listing.next_token.as_deref(), Some("next"));
    }

    #[test]
    fn test_error_from_body() {
        let err = error_from_body(
            403,
            b"<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
        );
        match err {
            BackendError::Http { status, code, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("AccessDenied"));
                assert_eq!(message, "Access Denied");
            }
            _ => panic!("Expected HTTP error"),
        }
        assert!(error_from_body(404, b"").to_string().contains("Not Found"));
    }
}
