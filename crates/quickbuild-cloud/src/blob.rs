//! Blob storage access through SAS-authorized URLs
//!
//! The build service hands out blob URLs carrying a short-lived SAS token in
//! their query string. [`BlobLocation`] decomposes such a URL, and
//! [`SasBlobClient`] writes and reads blobs with it.

use crate::error::{CloudError, Result};
use crate::retry::{RetryConfig, with_retry};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Storage REST API version sent with every request
const STORAGE_API_VERSION: &str = "2018-03-28";

/// Byte chunks of a blob, in order
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Storage coordinates decomposed from a SAS blob URL
#[derive(Clone, PartialEq, Eq)]
pub struct BlobLocation {
    host: String,
    container_name: String,
    blob_name: String,
    sas_token: String,
}

impl BlobLocation {
    /// Decompose `https://{account}.blob.{suffix}/{container}/{blob...}?{sas}`
    pub fn parse(blob_url: &str) -> Result<Self> {
        let url = Url::parse(blob_url)
            .map_err(|e| CloudError::InvalidUrl(format!("{}: {}", crate::redact_url(blob_url), e)))?;

        let host_name = url
            .host_str()
            .ok_or_else(|| CloudError::InvalidUrl("blob URL has no host".to_string()))?;
        let host = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host_name, port),
            None => format!("{}://{}", url.scheme(), host_name),
        };

        let path = url.path().trim_start_matches('/');
        let (container_name, blob_name) = path.split_once('/').ok_or_else(|| {
            CloudError::InvalidUrl(format!(
                "blob URL has no container/blob path: {}",
                crate::redact_url(blob_url)
            ))
        })?;
        if container_name.is_empty() || blob_name.is_empty() {
            return Err(CloudError::InvalidUrl(format!(
                "blob URL has an empty container or blob name: {}",
                crate::redact_url(blob_url)
            )));
        }

        let sas_token = url.query().unwrap_or_default();
        if sas_token.is_empty() {
            return Err(CloudError::InvalidUrl(
                "blob URL carries no SAS token".to_string(),
            ));
        }

        Ok(Self {
            host,
            container_name: container_name.to_string(),
            blob_name: blob_name.to_string(),
            sas_token: sas_token.to_string(),
        })
    }

    /// Scheme and authority, e.g. `https://acct.blob.core.windows.net`
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Blob name, still percent-encoded as it appeared in the URL
    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    pub fn sas_token(&self) -> &str {
        &self.sas_token
    }

    /// Storage account, for hosts shaped `{account}.blob.{suffix}`
    pub fn account_name(&self) -> Option<&str> {
        self.authority()
            .split_once(".blob.")
            .map(|(account, _)| account)
    }

    /// Endpoint suffix, e.g. `core.windows.net`
    pub fn endpoint_suffix(&self) -> Option<&str> {
        self.authority()
            .split_once(".blob.")
            .map(|(_, suffix)| suffix)
    }

    fn authority(&self) -> &str {
        self.host
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.host)
    }

    /// Signed expiry (`se`) of the SAS token
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let (_, value) = url::form_urlencoded::parse(self.sas_token.as_bytes())
            .find(|(key, _)| key == "se")?;

        if let Ok(parsed) = DateTime::parse_from_rfc3339(&value) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Tokens without an `se` parameter are treated as unexpired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| expiry <= now)
    }

    /// Full request URL including the SAS token
    pub fn blob_url(&self) -> String {
        format!(
            "{}/{}/{}?{}",
            self.host, self.container_name, self.blob_name, self.sas_token
        )
    }

    /// URL without the SAS token, safe to log
    pub fn display_url(&self) -> String {
        format!("{}/{}/{}", self.host, self.container_name, self.blob_name)
    }

    fn ensure_unexpired(&self) -> Result<()> {
        match self.expires_at() {
            Some(expiry) if expiry <= Utc::now() => {
                Err(CloudError::TokenExpired(expiry.to_rfc3339()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobLocation")
            .field("host", &self.host)
            .field("container_name", &self.container_name)
            .field("blob_name", &self.blob_name)
            .field("sas_token", &"<redacted>")
            .finish()
    }
}

/// Outcome of a confirmed blob write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobReceipt {
    /// Bytes streamed in the request body the service answered with
    /// `201 Created`
    pub content_length: u64,
    pub etag: Option<String>,
}

/// Blob storage operations used by the build pipeline
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write the file at `source` as a block blob and wait for the service
    /// to acknowledge it
    async fn write_blob(&self, location: &BlobLocation, source: &Path) -> Result<BlobReceipt>;

    /// Stream the blob starting at byte `offset`. Reading past the end
    /// yields an empty stream.
    async fn open_read_stream(&self, location: &BlobLocation, offset: u64) -> Result<ByteStream>;
}

/// Blob storage client authorized by the SAS token of each location
pub struct SasBlobClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl Default for SasBlobClient {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl SasBlobClient {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry,
        }
    }

    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn put_once(&self, location: &BlobLocation, source: &Path) -> Result<BlobReceipt> {
        // An expired SAS token is never sent
        location.ensure_unexpired()?;

        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();

        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        let body = tokio_util::io::ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        });

        tracing::debug!("PUT {} ({} bytes)", location.display_url(), length);

        let response = self
            .client
            .put(location.blob_url())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(storage_error(response).await);
        }
        // Put Blob confirms a committed block blob with 201 only
        if status != StatusCode::CREATED {
            return Err(CloudError::StorageError {
                status: status.as_u16(),
                message: format!(
                    "blob write was not confirmed: expected 201 Created, got {}",
                    status
                ),
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(BlobReceipt {
            content_length: sent.load(Ordering::Relaxed),
            etag,
        })
    }

    async fn get_once(&self, location: &BlobLocation, offset: u64) -> Result<ByteStream> {
        let mut request = self
            .client
            .get(location.blob_url())
            .header("x-ms-version", STORAGE_API_VERSION);
        if offset > 0 {
            request = request.header("x-ms-range", format!("bytes={}-", offset));
        }

        tracing::debug!("GET {} from offset {}", location.display_url(), offset);

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            return Ok(futures_util::stream::empty().boxed());
        }
        if !status.is_success() {
            return Err(storage_error(response).await);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CloudError::from))
            .boxed())
    }
}

#[async_trait]
impl BlobStore for SasBlobClient {
    async fn write_blob(&self, location: &BlobLocation, source: &Path) -> Result<BlobReceipt> {
        with_retry(&self.retry, "blob upload", CloudError::is_transient, || {
            self.put_once(location, source)
        })
        .await
    }

    async fn open_read_stream(&self, location: &BlobLocation, offset: u64) -> Result<ByteStream> {
        with_retry(&self.retry, "blob read", CloudError::is_transient, || {
            self.get_once(location, offset)
        })
        .await
    }
}

/// Turn a failed storage response into an error, reading the XML error code
async fn storage_error(response: reqwest::Response) -> CloudError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = xml_element(&body, "Code")
        .or_else(|| xml_element(&body, "Message"))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        401 | 403 => CloudError::AuthenticationFailed(message),
        404 => CloudError::ResourceNotFound(message),
        _ => CloudError::StorageError { status, message },
    }
}

fn xml_element<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use httpmock::prelude::*;

    const UPLOAD_URL: &str = "https://myregistry.blob.core.windows.net/source/202401/abc123.tar.gz?sv=2018-03-28&sr=b&sig=c2VjcmV0&se=2099-01-01T00%3A00%3A00Z&sp=cw";

    #[test]
    fn test_parse_blob_url() {
        let location = BlobLocation::parse(UPLOAD_URL).unwrap();
        assert_eq!(location.host(), "https://myregistry.blob.core.windows.net");
        assert_eq!(location.container_name(), "source");
        assert_eq!(location.blob_name(), "202401/abc123.tar.gz");
        assert!(location.sas_token().starts_with("sv=2018-03-28"));
        assert_eq!(location.account_name(), Some("myregistry"));
        assert_eq!(location.endpoint_suffix(), Some("core.windows.net"));
        assert_eq!(location.blob_url(), UPLOAD_URL);
    }

    #[test]
    fn test_parse_rejects_incomplete_urls() {
        assert!(BlobLocation::parse("not a url").is_err());
        assert!(BlobLocation::parse("https://a.blob.core.windows.net/container?sig=x").is_err());
        assert!(BlobLocation::parse("https://a.blob.core.windows.net/c/blob").is_err());
    }

    #[test]
    fn test_sas_expiry() {
        let location = BlobLocation::parse(UPLOAD_URL).unwrap();
        let expiry = location.expires_at().unwrap();
        assert_eq!(expiry.to_rfc3339(), "2099-01-01T00:00:00+00:00");
        assert!(!location.is_expired(Utc::now()));

        let expired = BlobLocation::parse(
            "https://a.blob.core.windows.net/c/b?sig=x&se=2001-01-01",
        )
        .unwrap();
        assert!(expired.is_expired(Utc::now()));

        let no_expiry = BlobLocation::parse("https://a.blob.core.windows.net/c/b?sig=x").unwrap();
        assert_eq!(no_expiry.expires_at(), None);
        assert!(!no_expiry.is_expired(Utc::now()));
    }

    #[test]
    fn test_debug_hides_token() {
        let location = BlobLocation::parse(UPLOAD_URL).unwrap();
        let debug = format!("{:?}", location);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(!location.display_url().contains("sig="));
    }

    #[tokio::test]
    async fn test_write_blob_sends_file_contents() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/source/archive.tar.gz")
                    .query_param("sig", "abc")
                    .header("x-ms-blob-type", "BlockBlob")
                    .body("archive-bytes");
                then.status(201).header("ETag", "\"0x8D\"");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("archive.tar.gz");
        std::fs::write(&source, "archive-bytes").unwrap();

        let location =
            BlobLocation::parse(&format!("{}/source/archive.tar.gz?sig=abc", server.base_url()))
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let receipt = client.write_blob(&location, &source).await.unwrap();

        mock.assert_async().await;
        assert_eq!(receipt.content_length, 13);
        assert_eq!(receipt.etag.as_deref(), Some("\"0x8D\""));
    }

    #[tokio::test]
    async fn test_write_blob_requires_created_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/source/archive.tar.gz");
                then.status(202);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("archive.tar.gz");
        std::fs::write(&source, "archive-bytes").unwrap();

        let location =
            BlobLocation::parse(&format!("{}/source/archive.tar.gz?sig=abc", server.base_url()))
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let result = client.write_blob(&location, &source).await;

        assert!(matches!(
            result,
            Err(CloudError::StorageError { status: 202, .. })
        ));
    }

    #[tokio::test]
    async fn test_write_blob_refuses_expired_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("archive.tar.gz");
        std::fs::write(&source, "x").unwrap();

        let location =
            BlobLocation::parse("http://127.0.0.1:9/c/archive.tar.gz?sig=abc&se=2001-01-01")
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let result = client.write_blob(&location, &source).await;

        assert!(matches!(result, Err(CloudError::TokenExpired(_))));
    }

    #[tokio::test]
    async fn test_write_blob_reports_storage_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/source/archive.tar.gz");
                then.status(403).body(
                    "<?xml version=\"1.0\"?><Error><Code>AuthenticationFailed</Code><Message>Signature did not match</Message></Error>",
                );
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("archive.tar.gz");
        std::fs::write(&source, "x").unwrap();

        let location =
            BlobLocation::parse(&format!("{}/source/archive.tar.gz?sig=abc", server.base_url()))
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let result = client.write_blob(&location, &source).await;

        match result {
            Err(CloudError::AuthenticationFailed(code)) => assert_eq!(code, "AuthenticationFailed"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_read_stream() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/logs/build-1.log");
                then.status(200).body("Step 1/3\nStep 2/3\n");
            })
            .await;

        let location =
            BlobLocation::parse(&format!("{}/logs/build-1.log?sig=abc", server.base_url()))
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let chunks: Vec<Bytes> = client
            .open_read_stream(&location, 0)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let text: Vec<u8> = chunks.concat();
        assert_eq!(text, b"Step 1/3\nStep 2/3\n");
    }

    #[tokio::test]
    async fn test_open_read_stream_past_end_is_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/logs/build-1.log")
                    .header("x-ms-range", "bytes=18-");
                then.status(416);
            })
            .await;

        let location =
            BlobLocation::parse(&format!("{}/logs/build-1.log?sig=abc", server.base_url()))
                .unwrap();
        let client = SasBlobClient::new(RetryConfig::none());
        let chunks: Vec<Bytes> = client
            .open_read_stream(&location, 18)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert!(chunks.is_empty());
    }

    #[test]
    fn test_xml_element() {
        let body = "<Error><Code>BlobNotFound</Code></Error>";
        assert_eq!(xml_element(body, "Code"), Some("BlobNotFound"));
        assert_eq!(xml_element(body, "Message"), None);
    }
}
