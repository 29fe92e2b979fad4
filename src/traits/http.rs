//! HTTP client trait abstraction.
//!
//! The downloader only needs a streaming GET, so that is all this trait
//! exposes. Implementations report whether they honour `Range` requests,
//! which selects the resume strategy.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// HTTP headers represented as a key-value map.
pub type Headers = HashMap<String, String>;

/// Body of a streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// Streaming HTTP response.
pub struct StreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, keys lowercased
    pub headers: Headers,
    /// Content length of this response body, if the server sent one
    pub content_length: Option<u64>,
    /// Response body
    pub body: ByteStream,
}

impl StreamResponse {
    /// Create a new streaming response.
    pub fn new(status: u16, content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            content_length,
            body,
        }
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers.get(&name).map(String::as_str)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// HTTP client errors.
#[derive(Debug, Clone)]
pub enum HttpError {
    /// Connection failed
    ConnectionFailed(String),
    /// Request timeout
    Timeout(String),
    /// Body stream broke off mid-transfer
    Io(String),
    /// Invalid URL
    InvalidUrl(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            HttpError::Timeout(msg) => write!(f, "Request timeout: {}", msg),
            HttpError::Io(msg) => write!(f, "IO error: {}", msg),
            HttpError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            HttpError::Other(msg) => write!(f, "HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

/// Trait for HTTP client operations used by the downloader.
///
/// # Example
///
/// ```ignore
/// use ota_agent::traits::{HttpClient, Headers};
///
/// async fn status<C: HttpClient>(client: &C, url: &str) -> Result<u16, HttpError> {
///     let response = client.get_stream(url, &Headers::new()).await?;
///     Ok(response.status)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request and return the body as a stream.
    ///
    /// Non-2xx statuses are returned as responses, not errors, so the caller
    /// can interpret `206` and `416` for resumed downloads.
    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<StreamResponse, HttpError>;

    /// Whether this client forwards `Range` headers and surfaces partial
    /// content responses unchanged.
    fn supports_range(&self) -> bool;
}
