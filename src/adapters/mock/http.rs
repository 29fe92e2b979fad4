//! Mock HTTP client for testing.
//!
//! Serves canned streaming responses per URL and records every request so
//! tests can check which `Range` header the downloader sent.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, StreamResponse};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
}

impl RecordedRequest {
    /// The `Range` header of the request, if any.
    pub fn range(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("range"))
            .map(|(_, value)| value.as_str())
    }
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Fixed status and body chunks, whatever the request headers say
    Chunks { status: u16, chunks: Vec<Bytes> },
    /// Serve this file, honouring `Range: bytes=<start>-` with 206 or 416
    File(Bytes),
    /// Fail the request before any response
    Error(HttpError),
    /// Send a 200 with these chunks, then break the stream
    Truncated { chunks: Vec<Bytes>, error: HttpError },
}

impl MockResponse {
    /// Plain `200` with the whole body in one chunk.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        MockResponse::Chunks {
            status: 200,
            chunks: vec![body.into()],
        }
    }

    /// Status-only response with an empty body.
    pub fn status(status: u16) -> Self {
        MockResponse::Chunks {
            status,
            chunks: Vec::new(),
        }
    }
}

/// Mock HTTP client for testing.
///
/// # Example
///
/// ```ignore
/// use ota_agent::adapters::mock::{MockHttpClient, MockResponse};
///
/// let client = MockHttpClient::new();
/// client.set_response("https://updates.example.com/u1.zip", MockResponse::File(data.into()));
/// ```
#[derive(Debug, Clone)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    supports_range: bool,
}

impl MockHttpClient {
    /// Create a mock client that advertises range support.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            supports_range: true,
        }
    }

    /// Create a mock client that reports no range support.
    pub fn without_range_support() -> Self {
        Self {
            supports_range: false,
            ..Self::new()
        }
    }

    /// Set the response for a URL (exact match).
    pub fn set_response(&self, url: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Get all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Clear all recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn record_request(&self, url: &str, headers: &Headers) {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            headers: headers.clone(),
        });
    }

    fn get_response(&self, url: &str) -> Option<MockResponse> {
        self.responses.lock().unwrap().get(url).cloned()
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn chunk_stream(chunks: Vec<Bytes>, tail: Option<HttpError>) -> ByteStream {
    let items = chunks
        .into_iter()
        .map(Ok)
        .chain(tail.map(Err))
        .collect::<Vec<_>>();
    Box::pin(futures::stream::iter(items))
}

/// Parse `bytes=<start>-`.
fn range_start(range: &str) -> Option<u64> {
    range
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

fn serve_file(data: &Bytes, range: Option<u64>) -> StreamResponse {
    let total = data.len() as u64;
    match range {
        Some(start) if start >= total => {
            let mut response = StreamResponse::new(416, Some(0), chunk_stream(Vec::new(), None));
            response
                .headers
                .insert("content-range".to_string(), format!("bytes */{}", total));
            response
        }
        Some(start) => {
            let body = data.slice(start as usize..);
            let mut response = StreamResponse::new(
                206,
                Some(body.len() as u64),
                chunk_stream(vec![body], None),
            );
            response.headers.insert(
                "content-range".to_string(),
                format!("bytes {}-{}/{}", start, total - 1, total),
            );
            response
        }
        None => StreamResponse::new(200, Some(total), chunk_stream(vec![data.clone()], None)),
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<StreamResponse, HttpError> {
        self.record_request(url, headers);
        let request = RecordedRequest {
            url: url.to_string(),
            headers: headers.clone(),
        };

        match self.get_response(url) {
            Some(MockResponse::Chunks { status, chunks }) => {
                let length = chunks.iter().map(|c| c.len() as u64).sum();
                Ok(StreamResponse::new(
                    status,
                    Some(length),
                    chunk_stream(chunks, None),
                ))
            }
            Some(MockResponse::File(data)) => {
                let range = request.range().and_then(range_start);
                Ok(serve_file(&data, range))
            }
            Some(MockResponse::Truncated { chunks, error }) => {
                Ok(StreamResponse::new(200, None, chunk_stream(chunks, Some(error))))
            }
            Some(MockResponse::Error(err)) => Err(err),
            None => Err(HttpError::Other(format!("No mock response for URL: {}", url))),
        }
    }

    fn supports_range(&self) -> bool {
        self.supports_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(response: StreamResponse) -> Vec<u8> {
        let mut body = response.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_file_without_range() {
        let client = MockHttpClient::new();
        client.set_response("http://x/a", MockResponse::File(Bytes::from("abcdef")));

        let response = client.get_stream("http://x/a", &Headers::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, Some(6));
        assert_eq!(collect(response).await, b"abcdef");
    }

    #[tokio::test]
    async fn test_file_with_range() {
        let client = MockHttpClient::new();
        client.set_response("http://x/a", MockResponse::File(Bytes::from("abcdef")));

        let mut headers = Headers::new();
        headers.insert("Range".to_string(), "bytes=4-".to_string());
        let response = client.get_stream("http://x/a", &headers).await.unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.header("content-range"), Some("bytes 4-5/6"));
        assert_eq!(collect(response).await, b"ef");

        headers.insert("Range".to_string(), "bytes=6-".to_string());
        let response = client.get_stream("http://x/a", &headers).await.unwrap();
        assert_eq!(response.status, 416);

        let requests = client.get_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].range(), Some("bytes=4-"));
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_in_error() {
        let client = MockHttpClient::new();
        client.set_response(
            "http://x/a",
            MockResponse::Truncated {
                chunks: vec![Bytes::from("ab")],
                error: HttpError::Io("reset".to_string()),
            },
        );

        let response = client.get_stream("http://x/a", &Headers::new()).await.unwrap();
        let mut body = response.body;
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("ab"));
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_no_response_configured() {
        let client = MockHttpClient::without_range_support();
        assert!(!client.supports_range());
        let result = client.get_stream("http://x/missing", &Headers::new()).await;
        assert!(matches!(result, Err(HttpError::Other(_))));
    }

    #[test]
    fn test_range_start_parsing() {
        assert_eq!(range_start("bytes=100-"), Some(100));
        assert_eq!(range_start("bytes=0-99"), None);
        assert_eq!(range_start("items=1-"), None);
    }
}
