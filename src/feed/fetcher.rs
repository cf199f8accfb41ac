use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use super::parser::ParseError;

/// Attempts per fetch, including the first one.
pub const MAX_ATTEMPTS: u32 = 3;
/// Fixed wait between two attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching a feed.
///
/// Everything except [`FetchError::ResponseTooLarge`] counts as a failed
/// attempt and is retried until [`MAX_ATTEMPTS`] is reached.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Connection failed or closed while the body was being read
    #[error("Failed to read response body: {0}")]
    Read(#[source] reqwest::Error),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body was fetched but is not a feed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::ResponseTooLarge)
    }
}

/// HTTP side of the pipeline: fetches raw feed bytes with bounded retries.
///
/// Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    request_timeout: Duration,
    retry_delay: Duration,
}

impl Fetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// `request_timeout` bounds one attempt (connect, headers and body).
    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            request_timeout,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Override the wait between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The underlying HTTP client, for one-shot requests outside the retry loop.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetch the complete body at `url`.
    ///
    /// # Errors
    ///
    /// The error from the last attempt once all [`MAX_ATTEMPTS`] have failed,
    /// or [`FetchError::ResponseTooLarge`] immediately. Partial bodies are
    /// never returned.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_with(url, Ok).await
    }

    /// Fetch `url` and run `decode` on the body, as one attempt.
    ///
    /// A `decode` failure uses up an attempt exactly like a network failure,
    /// so a feed served truncated or garbled once still gets its retries.
    pub async fn fetch_with<T, F>(&self, url: &str, mut decode: F) -> Result<T, FetchError>
    where
        F: FnMut(Vec<u8>) -> Result<T, FetchError>,
    {
        let mut attempt = 1;

        loop {
            let result = match self.fetch_once(url).await {
                Ok(bytes) => decode(bytes),
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(feed = %url, attempt = attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() || attempt >= MAX_ATTEMPTS => {
                    tracing::warn!(
                        feed = %url,
                        attempt = attempt,
                        error = %e,
                        "Fetch failed, giving up"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        feed = %url,
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "Fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(self.request_timeout, self.request(url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn request(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(to = %url, hop = attempt.previous().len() + 1, "Following redirect");
        attempt.follow()
    })
}

pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Read)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parse_feed;
    use std::time::Instant;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn test_fetcher() -> Fetcher {
        Fetcher::new("feedcache-test", Duration::from_secs(5))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let bytes = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed() {
        let mock_server = MockServer::start().await;

        // First two requests fail, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let bytes = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fail_every_attempt_returns_last_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_404_is_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = test_fetcher()
            .fetch(&format!("http://{}/feed", addr))
            .await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new("feedcache-test", Duration::from_millis(100))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        let result = fetcher.fetch(&format!("{}/feed", mock_server.uri())).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_read_error_and_retried() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Declares 100 bytes, sends 10, then hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                server_hits.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let result = test_fetcher().fetch(&format!("http://{}/feed", addr)).await;
        assert!(matches!(result, Err(FetchError::Read(_))), "got {:?}", result);
        assert_eq!(hits.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_oversized_response_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_parse_failure_uses_attempt_budget() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let articles = test_fetcher()
            .fetch_with(&format!("{}/feed", mock_server.uri()), |bytes| {
                Ok(parse_feed(&bytes)?)
            })
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a feed"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch_with(&format!("{}/feed", mock_server.uri()), |bytes| {
                Ok(parse_feed(&bytes)?)
            })
            .await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_default_retry_delay_applied() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new("feedcache-test", Duration::from_secs(5)).unwrap();
        let started = Instant::now();
        fetcher
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert!(started.elapsed() >= RETRY_DELAY);
    }
}
