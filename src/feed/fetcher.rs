use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, ParsedFeed};
use super::FeedSource;
use crate::config::DiscoveryConfig;
use crate::http::{read_limited_bytes, BodyError};

/// Errors that can occur while fetching or parsing one feed.
///
/// Every variant is isolated to the source that produced it; discovery
/// records it in the source's health columns and moves on.
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
    /// Feed XML could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<BodyError> for FetchError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => FetchError::Network(e),
            BodyError::TooLarge(_) => FetchError::ResponseTooLarge,
            BodyError::Incomplete { expected, received } => {
                FetchError::IncompleteResponse { expected, received }
            }
        }
    }
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpStatus(status) => *status == 429 || (500..600).contains(status),
            FetchError::IncompleteResponse { .. } => true,
            _ => false,
        }
    }
}

/// HTTP feed fetcher with timeout, size cap and backoff on 429/5xx.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    max_retries: u32,
    base_delay: Duration,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, config: &DiscoveryConfig) -> Self {
        Self {
            client,
            timeout: config.fetch_timeout(),
            max_bytes: config.max_feed_bytes,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Fetch a feed body, retrying 429, 5xx and truncated bodies with
    /// exponential backoff (`base`, `2 * base`, `4 * base`, ...).
    ///
    /// 4xx responses other than 429 fail immediately. Each attempt is
    /// bounded by the configured timeout.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let attempt = tokio::time::timeout(self.timeout, self.fetch_once(url))
                .await
                .map_err(|_| FetchError::Timeout)?;

            match attempt {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() => {
                    if retry_count >= self.max_retries {
                        return Err(match e {
                            FetchError::HttpStatus(429) => FetchError::RateLimited(self.max_retries),
                            other => other,
                        });
                    }

                    let delay = self.base_delay.saturating_mul(2u32.saturating_pow(retry_count));
                    tracing::warn!(
                        feed = %url,
                        error = %e,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Feed fetch failed, backing off"
                    );

                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        Ok(read_limited_bytes(response, self.max_bytes).await?)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_feed(&self, feed_url: &str) -> Result<ParsedFeed, FetchError> {
        let bytes = self.fetch_bytes(feed_url).await?;
        parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
    <item><title>Test</title><link>https://example.com/test</link></item>
</channel></rss>"#;

    fn fetcher() -> FeedFetcher {
        let config = DiscoveryConfig {
            retry_base_delay_ms: 5,
            fetch_timeout_secs: 5,
            max_feed_bytes: 64 * 1024,
            ..DiscoveryConfig::default()
        };
        FeedFetcher::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let feed = fetcher()
            .fetch_feed(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].url, "https://example.com/test");
    }

    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_feed(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other.map(|f| f.entries.len())),
        }
    }

    #[tokio::test]
    async fn test_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_bytes(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_429_exhausted_is_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_bytes(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::RateLimited(3))));
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let feed = fetcher()
            .fetch_feed(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(70 * 1024)))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_bytes(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let config = DiscoveryConfig {
            fetch_timeout_secs: 1,
            ..DiscoveryConfig::default()
        };
        let fetcher = FeedFetcher::new(reqwest::Client::new(), &config);
        let result = fetcher
            .fetch_bytes(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch_feed(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_empty_feed_success() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let feed = fetcher()
            .fetch_feed(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert!(feed.entries.is_empty());
    }
}
