use crate::feed::parser::{parse_feed, ParseResult};
use crate::feed::throttle::DomainThrottle;
use crate::util::origin_of;
use futures::StreamExt;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Soft failures of a single request.
///
/// None of these abort a run: a failed feed contributes no entries and a
/// failed probe contributes no links. `Tls` is kept apart from `Network` so
/// discovery can retry without certificate verification.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level error (DNS, refused, reset, ...)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// Certificate or handshake failure
    #[error("TLS failure: {0}")]
    Tls(#[source] reqwest::Error),
    /// Response with a status other than 200
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body could not be parsed as a feed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_tls(&self) -> bool {
        matches!(self, FetchError::Tls(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.source().is_some_and(is_tls_failure) {
            FetchError::Tls(err)
        } else {
            FetchError::Network(err)
        }
    }
}

/// Walks an error's source chain looking for a certificate/handshake cause.
///
/// reqwest does not expose a TLS error kind, so the rustls/hyper messages in
/// the chain are inspected instead. Callers pass the chain below reqwest's
/// own error, whose message embeds the request URL.
pub fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    const MARKERS: [&str; 6] = [
        "certificate",
        "handshake",
        "unknownissuer",
        "received fatal alert",
        "tls",
        "ssl",
    ];

    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_ascii_lowercase();
        if MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// The pair of clients a run needs: the normal verifying client, and the one
/// used only for the single TLS fallback retry during discovery.
#[derive(Clone)]
pub struct HttpClients {
    pub verified: reqwest::Client,
    pub unverified: reqwest::Client,
    pub timeout: Duration,
}

impl HttpClients {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let verified = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        let unverified = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            verified,
            unverified,
            timeout,
        })
    }
}

/// Issues a throttled GET. Any status is returned as `Ok`; callers decide
/// what a non-200 means for them.
pub async fn throttled_get(
    client: &reqwest::Client,
    throttle: &DomainThrottle,
    url: &str,
    timeout: Duration,
) -> Result<reqwest::Response, FetchError> {
    throttle.wait(&origin_of(url)).await;

    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)??;

    Ok(response)
}

/// Fetches and parses one source feed.
///
/// # Errors
///
/// - [`FetchError::Network`] / [`FetchError::Tls`] - connection failures
/// - [`FetchError::Timeout`] - request exceeded `timeout`
/// - [`FetchError::HttpStatus`] - any status other than 200
/// - [`FetchError::ResponseTooLarge`] - body over 10MB
/// - [`FetchError::Parse`] - body is not RSS/Atom
pub async fn fetch_feed(
    client: &reqwest::Client,
    throttle: &DomainThrottle,
    url: &str,
    timeout: Duration,
) -> Result<ParseResult, FetchError> {
    let response = throttled_get(client, throttle, url, timeout).await?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    let parsed = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    if parsed.skipped > 0 {
        tracing::debug!(
            feed = %url,
            skipped = parsed.skipped,
            "Feed items without a link skipped"
        );
    }

    Ok(parsed)
}

/// Reads a response body, failing once it grows past `limit` bytes.
pub async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn throttle() -> DomainThrottle {
        DomainThrottle::new(Duration::ZERO)
    }

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_tls_failure_detected_deep_in_chain() {
        let err = Layer(
            "error sending request",
            Some(Box::new(Layer(
                "client error (Connect)",
                Some(Box::new(Layer("invalid peer certificate: UnknownIssuer", None))),
            ))),
        );
        assert!(is_tls_failure(&err));
    }

    #[test]
    fn test_plain_connection_error_is_not_tls() {
        let err = Layer(
            "error sending request",
            Some(Box::new(Layer("Connection refused (os error 111)", None))),
        );
        assert!(!is_tls_failure(&err));
    }

    #[tokio::test]
    async fn test_fetch_feed_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let parsed = fetch_feed(&client, &throttle(), &url, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].link, "https://example.com/1");
    }

    #[tokio::test]
    async fn test_fetch_feed_404_is_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        match fetch_feed(&client, &throttle(), &url, DEFAULT_TIMEOUT).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other.map(|p| p.entries)),
        }
    }

    #[tokio::test]
    async fn test_fetch_feed_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_feed(&client, &throttle(), &url, DEFAULT_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_fetch_feed_non_200_success_status_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_feed(&client, &throttle(), &url, DEFAULT_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(204))));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_feed(&client, &throttle(), &url, DEFAULT_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_feed(&client, &throttle(), &url, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = reqwest::Client::new();
        // Port 9 (discard) is closed on test hosts
        let result = fetch_feed(
            &client,
            &throttle(),
            "http://127.0.0.1:9/feed",
            DEFAULT_TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
