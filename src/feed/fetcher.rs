use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use crate::feed::parser::{parse_feed, FeedEntry};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;
const MAX_FEED_SIZE: usize = 20 * 1024 * 1024; // 20MB, long-running podcast feeds get big
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching a single feed.
///
/// A failure is a normal outcome for one source; it never aborts a refresh
/// of the others.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect policy, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body was not a parseable RSS or Atom document
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Connection closed before Content-Length bytes arrived
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Parsed entries in feed order, or why the fetch failed.
pub type FetchResult = Result<Vec<FeedEntry>, FetchError>;

/// Tuning for a refresh cycle.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// One subscription to fetch during a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub name: String,
    pub url: String,
}

/// The result of fetching one [`RefreshTarget`].
///
/// Carries the url that was actually fetched so the merge step can tell when
/// the subscription was re-pointed while the request was in flight.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub name: String,
    pub url: String,
    pub result: FetchResult,
}

/// Builds the shared HTTP client.
///
/// Podcast hosts redirect through tracking and CDN hops, so a few redirects are
/// followed; loops are detected and rejected.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Fetches and parses the feed at `url`. Exactly one attempt is made.
pub async fn fetch(client: &reqwest::Client, url: &str, timeout: Duration) -> FetchResult {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = tokio::time::timeout(timeout, read_limited_bytes(response, MAX_FEED_SIZE))
        .await
        .map_err(|_| FetchError::Timeout)??;

    parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}

/// Fetches every target concurrently and returns one outcome per target.
///
/// Outcomes arrive in completion order, not input order. A failing source is
/// logged and reported in its outcome; it never cancels its siblings.
pub async fn refresh_all(
    client: &reqwest::Client,
    targets: Vec<RefreshTarget>,
    options: FetchOptions,
) -> Vec<RefreshOutcome> {
    if targets.is_empty() {
        return Vec::new();
    }

    let total = targets.len();
    tracing::info!(feeds = total, concurrency = options.max_concurrent, "Refreshing feeds");

    stream::iter(targets)
        .map(|target| async move {
            tracing::debug!(name = %target.name, url = %target.url, "Fetching feed");
            let result = fetch(client, &target.url, options.timeout).await;
            match &result {
                Ok(entries) => tracing::debug!(
                    name = %target.name,
                    entries = entries.len(),
                    "Fetched feed"
                ),
                Err(e) => tracing::warn!(
                    name = %target.name,
                    url = %target.url,
                    error = %e,
                    "Feed fetch failed, keeping previous episodes"
                ),
            }
            RefreshOutcome {
                name: target.name,
                url: target.url,
                result,
            }
        })
        .buffer_unordered(options.max_concurrent.max(1))
        .collect()
        .await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
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
