use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::util::validate_url;

/// Default cap on a fetched body (10 MB).
pub const MAX_PAGE_SIZE: usize = 10 * 1024 * 1024;

/// Timeout for the connectivity probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_REDIRECTS: usize = 3;

/// Errors from a single page or feed fetch.
///
/// The aggregator treats all of them the same way: count the failure, skip
/// the candidate, keep going.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connection, TLS or body read failure
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Response too large")]
    ResponseTooLarge,
    /// Fewer bytes arrived than Content-Length promised
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A successful (2xx) response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
}

/// Network access used by ingestion.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`. Non-2xx statuses are errors.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError>;

    /// Whether ingestion should try the network at all.
    async fn is_online(&self) -> bool;
}

// Values of `HttpFetcher::online_override`
const PROBE: u8 = 0;
const FORCED_OFFLINE: u8 = 1;
const FORCED_ONLINE: u8 = 2;

/// [`PageFetcher`] over reqwest.
///
/// Bodies are streamed with a size cap and decoded lossily. Urls naming
/// private or loopback addresses are refused, on the first hop and on every
/// redirect, unless [`HttpFetcher::allow_private_hosts`] is set.
pub struct HttpFetcher {
    client: reqwest::Client,
    /// Shared with the redirect policy
    allow_private_hosts: Arc<AtomicBool>,
    max_body_bytes: usize,
    probe_url: Option<String>,
    online_override: AtomicU8,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        Self::from_builder(reqwest::Client::builder().user_agent(user_agent))
    }

    fn from_builder(builder: reqwest::ClientBuilder) -> Result<Self, FetchError> {
        let allow_private_hosts = Arc::new(AtomicBool::new(false));
        let client = builder
            .redirect(redirect_policy(Arc::clone(&allow_private_hosts)))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            allow_private_hosts,
            max_body_bytes: MAX_PAGE_SIZE,
            probe_url: None,
            online_override: AtomicU8::new(PROBE),
        })
    }

    /// Skip the SSRF host check. Meant for local test servers.
    pub fn allow_private_hosts(self, allow: bool) -> Self {
        self.allow_private_hosts.store(allow, Ordering::Relaxed);
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// HEAD this url to decide [`PageFetcher::is_online`]. Without a probe
    /// the fetcher reports online and lets individual fetches fail.
    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Force the online state, or `None` to go back to probing.
    pub fn set_online_override(&self, online: Option<bool>) {
        let value = match online {
            None => PROBE,
            Some(false) => FORCED_OFFLINE,
            Some(true) => FORCED_ONLINE,
        };
        self.online_override.store(value, Ordering::Relaxed);
    }

    fn check_url(&self, url: &str) -> Result<(), FetchError> {
        check_target(url, self.allow_private_hosts.load(Ordering::Relaxed))
            .map_err(FetchError::InvalidUrl)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        self.check_url(url)?;

        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            let bytes = read_limited_bytes(response, self.max_body_bytes).await?;
            let body = match String::from_utf8(bytes) {
                Ok(body) => body,
                Err(e) => {
                    // Legacy charsets degrade to replacement characters
                    tracing::debug!(url = %url, "Response is not valid UTF-8, decoding lossily");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            Ok(FetchResponse {
                body,
                status: status.as_u16(),
            })
        };

        let result = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?;
        if let Err(e) = &result {
            tracing::debug!(url = %url, error = %e, "Fetch failed");
        }
        result
    }

    async fn is_online(&self) -> bool {
        match self.online_override.load(Ordering::Relaxed) {
            FORCED_OFFLINE => return false,
            FORCED_ONLINE => return true,
            _ => {}
        }
        let Some(probe) = &self.probe_url else {
            return true;
        };

        // Any HTTP answer, even an error status, proves connectivity.
        match tokio::time::timeout(PROBE_TIMEOUT, self.client.head(probe).send()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(probe = %probe, error = %e, "Connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(probe = %probe, "Connectivity probe timed out");
                false
            }
        }
    }
}

/// Parse `url`, and unless `allow_private` also apply the SSRF host check.
fn check_target(url: &str, allow_private: bool) -> Result<(), String> {
    if allow_private {
        url::Url::parse(url).map_err(|e| e.to_string())?;
    } else {
        validate_url(url).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn redirect_policy(allow_private: Arc<AtomicBool>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        // SSRF: a public url must not bounce the request to a private host
        if let Err(e) = check_target(url.as_str(), allow_private.load(Ordering::Relaxed)) {
            tracing::warn!(to = %url, error = %e, "Refusing redirect");
            return attempt.error(format!("Redirect target refused: {e}"));
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

/// Read a response body, refusing anything over `limit` bytes.
///
/// Checks Content-Length up front, then enforces the limit while streaming,
/// and reports a body shorter than Content-Length as incomplete.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();
    if let Some(len) = expected_length {
        if len > limit as u64 {
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
