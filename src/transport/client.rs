//! Asynchronous transport
//!
//! Issues one HTTP request at a time through the concurrency governor,
//! applies the retry policy, decodes the page envelope, and raises
//! classified errors. TLS failures are reported to the governor before
//! the retry sleeps.

use crate::config::{ClientConfig, RateLimitConfig};
use crate::error::{Error, Result};
use crate::pagination::{AsyncPageFetcher, PageEnvelope, PageRequest, PaginationLimits};
use crate::transport::governor::ConcurrencyGovernor;
use crate::transport::retry::RetryPolicy;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ============================================================================
// Request-rate limiter
// ============================================================================

/// Token-bucket bound on outbound request rate.
///
/// Orthogonal to the governor: the governor caps how many requests are in
/// flight, this caps how often they start.
pub(crate) struct RequestRateLimiter {
    inner: Arc<DefaultDirectRateLimiter>,
}

impl RequestRateLimiter {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            inner: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub(crate) async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Asynchronous HTTP transport with retry, rate limiting, and adaptive
/// concurrency control.
pub struct Transport {
    client: reqwest::Client,
    config: ClientConfig,
    retry: RetryPolicy,
    governor: Arc<ConcurrencyGovernor>,
    rate_limiter: Option<RequestRateLimiter>,
    cancel: CancellationToken,
}

impl Transport {
    /// Create a transport with its own governor built from
    /// `config.governor`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let governor = Arc::new(ConcurrencyGovernor::new(config.governor));
        Self::with_governor(config, governor)
    }

    /// Create a transport on the process-wide shared governor, so every
    /// client in the process respects one combined ceiling.
    pub fn with_shared_governor(config: ClientConfig) -> Result<Self> {
        Self::with_governor(config, ConcurrencyGovernor::shared())
    }

    /// Create a transport on an explicitly shared governor
    pub fn with_governor(config: ClientConfig, governor: Arc<ConcurrencyGovernor>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(Error::Http)?;
        let retry = RetryPolicy::new(config.max_attempts).with_backoff(
            config.backoff_type,
            config.initial_backoff,
            config.max_backoff,
        );
        let rate_limiter = config.rate_limit.as_ref().map(RequestRateLimiter::new);
        Ok(Self {
            client,
            config,
            retry,
            governor,
            rate_limiter,
            cancel: CancellationToken::new(),
        })
    }

    /// Attach a cancellation token; checked before the governor acquire
    /// and each attempt
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The governor bounding this transport's concurrency
    pub fn governor(&self) -> &Arc<ConcurrencyGovernor> {
        &self.governor
    }

    /// The transport's configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch one page envelope. An empty or `null` body signals
    /// end-of-data and returns `None`.
    pub async fn get_page(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Option<PageEnvelope>> {
        let body = self.request_text(Method::GET, path, query).await?;
        decode_envelope(&body)
    }

    /// Make a GET request and decode the JSON body into a model type.
    /// A malformed body in a success response is a terminal decode error.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        let body = self.request_text(Method::GET, path, query).await?;
        serde_json::from_str(&body).map_err(|e| Error::decode(e.to_string()))
    }

    /// Issue a request with retries, returning the response body text.
    async fn request_text(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> Result<String> {
        let url = self.build_url(path)?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_once(method.clone(), &url, query).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    let tls = err.is_tls();
                    if tls {
                        // Feed the governor before any retry sleep so the
                        // ceiling reacts to the error burst, not after it.
                        self.governor.record_tls_error();
                    }
                    if !self.retry.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    warn!(
                        attempt,
                        max = self.retry.max_attempts(),
                        error = %err,
                        "request failed; retrying"
                    );
                    if let Error::RateLimited {
                        retry_after_seconds,
                    } = err
                    {
                        tokio::time::sleep(Duration::from_secs(retry_after_seconds)).await;
                        continue;
                    }
                    if tls {
                        tokio::time::sleep(self.config.tls_settle_delay).await;
                    }
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
            }
        }
    }

    /// One attempt: acquire a governor unit, apply the rate limit, call
    /// out, classify the outcome. The unit is released when the attempt
    /// completes, success or failure.
    async fn try_once(&self, method: Method, url: &str, query: &[(String, String)]) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let cancel = self.cancel.clone();
        let _permit = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.governor.acquire() => permit,
        };
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(self.config.timeout);
        for (key, value) in &self.config.default_headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after_seconds: extract_retry_after(&response),
            });
        }
        if status.is_client_error() || status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), message));
        }

        debug!(%method, url, "request succeeded");
        response.text().await.map_err(Error::Http)
    }

    /// Build the full URL from a path, validating absolute results
    fn build_url(&self, path: &str) -> Result<String> {
        let full = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            match &self.config.base_url {
                Some(base) => format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    path.trim_start_matches('/')
                ),
                None => path.to_string(),
            }
        };
        url::Url::parse(&full)?;
        Ok(full)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

/// Decode a page-envelope body; empty and `null` bodies signal
/// end-of-data
pub(crate) fn decode_envelope(body: &str) -> Result<Option<PageEnvelope>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let envelope =
        serde_json::from_str(trimmed).map_err(|e| Error::decode(format!("page envelope: {e}")))?;
    Ok(Some(envelope))
}

/// Extract the retry-after header value, defaulting to 60 seconds
fn extract_retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(60)
}

// ============================================================================
// Paged endpoint
// ============================================================================

/// One paged HTTP operation bound to a transport.
///
/// Resource methods construct one of these per endpoint, declaring the
/// endpoint's paging constraints up front, and hand it to the pagination
/// engine as its fetch operation.
pub struct PagedEndpoint {
    transport: Arc<Transport>,
    path: String,
    limits: PaginationLimits,
    base_query: Vec<(String, String)>,
}

impl PagedEndpoint {
    /// Bind a path and its declared limits to a transport
    pub fn new(
        transport: Arc<Transport>,
        path: impl Into<String>,
        limits: PaginationLimits,
    ) -> Self {
        Self {
            transport,
            path: path.into(),
            limits,
            base_query: Vec::new(),
        }
    }

    /// Add a caller-supplied query parameter sent with every page
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_query.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl AsyncPageFetcher for PagedEndpoint {
    fn limits(&self) -> PaginationLimits {
        self.limits
    }

    async fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>> {
        let mut query = self.base_query.clone();
        query.push(("offset".to_string(), request.offset.to_string()));
        query.push(("limit".to_string(), request.limit.to_string()));
        if let Some(start) = request.start {
            query.push(("start".to_string(), start.to_string()));
        }
        if let Some(to) = request.to {
            query.push(("to".to_string(), to.to_string()));
        }
        self.transport.get_page(&self.path, &query).await
    }
}
