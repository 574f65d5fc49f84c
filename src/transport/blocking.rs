//! Blocking transport
//!
//! The synchronous counterpart of [`Transport`](super::Transport):
//! retries block the calling thread, and there is no concurrency bound
//! beyond the caller's own threading choices, so the governor and the
//! rate limiter do not apply here.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pagination::{PageEnvelope, PageFetcher, PageRequest, PaginationLimits};
use crate::transport::retry::RetryPolicy;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Blocking HTTP transport with the same retry behavior as the async
/// variant.
pub struct BlockingTransport {
    client: reqwest::blocking::Client,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl BlockingTransport {
    /// Create a blocking transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(Error::Http)?;
        let retry = RetryPolicy::new(config.max_attempts).with_backoff(
            config.backoff_type,
            config.initial_backoff,
            config.max_backoff,
        );
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// The transport's configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch one page envelope; empty and `null` bodies return `None`
    pub fn get_page(&self, path: &str, query: &[(String, String)]) -> Result<Option<PageEnvelope>> {
        let body = self.request_text(Method::GET, path, query)?;
        super::client::decode_envelope(&body)
    }

    /// Make a GET request and decode the JSON body into a model type
    pub fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        let body = self.request_text(Method::GET, path, query)?;
        serde_json::from_str(&body).map_err(|e| Error::decode(e.to_string()))
    }

    fn request_text(&self, method: Method, path: &str, query: &[(String, String)]) -> Result<String> {
        let url = self.build_url(path)?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_once(method.clone(), &url, query) {
                Ok(body) => return Ok(body),
                Err(err) => {
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
                        std::thread::sleep(Duration::from_secs(retry_after_seconds));
                        continue;
                    }
                    std::thread::sleep(self.retry.backoff(attempt));
                }
            }
        }
    }

    fn try_once(&self, method: Method, url: &str, query: &[(String, String)]) -> Result<String> {
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.config.timeout);
        for (key, value) in &self.config.default_headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().map_err(|e| {
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
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(60);
            return Err(Error::RateLimited {
                retry_after_seconds: retry_after,
            });
        }
        if status.is_client_error() || status.is_server_error() {
            let message = response.text().unwrap_or_default();
            return Err(Error::status(status.as_u16(), message));
        }

        response.text().map_err(Error::Http)
    }

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

impl std::fmt::Debug for BlockingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One paged HTTP operation bound to a blocking transport
pub struct BlockingPagedEndpoint {
    transport: Arc<BlockingTransport>,
    path: String,
    limits: PaginationLimits,
    base_query: Vec<(String, String)>,
}

impl BlockingPagedEndpoint {
    /// Bind a path and its declared limits to a blocking transport
    pub fn new(
        transport: Arc<BlockingTransport>,
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

impl PageFetcher for BlockingPagedEndpoint {
    fn limits(&self) -> PaginationLimits {
        self.limits
    }

    fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>> {
        let mut query = self.base_query.clone();
        query.push(("offset".to_string(), request.offset.to_string()));
        query.push(("limit".to_string(), request.limit.to_string()));
        if let Some(start) = request.start {
            query.push(("start".to_string(), start.to_string()));
        }
        if let Some(to) = request.to {
            query.push(("to".to_string(), to.to_string()));
        }
        self.transport.get_page(&self.path, &query)
    }
}
