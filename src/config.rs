//! Client configuration
//!
//! The configuration surface consumed from outside the core: transport
//! behavior (timeouts, retries, backoff, rate limiting) and the
//! concurrency governor's tunables.

use crate::transport::GovernorConfig;
use crate::types::BackoffType;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a transport
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL joined with request paths
    pub base_url: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Total attempt budget per logical request
    pub max_attempts: u32,
    /// Initial delay for backoff
    pub initial_backoff: Duration,
    /// Maximum delay for backoff
    pub max_backoff: Duration,
    /// Type of backoff strategy
    pub backoff_type: BackoffType,
    /// Settle delay inserted after a TLS error before the retry backoff
    pub tls_settle_delay: Duration,
    /// Request-rate limiter configuration, `None` to disable
    pub rate_limit: Option<RateLimitConfig>,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
    /// Concurrency governor tunables (async transport only)
    pub governor: GovernorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
            tls_settle_delay: Duration::from_secs(1),
            rate_limit: Some(RateLimitConfig::default()),
            default_headers: HashMap::new(),
            user_agent: format!("pagepool/{}", env!("CARGO_PKG_VERSION")),
            governor: GovernorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`]
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the total attempt budget
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.config.backoff_type = backoff_type;
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set the post-TLS-error settle delay
    pub fn tls_settle_delay(mut self, delay: Duration) -> Self {
        self.config.tls_settle_delay = delay;
        self
    }

    /// Set the request-rate limiter
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    /// Disable request-rate limiting
    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit = None;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Set the governor tunables
    pub fn governor(mut self, governor: GovernorConfig) -> Self {
        self.config.governor = governor;
        self
    }

    /// Build the config
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Configuration for the transport-level request-rate limiter.
///
/// This is a time-based token bucket against the remote's request-rate
/// ceiling, distinct from the governor's concurrency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of requests per second
    pub requests_per_second: u32,
    /// Burst size (max tokens in the bucket)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 10,
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit config
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }
}
