//! Error types for pagepool
//!
//! This module defines the error hierarchy for the whole crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for pagepool
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A well-formed HTTP success response whose body could not be decoded.
    /// Signals a contract violation on the remote side and is never retried.
    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Pagination Errors
    // ============================================================================
    /// The target operation does not structurally support pagination.
    /// Raised at iterator construction, never mid-iteration.
    #[error("Operation does not support pagination: {message}")]
    PaginationContract { message: String },

    /// An invalid mutation of live cursor state. The cursor is left unchanged.
    #[error("Invalid cursor state: {message}")]
    CursorState { message: String },

    // ============================================================================
    // Cancellation
    // ============================================================================
    #[error("Operation cancelled")]
    Cancelled,

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a pagination contract error
    pub fn pagination_contract(message: impl Into<String>) -> Self {
        Self::PaginationContract {
            message: message.into(),
        }
    }

    /// Create a cursor state error
    pub fn cursor_state(message: impl Into<String>) -> Self {
        Self::CursorState {
            message: message.into(),
        }
    }

    /// Check if this error is a transient transport failure worth retrying.
    ///
    /// Retryable: timeouts, connection-level failures (including TLS),
    /// truncated bodies, 429 and any 5xx. Not retryable: other 4xx,
    /// malformed JSON in a success response, pagination and cursor errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::RateLimited { .. } => true,
            Error::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || self.is_tls()
            }
            Error::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Check if this error looks like a TLS/SSL connection failure.
    ///
    /// reqwest does not expose the TLS error kind directly, so the source
    /// chain is matched textually. TLS errors are always retryable and are
    /// additionally reported to the concurrency governor.
    pub fn is_tls(&self) -> bool {
        let Error::Http(e) = self else {
            return false;
        };
        let mut text = e.to_string().to_lowercase();
        let mut source = std::error::Error::source(e);
        while let Some(inner) = source {
            text.push_str(&inner.to_string().to_lowercase());
            source = inner.source();
        }
        ["tls", "ssl", "certificate", "handshake"]
            .iter()
            .any(|needle| text.contains(needle))
    }
}

/// Result type alias for pagepool
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("bad base url");
        assert_eq!(err.to_string(), "Configuration error: bad base url");

        let err = Error::status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");

        let err = Error::cursor_state("offset beyond ceiling");
        assert_eq!(err.to_string(), "Invalid cursor state: offset beyond ceiling");
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::RateLimited {
            retry_after_seconds: 60
        }
        .is_retryable());
        assert!(Error::Timeout { timeout_ms: 1000 }.is_retryable());
        assert!(Error::status(429, "").is_retryable());
        assert!(Error::status(500, "").is_retryable());
        assert!(Error::status(503, "").is_retryable());

        assert!(!Error::status(400, "").is_retryable());
        assert!(!Error::status(401, "").is_retryable());
        assert!(!Error::status(404, "").is_retryable());
        assert!(!Error::decode("truncated envelope").is_retryable());
        assert!(!Error::pagination_contract("no limits").is_retryable());
        assert!(!Error::cursor_state("exhausted").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_is_tls_only_for_http_errors() {
        assert!(!Error::status(500, "tls handshake").is_tls());
        assert!(!Error::decode("certificate").is_tls());
        assert!(!Error::Cancelled.is_tls());
    }
}
