//! # pagepool
//!
//! Client core for paginated, rate-limited remote HTTP APIs.
//!
//! ## Features
//!
//! - **Pagination engine**: turns a bounded limit/offset (or
//!   timestamp-cursor) paged endpoint into one logical sequence of items,
//!   with deduplication and multiple consumption modes
//! - **Adaptive concurrency**: a process-scoped governor bounds in-flight
//!   requests and self-tunes its ceiling on TLS error bursts and recovery
//! - **Classified retries**: transient transport failures retry with
//!   jittered exponential backoff; terminal API errors surface immediately
//! - **Sync and async**: a blocking transport for simple callers and an
//!   async transport that carries the concurrency model
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pagepool::{
//!     ClientConfig, CollectOptions, MaxItems, PagedEndpoint, PaginationLimits, Transport,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pagepool::Result<()> {
//!     let transport = Arc::new(Transport::new(
//!         ClientConfig::builder()
//!             .base_url("https://api.example.com")
//!             .build(),
//!     )?);
//!
//!     let endpoint = PagedEndpoint::new(
//!         Arc::clone(&transport),
//!         "/v1/matches",
//!         PaginationLimits::new(100, 10_000)?,
//!     );
//!
//!     let (result, warnings) = pagepool::gather(
//!         endpoint,
//!         CollectOptions::new().with_max_items(MaxItems::Items(500)),
//!     )
//!     .await?;
//!
//!     println!("{} items, {} warnings", result.len(), warnings.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! resource method
//!       │ hands its paged operation to
//!       ▼
//! Collector ── PageIterator/PageStream ── PageCursor
//!       │                │
//!       │                ▼
//!       │           Transport ── RetryPolicy
//!       │                │
//!       ▼                ▼
//!   Collected    ConcurrencyGovernor ── network
//! ```

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the crate
pub mod error;

/// Common types and non-fatal diagnostics
pub mod types;

/// Client configuration
pub mod config;

/// Pagination engine: cursor, iterators, collector
pub mod pagination;

/// Transport: retry, concurrency governor, HTTP clients
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::{ClientConfig, RateLimitConfig};
pub use pagination::{
    collect, gather, AsyncPageFetcher, CollectOptions, Collected, Collector, ItemCollection,
    ItemPage, MaxItems, PageCursor, PageEnvelope, PageFetcher, PageIterator, PageRequest,
    PageStream, PaginationLimits, ReturnFormat, UnixCursor, UnixPageIterator, UnixPageStream,
};
pub use transport::{
    BlockingPagedEndpoint, BlockingTransport, ConcurrencyGovernor, GovernorConfig, PagedEndpoint,
    RetryPolicy, Transport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
