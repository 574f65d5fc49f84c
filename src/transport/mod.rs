//! Transport module
//!
//! Everything between the pagination engine and the network: the retry
//! policy, the adaptive concurrency governor, and the async and blocking
//! HTTP transports that tie them together.
//!
//! # Overview
//!
//! A [`Transport`] issues one HTTP request per attempt. Each attempt
//! acquires a unit of [`ConcurrencyGovernor`] capacity before calling out
//! and releases it when the attempt completes. Failures are classified by
//! [`RetryPolicy`]; TLS-looking connection errors additionally feed the
//! governor's degradation counter before any retry sleep. The
//! [`BlockingTransport`] mirrors the retry behavior without a concurrency
//! bound.

mod blocking;
mod client;
mod governor;
mod retry;

pub use blocking::{BlockingPagedEndpoint, BlockingTransport};
pub use client::{PagedEndpoint, Transport};
// `self::` disambiguates from the governor crate used by the client.
pub use self::governor::{
    ConcurrencyGovernor, GovernorConfig, GovernorSnapshot, Permit, HARD_CEILING,
};
pub use retry::RetryPolicy;

#[cfg(test)]
mod tests;
