//! Retry decisions and backoff
//!
//! Decides whether a failed attempt is worth repeating and how long to
//! wait before it, using randomized (full-jitter) exponential backoff
//! with a capped maximum delay.

use crate::error::Error;
use crate::types::BackoffType;
use std::time::Duration;

/// Retry policy for one logical request.
///
/// The attempt budget counts total attempts, not retries: the default of
/// 3 means one initial attempt plus up to two retries. After the budget
/// is spent the last error propagates unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_type: BackoffType,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given total attempt budget
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Set the backoff shape and bounds
    #[must_use]
    pub fn with_backoff(
        mut self,
        backoff_type: BackoffType,
        initial: Duration,
        max: Duration,
    ) -> Self {
        self.backoff_type = backoff_type;
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Disable jitter; useful for deterministic tests
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total attempt budget
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether to retry after the given 1-based failed attempt.
    ///
    /// TLS-looking connection errors are always retryable regardless of
    /// the base classification.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        error.is_tls() || error.is_retryable()
    }

    /// Backoff delay after the given 1-based failed attempt, capped at the
    /// configured maximum and jittered unless disabled.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match self.backoff_type {
            BackoffType::Constant => self.initial_backoff,
            BackoffType::Linear => self.initial_backoff.saturating_mul(attempt),
            BackoffType::Exponential => self
                .initial_backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        let capped = base.min(self.max_backoff);
        if self.jitter {
            full_jitter(capped)
        } else {
            capped
        }
    }
}

/// Full jitter: a random delay in `1..=capped` milliseconds, which spreads
/// recovering clients instead of synchronizing them
fn full_jitter(capped: Duration) -> Duration {
    let ms = (capped.as_millis() as u64).max(1);
    Duration::from_millis(rand::random::<u64>() % ms + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_respects_attempt_budget() {
        let policy = RetryPolicy::new(3);
        let err = Error::Timeout { timeout_ms: 10_000 };

        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));
        assert!(!policy.should_retry(&err, 4));
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = RetryPolicy::new(3);

        assert!(policy.should_retry(&Error::status(500, ""), 1));
        assert!(policy.should_retry(&Error::status(503, ""), 1));
        assert!(policy.should_retry(
            &Error::RateLimited {
                retry_after_seconds: 1
            },
            1
        ));

        assert!(!policy.should_retry(&Error::status(404, ""), 1));
        assert!(!policy.should_retry(&Error::decode("bad envelope"), 1));
        assert!(!policy.should_retry(&Error::Cancelled, 1));
    }

    #[test]
    fn test_backoff_exponential_growth() {
        let policy = RetryPolicy::new(5)
            .with_backoff(
                BackoffType::Exponential,
                Duration::from_millis(100),
                Duration::from_secs(10),
            )
            .without_jitter();

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_respects_cap() {
        let policy = RetryPolicy::new(10)
            .with_backoff(
                BackoffType::Exponential,
                Duration::from_millis(100),
                Duration::from_millis(500),
            )
            .without_jitter();

        assert_eq!(policy.backoff(9), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy::new(5).with_backoff(
            BackoffType::Exponential,
            Duration::from_millis(100),
            Duration::from_secs(1),
        );

        for attempt in 1..8 {
            let delay = policy.backoff(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_backoff_linear() {
        let policy = RetryPolicy::new(4)
            .with_backoff(
                BackoffType::Linear,
                Duration::from_millis(100),
                Duration::from_secs(10),
            )
            .without_jitter();

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_zero_attempt_budget_clamped() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
    }
}
