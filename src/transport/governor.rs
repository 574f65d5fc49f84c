//! Adaptive concurrency governor
//!
//! Bounds the number of concurrent in-flight requests with a counting
//! semaphore and adapts that bound to network conditions: repeated
//! TLS/connection errors halve the ceiling, sustained quiet periods grow
//! it back toward the original high-water mark.

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Absolute upper bound for the concurrency ceiling, applied to manual
/// overrides and initial configuration alike
pub const HARD_CEILING: usize = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for the concurrency governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    /// Starting (and high-water) concurrency ceiling
    pub max_concurrent_requests: usize,
    /// TLS/connection errors tolerated before the ceiling is halved
    pub ssl_error_threshold: u32,
    /// Floor the ceiling never degrades below
    pub min_connections: usize,
    /// Cadence of recovery checks, and the quiet period required to grow
    pub recovery_interval: Duration,
    /// Enable the degradation/recovery transitions
    pub adaptive: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 30,
            ssl_error_threshold: 5,
            min_connections: 5,
            recovery_interval: Duration::from_secs(300),
            adaptive: true,
        }
    }
}

impl GovernorConfig {
    /// Set the starting ceiling
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set the TLS error threshold
    #[must_use]
    pub fn with_ssl_error_threshold(mut self, threshold: u32) -> Self {
        self.ssl_error_threshold = threshold;
        self
    }

    /// Set the degradation floor
    #[must_use]
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the recovery interval
    #[must_use]
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Enable or disable adaptive behavior
    #[must_use]
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }
}

// ============================================================================
// Governor
// ============================================================================

/// Capacity, counters, and the gate itself: mutated only as one unit
/// under the governor's mutex.
#[derive(Debug)]
struct GovernorState {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    initial_capacity: usize,
    error_count: u32,
    last_error_at: Option<Instant>,
    last_recovery_check_at: Option<Instant>,
}

/// A held unit of governor capacity.
///
/// Dropping the permit releases the unit back to the gate it was acquired
/// from. Permits acquired before a capacity change keep their original
/// gate; capacity changes never preempt in-flight requests.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

/// Process-scoped bounded-parallelism gate with adaptive transitions.
///
/// Intended to be shared: clone an `Arc<ConcurrencyGovernor>` into every
/// transport that should respect one combined ceiling against the remote
/// service, or use [`shared`](Self::shared) for a process-wide default.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl ConcurrencyGovernor {
    /// Create a governor with the given tunables.
    ///
    /// The starting ceiling is clamped to `1..=`[`HARD_CEILING`].
    pub fn new(config: GovernorConfig) -> Self {
        let capacity = config.max_concurrent_requests.clamp(1, HARD_CEILING);
        Self {
            config,
            state: Mutex::new(GovernorState {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                initial_capacity: capacity,
                error_count: 0,
                last_error_at: None,
                last_recovery_check_at: None,
            }),
        }
    }

    /// The process-wide default governor.
    ///
    /// Transports built against this instance share one ceiling no matter
    /// how many client values the process creates.
    pub fn shared() -> Arc<ConcurrencyGovernor> {
        static SHARED: Lazy<Arc<ConcurrencyGovernor>> =
            Lazy::new(|| Arc::new(ConcurrencyGovernor::new(GovernorConfig::default())));
        Arc::clone(&SHARED)
    }

    /// The governor's tunables
    pub fn config(&self) -> GovernorConfig {
        self.config
    }

    /// Acquire one unit of capacity, suspending while the gate is
    /// saturated. Runs a throttled recovery check on the way in.
    pub async fn acquire(&self) -> Permit {
        self.maybe_recover();
        let semaphore = {
            let state = self.lock();
            Arc::clone(&state.semaphore)
        };
        // The semaphore is never closed; acquire_owned can only fail then.
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("governor semaphore closed");
        Permit { _permit: permit }
    }

    /// Report one TLS/connection error.
    ///
    /// At the configured threshold (with adaptive behavior enabled and the
    /// ceiling above the floor) the ceiling halves, floor-clamped, and the
    /// counter resets.
    pub fn record_tls_error(&self) {
        let mut state = self.lock();
        state.error_count += 1;
        state.last_error_at = Some(Instant::now());
        if self.config.adaptive
            && state.error_count >= self.config.ssl_error_threshold
            && state.capacity > self.config.min_connections
        {
            let reduced = (state.capacity / 2).max(self.config.min_connections);
            warn!(
                from = state.capacity,
                to = reduced,
                "halving concurrency ceiling after repeated TLS errors"
            );
            state.capacity = reduced;
            state.error_count = 0;
            state.semaphore = Arc::new(Semaphore::new(reduced));
        }
    }

    /// Run one recovery check immediately, bypassing the cadence throttle.
    ///
    /// Grows the ceiling by `max(1, capacity / 2)` - capped at the
    /// original high-water mark - when it sits below that mark and no
    /// error has been recorded for a full recovery interval.
    pub fn run_recovery_check(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        state.last_recovery_check_at = Some(now);
        self.recover_locked(&mut state, now);
    }

    /// Manually override the ceiling, clamped to `1..=`[`HARD_CEILING`].
    ///
    /// Recreates the gate at the new size; requests holding units of the
    /// old gate are unaffected. Returns the clamped value.
    pub fn set_capacity(&self, capacity: usize) -> usize {
        let clamped = capacity.clamp(1, HARD_CEILING);
        let mut state = self.lock();
        debug!(from = state.capacity, to = clamped, "concurrency ceiling set manually");
        state.capacity = clamped;
        state.semaphore = Arc::new(Semaphore::new(clamped));
        clamped
    }

    /// Current ceiling. Reads are not linearizable with concurrent
    /// transitions; intended for display and tests.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Point-in-time view of the governor's state
    pub fn snapshot(&self) -> GovernorSnapshot {
        let state = self.lock();
        GovernorSnapshot {
            capacity: state.capacity,
            initial_capacity: state.initial_capacity,
            error_count: state.error_count,
            available: state.semaphore.available_permits(),
        }
    }

    /// Throttled recovery: at most one check per recovery interval
    fn maybe_recover(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        if let Some(checked_at) = state.last_recovery_check_at {
            if now.duration_since(checked_at) < self.config.recovery_interval {
                return;
            }
        }
        state.last_recovery_check_at = Some(now);
        self.recover_locked(&mut state, now);
    }

    fn recover_locked(&self, state: &mut GovernorState, now: Instant) {
        if !self.config.adaptive || state.capacity >= state.initial_capacity {
            return;
        }
        let quiet = state
            .last_error_at
            .map_or(true, |at| now.duration_since(at) >= self.config.recovery_interval);
        if !quiet {
            return;
        }
        let grown = (state.capacity + (state.capacity / 2).max(1)).min(state.initial_capacity);
        debug!(
            from = state.capacity,
            to = grown,
            "growing concurrency ceiling after quiet recovery interval"
        );
        state.capacity = grown;
        state.semaphore = Arc::new(Semaphore::new(grown));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time readout of governor state, for display and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSnapshot {
    /// Current ceiling
    pub capacity: usize,
    /// Original high-water mark
    pub initial_capacity: usize,
    /// TLS errors counted since the last degradation
    pub error_count: u32,
    /// Units currently available on the gate
    pub available: usize,
}
