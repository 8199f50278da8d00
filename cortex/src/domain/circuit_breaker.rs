// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Circuit breaker guarding one backing store
//!
//! States:
//!   Closed   : calls pass through
//!   Open     : calls are rejected until `reset_timeout` has elapsed since the
//!              last recorded failure
//!   HalfOpen : exactly one trial call is let through; its outcome closes or
//!              re-opens the circuit
//!
//! State lives behind a mutex so a breaker can be shared across tokio worker
//! threads. Time is read through a [`Clock`] so tests can move it forward.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::error::MemoryError;

/// Source of monotonic time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub max_failures: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self::with_clock(name, max_failures, reset_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        max_failures: u32,
        reset_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            max_failures: max_failures.max(1),
            reset_timeout,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the next call may proceed
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// admits this one call; later calls are refused until the trial outcome
    /// is recorded.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|at| self.clock.now().saturating_duration_since(at) > self.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(breaker = %self.name, "Circuit half-open, admitting one trial call");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(breaker = %self.name, "Circuit closed after successful trial");
        }
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(self.clock.now());
        inner.trial_in_flight = false;

        if inner.failure_count >= self.max_failures && inner.state != BreakerState::Open {
            inner.state = BreakerState::Open;
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                cooldown_secs = self.reset_timeout.as_secs(),
                "Circuit opened"
            );
            metrics::counter!("strata_breaker_opened_total", "tier" => self.name.clone()).increment(1);
        }
    }

    /// Settle an admitted call from its result
    pub fn record_result<T>(&self, result: &Result<T, MemoryError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(e) if e.counts_as_backend_failure() => self.record_failure(),
            Err(_) => self.release(),
        }
    }

    /// Give back an admitted call that ended without a backend outcome
    ///
    /// A half-open breaker admits its next trial; counters are untouched.
    pub fn release(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            max_failures: self.max_failures,
            reset_timeout_secs: self.reset_timeout.as_secs(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("max_failures", &self.max_failures)
            .field("reset_timeout", &self.reset_timeout)
            .field("state", &self.state())
            .finish()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock("episodic", 3, Duration::from_secs(60), clock)
    }

    #[test]
    fn test_opens_after_max_failures() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_full_lifecycle() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow());

        // Not yet past the reset timeout
        clock.advance(Duration::from_secs(60));
        assert!(!breaker.allow());

        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow(), "first call after cooldown is the trial");
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.allow(), "only one trial call is admitted");

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());

        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(61));
        assert!(breaker.allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());

        // A fresh cooldown starts from the failed trial
        clock.advance(Duration::from_secs(61));
        assert!(breaker.allow());
    }

    #[test]
    fn test_released_trial_admits_next_call() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());

        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(61));
        assert!(breaker.allow());
        assert!(!breaker.allow());

        breaker.release();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allow());
    }

    #[test]
    fn test_record_result_classification() {
        let breaker = CircuitBreaker::new("semantic", 2, Duration::from_secs(60));

        breaker.record_result::<()>(&Err(MemoryError::Validation("bad".into())));
        breaker.record_result::<()>(&Err(MemoryError::Cancelled));
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_result::<()>(&Err(MemoryError::RetryExhausted {
            operation: "upsert".into(),
            attempts: 3,
            last_error: "down".into(),
        }));
        assert_eq!(breaker.failure_count(), 1);

        breaker.record_result(&Ok(()));
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let breaker = CircuitBreaker::new("semantic", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn test_snapshot() {
        let breaker = CircuitBreaker::new("semantic", 5, Duration::from_secs(30));
        breaker.record_failure();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name, "semantic");
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.max_failures, 5);
        assert_eq!(snapshot.state, BreakerState::Closed);
    }
}
