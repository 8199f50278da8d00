// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Retry executor for backend calls
//!
//! Every attempt pings the cached store handle and reconnects through the
//! [`Connector`] when the ping fails. Connection-class failures are retried
//! with capped, jittered exponential backoff until the wall-clock budget (or
//! the optional attempt budget) is spent. Anything else is returned at once.
//!
//! The backoff sleep races the shutdown token, so closing the memory aborts
//! in-flight retries with [`MemoryError::Cancelled`].

use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::config::RetryConfig;
use crate::domain::{BackendError, Connector, HealthCheck, MemoryError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_wall_clock: Duration,
    pub base_interval: Duration,
    pub max_interval: Duration,
    /// Applies to each call on its own, independent of the wall clock
    pub call_timeout: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_wall_clock: Duration::from_secs(30),
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_wall_clock: Duration::from_secs(config.max_wall_clock_secs),
            base_interval: Duration::from_millis(config.base_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// `min(base * 2^(attempt-1), max_interval)` for a 1-based attempt
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Backoff plus uniform jitter of up to 10% of the delay
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.compute_delay(attempt);
        let jitter = rand::rng().random_range(0.0..=0.1);
        delay + delay.mul_f64(jitter)
    }
}

pub struct RetryExecutor<H: ?Sized + HealthCheck + 'static> {
    name: String,
    connector: Arc<dyn Connector<H>>,
    handle: Mutex<Option<Arc<H>>>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl<H: ?Sized + HealthCheck + 'static> RetryExecutor<H> {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn Connector<H>>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            handle: Mutex::new(None),
            policy,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` against a live handle, retrying connection-class failures
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, MemoryError>
    where
        F: FnMut(Arc<H>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.execute_with(&self.policy, operation, op).await
    }

    /// Same as [`execute`](Self::execute) under a different budget, sharing the handle
    pub async fn execute_with<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        mut op: F,
    ) -> Result<T, MemoryError>
    where
        F: FnMut(Arc<H>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_error: Option<BackendError> = None;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(MemoryError::Cancelled);
            }
            if attempts > 0 && started.elapsed() >= policy.max_wall_clock {
                break;
            }
            attempts += 1;

            let result = match self.acquire().await {
                Ok(handle) => match tokio::time::timeout(policy.call_timeout, op(handle)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(policy.call_timeout)),
                },
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(executor = %self.name, operation, attempts, "Operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    warn!(executor = %self.name, operation, attempt = attempts, error = %err, "Non-retryable backend error");
                    return Err(MemoryError::Backend(err));
                }
                Err(err) => err,
            };

            // Next attempt reconnects
            self.invalidate();

            if policy.max_attempts.is_some_and(|max| attempts >= max) {
                last_error = Some(err);
                break;
            }

            let remaining = policy.max_wall_clock.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                last_error = Some(err);
                break;
            }
            let delay = policy.jittered_delay(attempts).min(remaining);

            warn!(
                executor = %self.name,
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying backend call"
            );
            metrics::counter!("strata_retry_attempts_total", "executor" => self.name.clone()).increment(1);
            last_error = Some(err);

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(MemoryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "retry budget exhausted".to_string());
        warn!(executor = %self.name, operation, attempts, error = %last_error, "Retry budget exhausted");
        Err(MemoryError::RetryExhausted {
            operation: operation.to_string(),
            attempts,
            last_error,
        })
    }

    /// Lightweight liveness check on the current handle, connecting if needed
    pub async fn ping(&self) -> Result<(), BackendError> {
        let handle = self.acquire().await?;
        match tokio::time::timeout(self.policy.call_timeout, handle.ping()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.policy.call_timeout)),
        }
    }

    /// Cached handle if it still answers a ping, a fresh one otherwise
    async fn acquire(&self) -> Result<Arc<H>, BackendError> {
        let cached = self.handle.lock().clone();
        if let Some(handle) = cached {
            match tokio::time::timeout(self.policy.call_timeout, handle.ping()).await {
                Ok(Ok(())) => return Ok(handle),
                Ok(Err(e)) => {
                    debug!(executor = %self.name, error = %e, "Health check failed, reconnecting");
                }
                Err(_) => {
                    debug!(executor = %self.name, "Health check timed out, reconnecting");
                }
            }
            self.invalidate();
        }

        let fresh = tokio::time::timeout(self.policy.call_timeout, self.connector.connect())
            .await
            .map_err(|_| BackendError::Timeout(self.policy.call_timeout))??;
        debug!(executor = %self.name, backend = self.connector.backend_name(), "Connected");
        *self.handle.lock() = Some(fresh.clone());
        Ok(fresh)
    }

    fn invalidate(&self) {
        self.handle.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Pingable {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthCheck for Pingable {
        async fn ping(&self) -> Result<(), BackendError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BackendError::ConnectionLost("ping".into()))
            }
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicU32,
    }

    #[async_trait]
    impl Connector<Pingable> for CountingConnector {
        async fn connect(&self) -> Result<Arc<Pingable>, BackendError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Pingable {
                healthy: AtomicBool::new(true),
            }))
        }

        fn backend_name(&self) -> &str {
            "pingable"
        }
    }

    fn executor(connector: Arc<CountingConnector>, policy: RetryPolicy) -> RetryExecutor<Pingable> {
        RetryExecutor::new("test", connector, policy, CancellationToken::new())
    }

    #[test]
    fn test_compute_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.compute_delay(1), Duration::from_secs(1));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(2));
        assert_eq!(policy.compute_delay(4), Duration::from_secs(8));
        assert_eq!(policy.compute_delay(5), Duration::from_secs(10));
        assert_eq!(policy.compute_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let base = policy.compute_delay(attempt);
            let jittered = policy.jittered_delay(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + base.mul_f64(0.1) + Duration::from_nanos(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector.clone(), RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result = exec
            .execute("upsert", |_handle| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BackendError::ConnectionLost("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Each failure drops the handle
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_immediately() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector, RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = exec
            .execute("query", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::Rejected("syntax error".into())) }
            })
            .await;

        assert!(matches!(result, Err(MemoryError::Backend(BackendError::Rejected(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_exhausted() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector, RetryPolicy::default().with_max_attempts(3));

        let result: Result<(), _> = exec
            .execute("upsert_concept", |_| async {
                Err(BackendError::SessionExpired("token".into()))
            })
            .await;

        match result {
            Err(MemoryError::RetryExhausted {
                operation,
                attempts,
                last_error,
            }) => {
                assert_eq!(operation, "upsert_concept");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("session expired"));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_budget_exhausted() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector, RetryPolicy::default());
        let started = Instant::now();

        let result: Result<(), _> = exec
            .execute("search", |_| async {
                Err(BackendError::ConnectionLost("refused".into()))
            })
            .await;

        let elapsed = started.elapsed();
        match result {
            Err(MemoryError::RetryExhausted { attempts, .. }) => assert!(attempts >= 5),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_retryable() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector, RetryPolicy::default().with_max_attempts(2));

        let result: Result<(), _> = exec
            .execute("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(MemoryError::RetryExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_handle_is_replaced() {
        let connector = Arc::new(CountingConnector::default());
        let exec = executor(connector.clone(), RetryPolicy::default());

        exec.ping().await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        // Healthy handle is reused
        exec.execute("noop", |_| async { Ok(()) }).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        if let Some(handle) = exec.handle.lock().as_ref() {
            handle.healthy.store(false, Ordering::SeqCst);
        }
        exec.execute("noop", |_| async { Ok(()) }).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let connector = Arc::new(CountingConnector::default());
        let token = CancellationToken::new();
        let exec = Arc::new(RetryExecutor::new(
            "test",
            connector as Arc<dyn Connector<Pingable>>,
            RetryPolicy::default(),
            token.clone(),
        ));

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute("upsert", |_| async {
                    Err::<(), _>(BackendError::ConnectionLost("down".into()))
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(MemoryError::Cancelled)));
    }
}
