// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-target admission control.
//!
//! Every outbound call to a rate-limited target goes through
//! [`RateLimiter::execute`]:
//!
//! ```text
//!  caller ──► circuit admission ──► concurrency gate ──► pacing window ──► operation
//!               │ open: fail fast      (FIFO semaphore)    (sleep until a     │
//!               ▼                                           slot frees up)   │
//!          CircuitOpen                                                       ▼
//!                          ◄──── backoff (multiplier^attempt × 1s) ◄──── failure/timeout
//! ```
//!
//! The pacing slot is reserved right before the operation starts, after the
//! gate, so the timestamps in the window are real dispatch times and no
//! rolling one-second window ever holds more than `requests_per_second`
//! dispatches, however many callers there are.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, instrument, warn};

use crate::config::{TargetProfile, TargetSystem};
use crate::options::CallOptions;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState};
use crate::resilience::retry::BackoffPolicy;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Outcome of a call that did not produce a value.
#[derive(Debug, Error)]
pub enum LimiterError<E> {
    /// Admission failure: rejected before any network attempt
    #[error("{target}: circuit open, request rejected (retry in {retry_in:?})")]
    CircuitOpen { target: TargetSystem, retry_in: Duration },

    /// The last attempt timed out; the retry budget is spent
    #[error("{target}: timed out after {after:?} ({attempts} attempts)")]
    Timeout { target: TargetSystem, after: Duration, attempts: u32 },

    /// Terminal failure after retries
    #[error("{target}: failed after {attempts} attempts: {source}")]
    Exhausted {
        target: TargetSystem,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The limiter was closed for shutdown
    #[error("{target}: rate limiter shut down")]
    Shutdown { target: TargetSystem },
}

impl<E> LimiterError<E> {
    #[must_use]
    pub fn target(&self) -> TargetSystem {
        match self {
            Self::CircuitOpen { target, .. }
            | Self::Timeout { target, .. }
            | Self::Exhausted { target, .. }
            | Self::Shutdown { target } => *target,
        }
    }

    /// True if the call never reached the target.
    #[must_use]
    pub fn is_admission_failure(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Shutdown { .. })
    }

    /// The operation's own error, if that is what ended the call.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Sliding windows of dispatch timestamps.
#[derive(Debug, Default)]
struct CallWindow {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
}

impl CallWindow {
    fn prune(&mut self, now: Instant) {
        while self.second.front().is_some_and(|t| now.duration_since(*t) >= SECOND) {
            self.second.pop_front();
        }
        while self.minute.front().is_some_and(|t| now.duration_since(*t) >= MINUTE) {
            self.minute.pop_front();
        }
    }

    /// Reserve a dispatch slot at `now`, or say how long to wait for one.
    fn try_reserve(&mut self, now: Instant, per_second: usize, per_minute: usize) -> Result<(), Duration> {
        self.prune(now);

        let mut wait = Duration::ZERO;
        if self.second.len() >= per_second {
            let oldest = self.second[self.second.len() - per_second];
            wait = wait.max((oldest + SECOND).saturating_duration_since(now));
        }
        if self.minute.len() >= per_minute {
            let oldest = self.minute[self.minute.len() - per_minute];
            wait = wait.max((oldest + MINUTE).saturating_duration_since(now));
        }
        if !wait.is_zero() {
            return Err(wait);
        }

        self.second.push_back(now);
        self.minute.push_back(now);
        Ok(())
    }
}

/// Point-in-time view of one target's budget.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub target: TargetSystem,
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub remaining_second: usize,
    pub remaining_minute: usize,
    pub in_flight: usize,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub timed_out_calls: u64,
}

/// Counts one attempt as in flight until dropped, so a caller that gives up
/// mid-call does not leave it counted.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Rate limiter + circuit breaker for one target system.
pub struct RateLimiter {
    target: TargetSystem,
    profile: TargetProfile,
    window: Mutex<CallWindow>,
    gate: Arc<Semaphore>,
    breaker: CircuitBreaker,

    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    timed_out: AtomicU64,
}

impl RateLimiter {
    pub fn new(target: TargetSystem, profile: TargetProfile) -> Self {
        let breaker = CircuitBreaker::new(
            target.as_str(),
            CircuitConfig {
                failure_threshold: profile.circuit_breaker_threshold.max(1),
                cooldown: profile.cooldown(),
            },
        );
        Self {
            target,
            gate: Arc::new(Semaphore::new(profile.max_concurrent.max(1))),
            profile,
            window: Mutex::new(CallWindow::default()),
            breaker,
            in_flight: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn target(&self) -> TargetSystem {
        self.target
    }

    #[must_use]
    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `operation` under this target's budget.
    ///
    /// `operation` is invoked once per attempt. Terminal failures are always
    /// returned, never swallowed.
    #[instrument(skip_all, fields(target = %self.target, priority = %options.priority))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: &CallOptions,
    ) -> Result<T, LimiterError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let policy = BackoffPolicy::new(
            options.retry_attempts.unwrap_or(self.profile.retry_attempts),
            self.profile.backoff_multiplier,
        );
        let call_timeout = options.timeout.or_else(|| self.profile.timeout());
        let mut attempt: u32 = 0;

        loop {
            let admission = match self.breaker.try_acquire() {
                Ok(admission) => admission,
                Err(retry_in) => {
                    crate::metrics::record_rate_limited_call(self.target.as_str(), "rejected");
                    debug!(retry_in_ms = retry_in.as_millis() as u64, "Circuit open, call rejected");
                    return Err(LimiterError::CircuitOpen { target: self.target, retry_in });
                }
            };

            let Ok(permit) = self.gate.clone().acquire_owned().await else {
                return Err(LimiterError::Shutdown { target: self.target });
            };
            self.pace().await;

            let in_flight = InFlight::enter(&self.in_flight);
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            let outcome = match call_timeout {
                Some(limit) => timeout(limit, operation()).await.map_err(|_| limit),
                None => Ok(operation().await),
            };
            drop(in_flight);
            drop(permit);

            attempt += 1;
            let failure = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success(admission);
                    crate::metrics::record_rate_limited_call(self.target.as_str(), "success");
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure(admission);
                    crate::metrics::record_rate_limited_call(self.target.as_str(), "failure");
                    warn!(attempt, error = %e, "Rate-limited call failed");
                    LimiterError::Exhausted { target: self.target, attempts: attempt, source: e }
                }
                Err(after) => {
                    self.breaker.record_failure(admission);
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_rate_limited_call(self.target.as_str(), "timeout");
                    warn!(attempt, timeout_ms = after.as_millis() as u64, "Rate-limited call timed out");
                    LimiterError::Timeout { target: self.target, after, attempts: attempt }
                }
            };

            if !policy.should_retry(attempt - 1) {
                return Err(failure);
            }
            let delay = policy.delay_for(attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            sleep(delay).await;
        }
    }

    /// Wait for a free slot in both windows and reserve it.
    async fn pace(&self) {
        let per_second = self.profile.requests_per_second.max(1) as usize;
        let per_minute = self.profile.minute_ceiling().max(1) as usize;
        loop {
            let reserved = self.window.lock().try_reserve(Instant::now(), per_second, per_minute);
            match reserved {
                Ok(()) => return,
                Err(wait) => {
                    crate::metrics::record_pacing_wait(self.target.as_str(), wait);
                    debug!(wait_ms = wait.as_millis() as u64, "Pacing");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Stop admitting calls; waiters on the gate fail with `Shutdown`.
    pub fn close(&self) {
        self.gate.close();
    }

    #[must_use]
    pub fn status(&self) -> RateLimitStatus {
        let (last_second, last_minute) = {
            let mut window = self.window.lock();
            window.prune(Instant::now());
            (window.second.len(), window.minute.len())
        };
        let per_second = self.profile.requests_per_second as usize;
        let per_minute = self.profile.minute_ceiling() as usize;

        RateLimitStatus {
            target: self.target,
            requests_last_second: last_second,
            requests_last_minute: last_minute,
            remaining_second: per_second.saturating_sub(last_second),
            remaining_minute: per_minute.saturating_sub(last_minute),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            circuit_state: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            success_rate: self.breaker.success_rate(),
            total_calls: self.dispatched.load(Ordering::Relaxed),
            rejected_calls: self.breaker.rejections(),
            timed_out_calls: self.timed_out.load(Ordering::Relaxed),
        }
    }
}
