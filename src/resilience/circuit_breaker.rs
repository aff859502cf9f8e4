// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consecutive-failure circuit breaker.
//!
//! Protects a rate-limited target system from being hammered while it is
//! failing. All transitions are lock-free:
//!
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls fail fast without reaching the network
//! - HalfOpen: cooldown elapsed; exactly one probe call is admitted
//!
//! ```text
//!            threshold consecutive failures (CAS, once)
//!   Closed ─────────────────────────────────────────────► Open
//!     ▲                                                    │
//!     │ probe succeeds                     cooldown elapses│
//!     │                                                    ▼
//!     └──────────────────────── HalfOpen ◄─────────────────┘
//!                                  │  probe fails
//!                                  └──────────────► Open (fresh opened_at)
//! ```
//!
//! A call rejected while open never counts as a failure: it did not reach
//! the target.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// How a call got through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, ordinary call
    Normal,
    /// The single post-cooldown probe
    Probe,
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures that opens the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            cooldown: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    epoch: Instant,

    consecutive_failures: AtomicU32,
    /// Micros since `epoch` when the circuit opened (0 = closed)
    opened_at_us: AtomicU64,
    /// Micros since `epoch` when the current probe was admitted (0 = none)
    probe_started_us: AtomicU64,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            epoch: Instant::now(),
            consecutive_failures: AtomicU32::new(0),
            opened_at_us: AtomicU64::new(0),
            probe_started_us: AtomicU64::new(0),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state (lock-free read)
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let opened = self.opened_at_us.load(Ordering::Acquire);
        if opened == 0 {
            CircuitState::Closed
        } else if self.now_us().saturating_sub(opened) < self.cooldown_us() {
            CircuitState::Open
        } else {
            CircuitState::HalfOpen
        }
    }

    /// Time left before a probe is allowed (zero unless open).
    #[must_use]
    pub fn remaining_cooldown(&self) -> Duration {
        let opened = self.opened_at_us.load(Ordering::Acquire);
        if opened == 0 {
            return Duration::ZERO;
        }
        let elapsed = self.now_us().saturating_sub(opened);
        Duration::from_micros(self.cooldown_us().saturating_sub(elapsed))
    }

    /// Ask to send one call.
    ///
    /// `Err` carries the remaining cooldown; the caller must not touch the
    /// target.
    pub fn try_acquire(&self) -> Result<Admission, Duration> {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let opened = self.opened_at_us.load(Ordering::Acquire);
        if opened == 0 {
            return Ok(Admission::Normal);
        }

        let now = self.now_us();
        let cooldown = self.cooldown_us();
        if now.saturating_sub(opened) < cooldown {
            return Err(self.reject(Duration::from_micros(cooldown - now.saturating_sub(opened))));
        }

        // Cooldown elapsed: exactly one caller becomes the probe. A probe that
        // never reported back (caller dropped) goes stale after one cooldown.
        let probe = self.probe_started_us.load(Ordering::Acquire);
        let stale = probe != 0 && now.saturating_sub(probe) >= cooldown;
        if (probe == 0 || stale)
            && self
                .probe_started_us
                .compare_exchange(probe, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            crate::metrics::set_circuit_state(&self.name, CircuitState::HalfOpen as u8);
            return Ok(Admission::Probe);
        }

        Err(self.reject(Duration::ZERO))
    }

    /// Report a successful call.
    ///
    /// Only the probe closes an open circuit; any success resets the
    /// consecutive-failure counter.
    pub fn record_success(&self, admission: Admission) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        if admission == Admission::Probe {
            self.opened_at_us.store(0, Ordering::Release);
            self.probe_started_us.store(0, Ordering::Release);
            crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
            info!(circuit = %self.name, "Circuit closed after successful probe");
        }
    }

    /// Report a failed call (operation error or timeout).
    pub fn record_failure(&self, admission: Admission) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let count = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if admission == Admission::Probe {
            self.opened_at_us.store(self.now_us(), Ordering::Release);
            self.probe_started_us.store(0, Ordering::Release);
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            warn!(circuit = %self.name, "Probe failed, circuit re-opened");
            return;
        }

        if count >= self.config.failure_threshold
            && self
                .opened_at_us
                .compare_exchange(0, self.now_us(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            warn!(
                circuit = %self.name,
                consecutive_failures = count,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    /// Force the circuit closed (manual recovery).
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_us.store(0, Ordering::Release);
        self.probe_started_us.store(0, Ordering::Release);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Get total number of admission requests
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors and timeouts)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Successes over completed attempts; 1.0 before any attempt completes.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let ok = self.successes();
        let done = ok + self.failures();
        if done == 0 {
            return 1.0;
        }
        ok as f64 / done as f64
    }

    fn reject(&self, retry_in: Duration) -> Duration {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        retry_in
    }

    fn cooldown_us(&self) -> u64 {
        u64::try_from(self.config.cooldown.as_micros()).unwrap_or(u64::MAX)
    }

    /// Never returns 0, which is reserved for "closed"/"no probe".
    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX).max(1)
    }
}
