// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call and per-submission options.
//!
//! Callers decide how urgent a request is and may tighten the retry/timeout
//! budget of a single call. Everything else comes from the target profile.
//!
//! # Example
//!
//! ```rust
//! use storefront_sync::{BatchOptions, CallOptions, Priority};
//! use std::time::Duration;
//!
//! // Default: normal priority, profile retries and timeout
//! let opts = CallOptions::default();
//! assert_eq!(opts.priority, Priority::Normal);
//!
//! // One-shot probe: no retries, short timeout
//! let probe = CallOptions::default()
//!     .with_retries(0)
//!     .with_timeout(Duration::from_secs(2));
//! assert_eq!(probe.retry_attempts, Some(0));
//!
//! // Batch submissions only carry a priority
//! let urgent = BatchOptions::high();
//! assert_eq!(urgent.priority, Priority::High);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dispatch priority. Ordering is `High < Normal < Low` so an ascending
/// stable sort puts the most urgent work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Options for a single rate-limited call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub priority: Priority,

    /// Overrides the profile's `retry_attempts`. `Some(0)` = single attempt.
    pub retry_attempts: Option<u32>,

    /// Overrides the profile's per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn high() -> Self {
        Self { priority: Priority::High, ..Self::default() }
    }

    #[must_use]
    pub fn low() -> Self {
        Self { priority: Priority::Low, ..Self::default() }
    }

    #[must_use]
    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for a batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub priority: Priority,
}

impl BatchOptions {
    #[must_use]
    pub fn high() -> Self {
        Self { priority: Priority::High }
    }

    #[must_use]
    pub fn low() -> Self {
        Self { priority: Priority::Low }
    }
}

impl From<Priority> for BatchOptions {
    fn from(priority: Priority) -> Self {
        Self { priority }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_sorts_high_first() {
        let mut p = vec![Priority::Low, Priority::Normal, Priority::High, Priority::Normal];
        p.sort();
        assert_eq!(p, vec![Priority::High, Priority::Normal, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn test_call_options_builders() {
        let opts = CallOptions::high().with_retries(1).with_timeout(Duration::from_millis(250));
        assert_eq!(opts.priority, Priority::High);
        assert_eq!(opts.retry_attempts, Some(1));
        assert_eq!(opts.timeout, Some(Duration::from_millis(250)));

        let opts = CallOptions::default();
        assert!(opts.retry_attempts.is_none());
        assert!(opts.timeout.is_none());
    }

    #[test]
    fn test_batch_options_from_priority() {
        assert_eq!(BatchOptions::from(Priority::Low), BatchOptions::low());
        assert_eq!(BatchOptions::default().priority, Priority::Normal);
    }

    #[test]
    fn test_priority_serde_names() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let p: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(p, Priority::Low);
    }
}
