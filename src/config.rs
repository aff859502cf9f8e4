// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for admission control, batching and consistency checks.
//!
//! # Example
//!
//! ```
//! use storefront_sync::{SyncConfig, TargetSystem};
//!
//! // Defaults cover every target system and batch type
//! let config = SyncConfig::default();
//! assert_eq!(config.profile(TargetSystem::SourceApi).requests_per_second, 2);
//!
//! // Partial JSON fills the rest from defaults
//! let config: SyncConfig = serde_json::from_str(r#"{
//!     "targets": {
//!         "source_api": { "requests_per_second": 4, "max_concurrent": 2 }
//!     }
//! }"#).unwrap();
//! assert_eq!(config.profile(TargetSystem::SourceApi).requests_per_second, 4);
//! assert_eq!(config.profile(TargetSystem::SourceApi).retry_attempts, 3);
//! config.validate().unwrap();
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batching::executor::BatchType;
use crate::consistency::types::ConsistencyOptions;

/// An external dependency with its own rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSystem {
    /// The e-commerce platform API (authoritative source)
    SourceApi,
    /// The namespaced vector/search index
    SearchIndex,
    /// The language-model API used for embeddings
    LlmApi,
}

impl TargetSystem {
    pub const ALL: [TargetSystem; 3] = [Self::SourceApi, Self::SearchIndex, Self::LlmApi];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceApi => "source_api",
            Self::SearchIndex => "search_index",
            Self::LlmApi => "llm_api",
        }
    }
}

impl std::fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static request budget for one target system. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    /// Calls the minute window may run over `requests_per_minute`
    pub burst_allowance: u32,
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub backoff_multiplier: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,
    /// Per-attempt timeout (0 = none)
    pub timeout_ms: u64,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::source_api()
    }
}

impl TargetProfile {
    /// Leaky-bucket style storefront API: slow and steady.
    #[must_use]
    pub fn source_api() -> Self {
        Self {
            requests_per_second: 2,
            requests_per_minute: 80,
            burst_allowance: 40,
            max_concurrent: 3,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,
            timeout_ms: 30_000,
        }
    }

    #[must_use]
    pub fn search_index() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_minute: 500,
            burst_allowance: 20,
            max_concurrent: 5,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 30_000,
            timeout_ms: 15_000,
        }
    }

    #[must_use]
    pub fn llm_api() -> Self {
        Self {
            requests_per_second: 5,
            requests_per_minute: 300,
            burst_allowance: 10,
            max_concurrent: 4,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,
            timeout_ms: 60_000,
        }
    }

    /// Default profile for a target system.
    #[must_use]
    pub fn for_target(target: TargetSystem) -> Self {
        match target {
            TargetSystem::SourceApi => Self::source_api(),
            TargetSystem::SearchIndex => Self::search_index(),
            TargetSystem::LlmApi => Self::llm_api(),
        }
    }

    /// Fast, permissive profile for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            requests_per_second: 1000,
            requests_per_minute: 60_000,
            burst_allowance: 0,
            max_concurrent: 16,
            retry_attempts: 0,
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_ms: 50,
            timeout_ms: 0,
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Effective ceiling of the per-minute window.
    #[must_use]
    pub fn minute_ceiling(&self) -> u32 {
        self.requests_per_minute.saturating_add(self.burst_allowance)
    }
}

/// Batching knobs for one batch type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchTypeConfig {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_wait_time_ms: u64,
    pub concurrent_batches: usize,
    pub adaptive_sizing: bool,
    /// Latency above which adaptive sizing shrinks the batch
    pub target_latency_ms: u64,
}

impl Default for BatchTypeConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            min_batch_size: 1,
            flush_interval_ms: 1_000,
            max_wait_time_ms: 5_000,
            concurrent_batches: 1,
            adaptive_sizing: false,
            target_latency_ms: 2_000,
        }
    }
}

impl BatchTypeConfig {
    #[must_use]
    pub fn for_batch_type(batch_type: BatchType) -> Self {
        match batch_type {
            BatchType::Embed => Self {
                max_batch_size: 50,
                flush_interval_ms: 500,
                max_wait_time_ms: 2_000,
                adaptive_sizing: true,
                target_latency_ms: 5_000,
                ..Self::default()
            },
            BatchType::VectorUpsert => Self {
                max_batch_size: 100,
                flush_interval_ms: 1_000,
                max_wait_time_ms: 5_000,
                concurrent_batches: 2,
                adaptive_sizing: true,
                ..Self::default()
            },
            BatchType::VectorDelete => Self {
                max_batch_size: 1_000,
                flush_interval_ms: 2_000,
                max_wait_time_ms: 10_000,
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target '{target}': {reason}")]
    Target { target: TargetSystem, reason: &'static str },
    #[error("batch type '{batch_type}': {reason}")]
    Batch { batch_type: BatchType, reason: &'static str },
    #[error("consistency: {0}")]
    Consistency(&'static str),
}

/// Top-level configuration, passed to the manager at construction.
///
/// Missing targets and batch types fall back to their built-in profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub targets: HashMap<TargetSystem, TargetProfile>,

    #[serde(default)]
    pub batches: HashMap<BatchType, BatchTypeConfig>,

    #[serde(default)]
    pub consistency: ConsistencyOptions,
}

impl SyncConfig {
    /// Profile for a target, falling back to the built-in default.
    #[must_use]
    pub fn profile(&self, target: TargetSystem) -> TargetProfile {
        self.targets
            .get(&target)
            .cloned()
            .unwrap_or_else(|| TargetProfile::for_target(target))
    }

    #[must_use]
    pub fn batch(&self, batch_type: BatchType) -> BatchTypeConfig {
        self.batches
            .get(&batch_type)
            .cloned()
            .unwrap_or_else(|| BatchTypeConfig::for_batch_type(batch_type))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in TargetSystem::ALL {
            let p = self.profile(target);
            let err = |reason| ConfigError::Target { target, reason };
            if p.requests_per_second == 0 {
                return Err(err("requests_per_second must be > 0"));
            }
            if p.requests_per_minute == 0 {
                return Err(err("requests_per_minute must be > 0"));
            }
            if p.max_concurrent == 0 {
                return Err(err("max_concurrent must be > 0"));
            }
            if p.circuit_breaker_threshold == 0 {
                return Err(err("circuit_breaker_threshold must be > 0"));
            }
            if !(p.backoff_multiplier >= 1.0) {
                return Err(err("backoff_multiplier must be >= 1.0"));
            }
        }
        for batch_type in BatchType::ALL {
            let b = self.batch(batch_type);
            let err = |reason| ConfigError::Batch { batch_type, reason };
            if b.max_batch_size == 0 {
                return Err(err("max_batch_size must be > 0"));
            }
            if b.min_batch_size > b.max_batch_size {
                return Err(err("min_batch_size exceeds max_batch_size"));
            }
            if b.concurrent_batches == 0 {
                return Err(err("concurrent_batches must be > 0"));
            }
        }
        self.consistency.validate()
    }
}
