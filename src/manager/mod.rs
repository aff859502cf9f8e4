// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The admission-control and batching façade.
//!
//! [`RateLimitedBatchManager`] owns one [`RateLimiter`] per target system
//! and one [`BatchProcessor`] per batch type, both built lazily on first
//! use from the [`SyncConfig`] it was constructed with. Every outbound call
//! to a rate-limited system is meant to go through it.
//!
//! ```text
//!                     ┌──────────────────────────────┐
//!  execute_with_ ───► │ limiters: TargetSystem → RL  │ ───► source API
//!  rate_limit         │                              │
//!                     │ processors:                  │
//!  add_to_batch ────► │   Embed        ─► llm_api RL │ ───► embeddings API
//!   ::<K>             │   VectorUpsert ─► index RL   │ ───► search index
//!                     │   VectorDelete ─► index RL   │
//!                     └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use storefront_sync::manager::{kind, RateLimitedBatchManager};
//! use storefront_sync::storage::memory::{MemoryEmbedder, MemorySearchIndex};
//! use storefront_sync::batching::EmbedRequest;
//! use storefront_sync::{BatchOptions, CallOptions, SyncConfig, TargetSystem};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = RateLimitedBatchManager::new(
//!     SyncConfig::default(),
//!     Arc::new(MemorySearchIndex::new()),
//!     Arc::new(MemoryEmbedder::new(8)),
//! )
//! .unwrap();
//!
//! let answer: Result<u32, _> = manager
//!     .execute_with_rate_limit(TargetSystem::SourceApi, || async { Ok::<_, String>(42) }, &CallOptions::default())
//!     .await;
//! assert_eq!(answer.unwrap(), 42);
//!
//! let vector = manager
//!     .add_to_batch::<kind::Embed>(
//!         EmbedRequest { model: "small".into(), text: "Linen Shirt".into() },
//!         BatchOptions::high(),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(vector.len(), 8);
//!
//! manager.shutdown().await;
//! # }
//! ```

pub mod kind;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, instrument};

use crate::batching::{
    BatchProcessor, BatchStats, BatchTicket, BatchType, EmbedExecutor, VectorDeleteExecutor,
    VectorUpsertExecutor,
};
use crate::config::{ConfigError, SyncConfig, TargetSystem};
use crate::options::{BatchOptions, CallOptions};
use crate::resilience::rate_limiter::{LimiterError, RateLimitStatus, RateLimiter};
use crate::storage::traits::{Embedder, SearchIndex};

use kind::{BatchInput, BatchKind, BatchOutput};

/// Point-in-time view of every limiter and processor built so far.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub shutting_down: bool,
    pub targets: Vec<RateLimitStatus>,
    pub batches: Vec<BatchStats>,
}

pub struct RateLimitedBatchManager {
    config: SyncConfig,
    limiters: DashMap<TargetSystem, Arc<RateLimiter>>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn Embedder>,
    embed: OnceLock<BatchProcessor<EmbedExecutor>>,
    upsert: OnceLock<BatchProcessor<VectorUpsertExecutor>>,
    delete: OnceLock<BatchProcessor<VectorDeleteExecutor>>,
    shutting_down: AtomicBool,
}

impl RateLimitedBatchManager {
    /// Build a manager. Configuration is validated here; nothing connects
    /// until the first call.
    pub fn new(
        config: SyncConfig,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            limiters: DashMap::new(),
            index,
            embedder,
            embed: OnceLock::new(),
            upsert: OnceLock::new(),
            delete: OnceLock::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The limiter for `target`, created on first use.
    pub fn limiter(&self, target: TargetSystem) -> Arc<RateLimiter> {
        if let Some(existing) = self.limiters.get(&target) {
            return Arc::clone(existing.value());
        }
        let entry = self.limiters.entry(target).or_insert_with(|| {
            let profile = self.config.profile(target);
            info!(
                target = %target,
                rps = profile.requests_per_second,
                rpm = profile.requests_per_minute,
                max_concurrent = profile.max_concurrent,
                "Rate limiter created"
            );
            Arc::new(RateLimiter::new(target, profile))
        });
        Arc::clone(entry.value())
    }

    /// Run one call under `target`'s budget.
    #[instrument(skip(self, operation, options), fields(target = %target))]
    pub async fn execute_with_rate_limit<F, Fut, T, E>(
        &self,
        target: TargetSystem,
        operation: F,
        options: &CallOptions,
    ) -> Result<T, LimiterError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.is_shutting_down() {
            return Err(LimiterError::Shutdown { target });
        }
        self.limiter(target).execute(operation, options).await
    }

    /// Queue one operation for batch type `K`.
    ///
    /// The returned ticket resolves once the containing batch has executed.
    /// After [`shutdown`](Self::shutdown) tickets resolve to
    /// [`BatchError::Closed`](crate::batching::BatchError::Closed).
    pub fn add_to_batch<K: BatchKind>(
        &self,
        item: BatchInput<K>,
        options: BatchOptions,
    ) -> BatchTicket<BatchOutput<K>> {
        if self.is_shutting_down() {
            return BatchTicket::rejected(crate::batching::BatchError::Closed);
        }
        K::processor(self).add(item, options)
    }

    #[must_use]
    pub fn get_rate_limit_status(&self, target: TargetSystem) -> RateLimitStatus {
        self.limiter(target).status()
    }

    /// Statistics for batch types that have been used.
    #[must_use]
    pub fn batch_stats(&self, batch_type: BatchType) -> Option<BatchStats> {
        match batch_type {
            BatchType::Embed => self.embed.get().map(BatchProcessor::stats),
            BatchType::VectorUpsert => self.upsert.get().map(BatchProcessor::stats),
            BatchType::VectorDelete => self.delete.get().map(BatchProcessor::stats),
        }
    }

    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        let targets = TargetSystem::ALL
            .iter()
            .filter_map(|t| self.limiters.get(t).map(|l| l.status()))
            .collect();
        let batches = BatchType::ALL.iter().filter_map(|b| self.batch_stats(*b)).collect();
        ManagerStatus { shutting_down: self.is_shutting_down(), targets, batches }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Execute everything queued in every batch type.
    ///
    /// Embeddings go first since their results usually feed upserts.
    pub async fn flush_all(&self) {
        if let Some(p) = self.embed.get() {
            p.flush_all().await;
        }
        if let Some(p) = self.upsert.get() {
            p.flush_all().await;
        }
        if let Some(p) = self.delete.get() {
            p.flush_all().await;
        }
    }

    /// Stop accepting work, drain every queue, then close the limiters.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Batch manager shutting down");

        if let Some(p) = self.embed.get() {
            p.shutdown().await;
        }
        if let Some(p) = self.upsert.get() {
            p.shutdown().await;
        }
        if let Some(p) = self.delete.get() {
            p.shutdown().await;
        }
        for limiter in self.limiters.iter() {
            limiter.close();
        }
        info!("Batch manager shut down");
    }

    fn embed_processor(&self) -> &BatchProcessor<EmbedExecutor> {
        self.embed.get_or_init(|| {
            let executor =
                EmbedExecutor::new(Arc::clone(&self.embedder), self.limiter(TargetSystem::LlmApi));
            BatchProcessor::new(self.config.batch(BatchType::Embed), executor)
        })
    }

    fn upsert_processor(&self) -> &BatchProcessor<VectorUpsertExecutor> {
        self.upsert.get_or_init(|| {
            let executor =
                VectorUpsertExecutor::new(Arc::clone(&self.index), self.limiter(TargetSystem::SearchIndex));
            BatchProcessor::new(self.config.batch(BatchType::VectorUpsert), executor)
        })
    }

    fn delete_processor(&self) -> &BatchProcessor<VectorDeleteExecutor> {
        self.delete.get_or_init(|| {
            let executor =
                VectorDeleteExecutor::new(Arc::clone(&self.index), self.limiter(TargetSystem::SearchIndex));
            BatchProcessor::new(self.config.batch(BatchType::VectorDelete), executor)
        })
    }
}
