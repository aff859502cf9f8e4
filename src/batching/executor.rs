// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The pluggable half of batching: what a batch type does with its items.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named category of homogeneous operations sharing one queue and executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    /// Texts to embedding vectors (language-model API)
    Embed,
    /// Vectors into a tenant namespace (search index)
    VectorUpsert,
    /// Vector ids out of a tenant namespace (search index)
    VectorDelete,
}

impl BatchType {
    pub const ALL: [BatchType; 3] = [Self::Embed, Self::VectorUpsert, Self::VectorDelete];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embed => "embed",
            Self::VectorUpsert => "vector_upsert",
            Self::VectorDelete => "vector_delete",
        }
    }
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a batched operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The executor failed as a whole; every operation in the batch gets this
    #[error("batch executor failed: {0}")]
    Executor(String),

    /// The operation's partition failed
    #[error("operation failed: {0}")]
    Operation(String),

    /// The executor returned no result for this operation
    #[error("executor returned no result for operation")]
    Missing,

    /// The processor went away before the operation settled
    #[error("batch processor dropped the operation")]
    Dropped,

    /// Submitted after shutdown began
    #[error("batch manager is shut down")]
    Closed,
}

/// Settled results of one executed batch, in submission order of the slice.
#[derive(Debug)]
pub struct BatchOutcome<O> {
    pub results: Vec<Result<O, BatchError>>,
    pub execution_time: Duration,
    pub batch_size: usize,
}

impl<O> BatchOutcome<O> {
    /// True if every operation succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    #[must_use]
    pub fn errors(&self) -> Vec<&BatchError> {
        self.results.iter().filter_map(|r| r.as_ref().err()).collect()
    }
}

/// Executes one batch.
///
/// Implementations should partition their inputs (e.g. by namespace), route
/// each partition's network call through the target's rate limiter, and
/// return one result per input in input order, so a failed partition only
/// rejects its own operations. Returning `Err` fails the whole batch.
#[async_trait]
pub trait BatchExecutor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn batch_type(&self) -> BatchType;

    async fn execute(
        &self,
        inputs: Vec<Self::Input>,
    ) -> Result<Vec<Result<Self::Output, BatchError>>, BatchError>;
}

/// Group inputs by partition key, remembering each input's position.
pub fn partition<T, K: Ord>(inputs: Vec<T>, key: impl Fn(&T) -> K) -> BTreeMap<K, Vec<(usize, T)>> {
    let mut groups: BTreeMap<K, Vec<(usize, T)>> = BTreeMap::new();
    for (idx, input) in inputs.into_iter().enumerate() {
        groups.entry(key(&input)).or_default().push((idx, input));
    }
    groups
}

/// Collects per-position results; unset positions become [`BatchError::Missing`].
pub struct ResultSlots<O> {
    slots: Vec<Option<Result<O, BatchError>>>,
}

impl<O> ResultSlots<O> {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { slots: (0..len).map(|_| None).collect() }
    }

    pub fn set(&mut self, idx: usize, result: Result<O, BatchError>) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = Some(result);
        }
    }

    /// Settle every position of a group with the same error.
    pub fn fail_all(&mut self, indices: &[usize], err: &BatchError) {
        for &idx in indices {
            self.set(idx, Err(err.clone()));
        }
    }

    #[must_use]
    pub fn finish(self) -> Vec<Result<O, BatchError>> {
        self.slots.into_iter().map(|s| s.unwrap_or(Err(BatchError::Missing))).collect()
    }
}
