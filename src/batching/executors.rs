// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Executors for the built-in batch types.
//!
//! Each one partitions its batch (by model or by namespace), sends one
//! rate-limited call per partition and settles results per partition, so a
//! failing namespace never rejects operations bound for another.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use super::executor::{partition, BatchError, BatchExecutor, BatchType, ResultSlots};
use crate::model::VectorRecord;
use crate::options::CallOptions;
use crate::resilience::rate_limiter::RateLimiter;
use crate::storage::traits::{Embedder, SearchIndex, StorageError};

/// One text to embed with a given model.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedRequest {
    pub model: String,
    pub text: String,
}

/// One vector to write into a tenant namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRequest {
    pub namespace: String,
    pub vector: VectorRecord,
}

/// One vector id to remove from a tenant namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub namespace: String,
    pub id: String,
}

/// Partition `inputs` by `key`, make one rate-limited `call` per group and
/// settle every position from its own group's outcome.
///
/// `call` receives the group key and payloads and must return one output per
/// payload, in order; a short or long answer fails the whole group.
async fn run_grouped<I, K, P, O, F, Fut>(
    batch_type: BatchType,
    limiter: &RateLimiter,
    inputs: Vec<I>,
    key: impl Fn(&I) -> K,
    payload: impl Fn(I) -> P,
    call: F,
) -> Vec<Result<O, BatchError>>
where
    K: Ord + Clone + Display,
    P: Clone,
    F: Fn(K, Vec<P>) -> Fut,
    Fut: Future<Output = Result<Vec<O>, StorageError>>,
{
    let mut slots = ResultSlots::new(inputs.len());
    let groups = partition(inputs, key);

    let calls = groups.into_iter().map(|(group, members)| {
        let (indices, payloads): (Vec<usize>, Vec<P>) =
            members.into_iter().map(|(idx, input)| (idx, payload(input))).unzip();
        let call = &call;
        async move {
            let expected = payloads.len();
            let result = limiter
                .execute(|| call(group.clone(), payloads.clone()), &CallOptions::default())
                .await
                .map_err(|e| BatchError::Operation(e.to_string()))
                .and_then(|outputs| {
                    if outputs.len() == expected {
                        Ok(outputs)
                    } else {
                        Err(BatchError::Operation(format!(
                            "{group} returned {} results for {expected} operations",
                            outputs.len()
                        )))
                    }
                });
            (group, indices, result)
        }
    });

    for (group, indices, result) in join_all(calls).await {
        match result {
            Ok(outputs) => {
                for (idx, output) in indices.into_iter().zip(outputs) {
                    slots.set(idx, Ok(output));
                }
            }
            Err(e) => {
                warn!(%batch_type, group = %group, size = indices.len(), error = %e, "Batch group failed");
                slots.fail_all(&indices, &e);
            }
        }
    }
    slots.finish()
}

/// Texts to vectors through the language-model API.
pub struct EmbedExecutor {
    embedder: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
}

impl EmbedExecutor {
    pub fn new(embedder: Arc<dyn Embedder>, limiter: Arc<RateLimiter>) -> Self {
        Self { embedder, limiter }
    }
}

#[async_trait]
impl BatchExecutor for EmbedExecutor {
    type Input = EmbedRequest;
    type Output = Vec<f32>;

    fn batch_type(&self) -> BatchType {
        BatchType::Embed
    }

    async fn execute(
        &self,
        inputs: Vec<EmbedRequest>,
    ) -> Result<Vec<Result<Vec<f32>, BatchError>>, BatchError> {
        Ok(run_grouped(
            BatchType::Embed,
            &self.limiter,
            inputs,
            |req| req.model.clone(),
            |req| req.text,
            |model, texts| {
                let embedder = Arc::clone(&self.embedder);
                async move { embedder.embed(&model, texts).await }
            },
        )
        .await)
    }
}

/// Vector writes through the search-index API.
pub struct VectorUpsertExecutor {
    index: Arc<dyn SearchIndex>,
    limiter: Arc<RateLimiter>,
}

impl VectorUpsertExecutor {
    pub fn new(index: Arc<dyn SearchIndex>, limiter: Arc<RateLimiter>) -> Self {
        Self { index, limiter }
    }
}

#[async_trait]
impl BatchExecutor for VectorUpsertExecutor {
    type Input = UpsertRequest;
    type Output = ();

    fn batch_type(&self) -> BatchType {
        BatchType::VectorUpsert
    }

    async fn execute(&self, inputs: Vec<UpsertRequest>) -> Result<Vec<Result<(), BatchError>>, BatchError> {
        Ok(run_grouped(
            BatchType::VectorUpsert,
            &self.limiter,
            inputs,
            |req| req.namespace.clone(),
            |req| req.vector,
            |namespace, vectors| {
                let index = Arc::clone(&self.index);
                let count = vectors.len();
                async move { index.upsert(&namespace, vectors).await.map(|_| vec![(); count]) }
            },
        )
        .await)
    }
}

/// Vector removals through the search-index API.
pub struct VectorDeleteExecutor {
    index: Arc<dyn SearchIndex>,
    limiter: Arc<RateLimiter>,
}

impl VectorDeleteExecutor {
    pub fn new(index: Arc<dyn SearchIndex>, limiter: Arc<RateLimiter>) -> Self {
        Self { index, limiter }
    }
}

#[async_trait]
impl BatchExecutor for VectorDeleteExecutor {
    type Input = DeleteRequest;
    type Output = ();

    fn batch_type(&self) -> BatchType {
        BatchType::VectorDelete
    }

    async fn execute(&self, inputs: Vec<DeleteRequest>) -> Result<Vec<Result<(), BatchError>>, BatchError> {
        Ok(run_grouped(
            BatchType::VectorDelete,
            &self.limiter,
            inputs,
            |req| req.namespace.clone(),
            |req| req.id,
            |namespace, ids| {
                let index = Arc::clone(&self.index);
                let count = ids.len();
                // Deleting an id that is already gone still settles as a success
                async move { index.delete(&namespace, ids).await.map(|_| vec![(); count]) }
            },
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TargetProfile, TargetSystem};
    use crate::storage::memory::{MemoryEmbedder, MemorySearchIndex};
    use serde_json::json;

    fn limiter(target: TargetSystem) -> Arc<RateLimiter> {
        let profile = TargetProfile { retry_attempts: 0, ..TargetProfile::test() };
        Arc::new(RateLimiter::new(target, profile))
    }

    fn upsert(namespace: &str, id: &str) -> UpsertRequest {
        UpsertRequest {
            namespace: namespace.into(),
            vector: VectorRecord { id: id.into(), values: vec![0.5, 0.5], metadata: json!({"kind": "product"}) },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_groups_by_namespace() {
        let index = Arc::new(MemorySearchIndex::new());
        let exec = VectorUpsertExecutor::new(index.clone(), limiter(TargetSystem::SearchIndex));

        let results = exec
            .execute(vec![upsert("store-a", "product:1"), upsert("store-b", "product:1"), upsert("store-a", "product:2")])
            .await
            .unwrap();

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(index.stats("store-a").await.unwrap().total_vectors, 2);
        assert_eq!(index.stats("store-b").await.unwrap().total_vectors, 1);
        assert_eq!(index.upsert_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_namespace_is_isolated() {
        let index = Arc::new(MemorySearchIndex::new());
        index.fail_namespace("store-bad");
        let exec = VectorUpsertExecutor::new(index.clone(), limiter(TargetSystem::SearchIndex));

        let results = exec
            .execute(vec![upsert("store-ok", "product:1"), upsert("store-bad", "product:1"), upsert("store-ok", "product:2")])
            .await
            .unwrap();

        assert_eq!(results[0], Ok(()));
        assert!(matches!(results[1], Err(BatchError::Operation(_))));
        assert_eq!(results[2], Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_ids() {
        let index = Arc::new(MemorySearchIndex::new());
        index.upsert("store-a", vec![upsert("store-a", "product:1").vector]).await.unwrap();
        let exec = VectorDeleteExecutor::new(index.clone(), limiter(TargetSystem::SearchIndex));

        let results = exec
            .execute(vec![DeleteRequest { namespace: "store-a".into(), id: "product:1".into() }])
            .await
            .unwrap();

        assert_eq!(results, vec![Ok(())]);
        assert_eq!(index.stats("store-a").await.unwrap().total_vectors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_isolated_and_missing_ids_succeed() {
        let index = Arc::new(MemorySearchIndex::new());
        index.upsert("store-ok", vec![upsert("store-ok", "product:1").vector]).await.unwrap();
        index.fail_namespace("store-bad");
        let exec = VectorDeleteExecutor::new(index.clone(), limiter(TargetSystem::SearchIndex));

        let delete = |namespace: &str, id: &str| DeleteRequest { namespace: namespace.into(), id: id.into() };
        let results = exec
            .execute(vec![
                delete("store-bad", "product:1"),
                delete("store-ok", "product:1"),
                delete("store-ok", "product:gone"),
            ])
            .await
            .unwrap();

        assert!(matches!(results[0], Err(BatchError::Operation(_))));
        assert_eq!(results[1], Ok(()));
        assert_eq!(results[2], Ok(()));
        assert_eq!(index.stats("store-ok").await.unwrap().total_vectors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_groups_by_model() {
        let embedder = Arc::new(MemoryEmbedder::new(4));
        let exec = EmbedExecutor::new(embedder.clone(), limiter(TargetSystem::LlmApi));

        let req = |model: &str, text: &str| EmbedRequest { model: model.into(), text: text.into() };
        let results = exec
            .execute(vec![req("small", "hat"), req("large", "shirt"), req("small", "scarf")])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for result in &results {
            assert_eq!(result.as_ref().map(Vec::len), Ok(4));
        }
        assert_eq!(embedder.calls(), 2);
        // Same text, same vector
        let again = exec.execute(vec![req("small", "hat")]).await.unwrap();
        assert_eq!(again[0], results[0]);
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, StorageError> {
            Ok(vec![vec![1.0]])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_count_mismatch_fails_group() {
        let exec = EmbedExecutor::new(Arc::new(ShortEmbedder), limiter(TargetSystem::LlmApi));
        let results = exec
            .execute(vec![
                EmbedRequest { model: "m".into(), text: "a".into() },
                EmbedRequest { model: "m".into(), text: "b".into() },
            ])
            .await
            .unwrap();
        assert!(results.iter().all(|r| matches!(r, Err(BatchError::Operation(_)))));
    }
}
