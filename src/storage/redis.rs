// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed search index namespace store.
//!
//! Each namespace is one hash of vector id → vector JSON, plus one set per
//! entity kind so statistics never have to decode vectors:
//!
//! ```text
//! {prefix}vec:{namespace}                  HASH  id → {"id", "values", "metadata"}
//! {prefix}vec:{namespace}:kind:{kind}      SET   ids whose metadata.kind = kind
//! ```
//!
//! Writes are pipelined and atomic per call, so a batch either lands
//! completely or not at all. Calls are single-shot: they run inside a
//! `search_index` limiter attempt, and the limiter owns retries.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client};

use super::traits::{SearchIndex, StorageError};
use crate::model::{EntityKind, IndexStats, VectorRecord};
use crate::resilience::retry::{retry, RetryConfig};

const ALL_KINDS: [EntityKind; 5] = [
    EntityKind::Store,
    EntityKind::Product,
    EntityKind::Order,
    EntityKind::Customer,
    EntityKind::Analytics,
];

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct RedisSearchIndex {
    connection: ConnectionManager,
    /// Optional key prefix for sharing an instance (e.g. "shopsync:")
    prefix: String,
}

impl RedisSearchIndex {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// # Example
    ///
    /// ```rust,no_run
    /// # use storefront_sync::storage::redis::RedisSearchIndex;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys become "shopsync:vec:store-42", "shopsync:vec:store-42:kind:product", ...
    /// let index = RedisSearchIndex::with_prefix("redis://localhost", Some("shopsync:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self { connection, prefix: prefix.unwrap_or("").to_string() })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    fn vectors_key(&self, namespace: &str) -> String {
        format!("{}vec:{}", self.prefix, namespace)
    }

    fn kind_key(&self, namespace: &str, kind: EntityKind) -> String {
        format!("{}vec:{}:kind:{}", self.prefix, namespace, kind)
    }
}

#[async_trait]
impl SearchIndex for RedisSearchIndex {
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize, StorageError> {
        if vectors.is_empty() {
            return Ok(0);
        }
        let hash = self.vectors_key(namespace);
        let prepared = vectors
            .iter()
            .map(|v| Ok((v.id.clone(), v.kind(), serde_json::to_string(v)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let mut conn = self.connection.clone();

        let mut pipeline = pipe();
        pipeline.atomic();
        for (id, kind, doc) in &prepared {
            pipeline.hset(&hash, id, doc).ignore();
            if let Some(kind) = kind {
                pipeline.sadd(self.kind_key(namespace, *kind), id).ignore();
            }
        }
        pipeline.query_async::<()>(&mut conn).await.map_err(backend)?;

        Ok(prepared.len())
    }

    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let hash = self.vectors_key(namespace);
        let mut conn = self.connection.clone();

        // Kinds are only known from the stored documents
        let existing: Vec<Option<String>> =
            cmd("HMGET").arg(&hash).arg(&ids).query_async(&mut conn).await.map_err(backend)?;
        let mut pipeline = pipe();
        pipeline.atomic();
        let mut removed = 0;
        for (id, doc) in ids.iter().zip(existing) {
            let Some(doc) = doc else {
                continue;
            };
            removed += 1;
            pipeline.hdel(&hash, id).ignore();
            let kind = serde_json::from_str::<VectorRecord>(&doc).ok().and_then(|v| v.kind());
            if let Some(kind) = kind {
                pipeline.srem(self.kind_key(namespace, kind), id).ignore();
            }
        }
        if removed > 0 {
            pipeline.query_async::<()>(&mut conn).await.map_err(backend)?;
        }
        Ok(removed)
    }

    async fn stats(&self, namespace: &str) -> Result<IndexStats, StorageError> {
        let mut pipeline = pipe();
        pipeline.hlen(self.vectors_key(namespace));
        for kind in ALL_KINDS {
            pipeline.scard(self.kind_key(namespace, kind));
        }
        let mut conn = self.connection.clone();
        let counts: Vec<u64> = pipeline.query_async(&mut conn).await.map_err(backend)?;

        let mut stats = IndexStats { namespace: namespace.to_string(), ..Default::default() };
        let mut counts = counts.into_iter();
        stats.total_vectors = counts.next().unwrap_or(0);
        for (kind, n) in ALL_KINDS.into_iter().zip(counts) {
            if n > 0 {
                stats.by_kind.insert(kind, n);
            }
        }
        Ok(stats)
    }
}
