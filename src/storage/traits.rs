// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator interfaces: the three stores plus the embedding service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::consistency::types::{ConsistencyCheckResult, RepairAction};
use crate::model::{
    CustomerRecord, EntityKind, IndexStats, OrderRecord, Page, ProductRecord, StoreRecord,
    TenantRef, VectorRecord,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to decode stored data: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// The authoritative e-commerce API. Read-only.
#[async_trait]
pub trait SourceSystem: Send + Sync {
    async fn fetch_store(&self, tenant: &TenantRef) -> Result<StoreRecord, StorageError>;
    async fn fetch_products(&self, tenant: &TenantRef, page: Page) -> Result<Vec<ProductRecord>, StorageError>;
    async fn fetch_orders(&self, tenant: &TenantRef, page: Page) -> Result<Vec<OrderRecord>, StorageError>;
    async fn fetch_customers(&self, tenant: &TenantRef, page: Page) -> Result<Vec<CustomerRecord>, StorageError>;
}

/// The primary relational store.
///
/// Records are exchanged as raw JSON so a row that no longer matches its
/// entity schema can still be loaded and reported as corrupt.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Every stored record of `kind` for the tenant, keyed by entity id.
    async fn load_entities(
        &self,
        tenant_id: &str,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Value>, StorageError>;

    async fn put_entity(
        &self,
        tenant_id: &str,
        kind: EntityKind,
        id: &str,
        record: &Value,
    ) -> Result<(), StorageError>;

    /// Last successful sync per entity kind.
    async fn sync_status(&self, tenant_id: &str) -> Result<BTreeMap<EntityKind, DateTime<Utc>>, StorageError>;

    async fn record_sync(&self, tenant_id: &str, kind: EntityKind, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Insert-only; one row per check run.
    async fn insert_report(&self, report: &ConsistencyCheckResult) -> Result<(), StorageError>;

    /// Newest first.
    async fn recent_reports(&self, tenant_id: &str, limit: usize) -> Result<Vec<ConsistencyCheckResult>, StorageError>;

    /// Apply one low-risk repair. Default implementation reads, patches and
    /// writes back through the methods above.
    async fn apply_repair(&self, tenant_id: &str, action: &RepairAction) -> Result<(), StorageError> {
        match action {
            RepairAction::UpdateField { kind, id, field, value } => {
                let mut rows = self.load_entities(tenant_id, *kind).await?;
                let mut record = rows.remove(id).ok_or(StorageError::NotFound)?;
                let Some(obj) = record.as_object_mut() else {
                    return Err(StorageError::Decode(format!("{kind} {id} is not an object")));
                };
                obj.insert(field.clone(), value.clone());
                self.put_entity(tenant_id, *kind, id, &record).await
            }
            RepairAction::RefreshSyncTimestamp { kind } => {
                self.record_sync(tenant_id, *kind, Utc::now()).await
            }
        }
    }
}

/// Namespaced vector index. One namespace per tenant.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Returns the number of vectors written.
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize, StorageError>;

    /// Returns the number of vectors removed.
    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<usize, StorageError>;

    async fn stats(&self, namespace: &str) -> Result<IndexStats, StorageError>;
}

/// Text embedding service (language-model API).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, StorageError>;
}
