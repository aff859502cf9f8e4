// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory collaborators, used by tests and demos.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::traits::{Embedder, PrimaryStore, SearchIndex, SourceSystem, StorageError};
use crate::consistency::types::ConsistencyCheckResult;
use crate::model::{
    CustomerRecord, Entity, EntityKind, IndexStats, OrderRecord, Page, ProductRecord, StoreRecord,
    TenantRef, VectorRecord,
};

fn page_of<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    let limit = page.limit as usize;
    let start = (page.page.max(1) as usize - 1) * limit;
    items.iter().skip(start).take(limit).cloned().collect()
}

/// One tenant's data as the e-commerce platform would return it.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    pub store: Option<StoreRecord>,
    pub products: Vec<ProductRecord>,
    pub orders: Vec<OrderRecord>,
    pub customers: Vec<CustomerRecord>,
}

/// Source system backed by per-tenant catalogs.
#[derive(Default)]
pub struct MemorySource {
    catalogs: DashMap<String, SourceCatalog>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_catalog(&self, store_id: &str, catalog: SourceCatalog) {
        self.catalogs.insert(store_id.to_string(), catalog);
    }

    /// Mutate one tenant's catalog in place.
    pub fn update(&self, store_id: &str, f: impl FnOnce(&mut SourceCatalog)) {
        f(&mut self.catalogs.entry(store_id.to_string()).or_default());
    }

    /// Make every fetch fail, as during an upstream outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn catalog(&self, tenant: &TenantRef) -> Result<SourceCatalog, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("source system unavailable".into()));
        }
        if tenant.access_token.is_empty() {
            return Err(StorageError::Backend("401 Unauthorized".into()));
        }
        self.catalogs
            .get(&tenant.store_id)
            .map(|c| c.value().clone())
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl SourceSystem for MemorySource {
    async fn fetch_store(&self, tenant: &TenantRef) -> Result<StoreRecord, StorageError> {
        self.catalog(tenant)?.store.ok_or(StorageError::NotFound)
    }

    async fn fetch_products(&self, tenant: &TenantRef, page: Page) -> Result<Vec<ProductRecord>, StorageError> {
        Ok(page_of(&self.catalog(tenant)?.products, page))
    }

    async fn fetch_orders(&self, tenant: &TenantRef, page: Page) -> Result<Vec<OrderRecord>, StorageError> {
        Ok(page_of(&self.catalog(tenant)?.orders, page))
    }

    async fn fetch_customers(&self, tenant: &TenantRef, page: Page) -> Result<Vec<CustomerRecord>, StorageError> {
        Ok(page_of(&self.catalog(tenant)?.customers, page))
    }
}

/// Primary store keyed by `(tenant, kind)`.
#[derive(Default)]
pub struct MemoryPrimaryStore {
    entities: DashMap<(String, EntityKind), BTreeMap<String, Value>>,
    syncs: DashMap<String, BTreeMap<EntityKind, DateTime<Utc>>>,
    reports: DashMap<String, Vec<ConsistencyCheckResult>>,
}

impl MemoryPrimaryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed record.
    pub fn insert<T: Entity>(&self, tenant_id: &str, record: &T) -> Result<(), StorageError> {
        self.insert_raw(tenant_id, T::KIND, record.id(), serde_json::to_value(record)?);
        Ok(())
    }

    /// Store a raw row, e.g. one that no longer matches the entity schema.
    pub fn insert_raw(&self, tenant_id: &str, kind: EntityKind, id: &str, row: Value) {
        self.entities
            .entry((tenant_id.to_string(), kind))
            .or_default()
            .insert(id.to_string(), row);
    }

    pub fn remove(&self, tenant_id: &str, kind: EntityKind, id: &str) {
        if let Some(mut rows) = self.entities.get_mut(&(tenant_id.to_string(), kind)) {
            rows.remove(id);
        }
    }

    #[must_use]
    pub fn count(&self, tenant_id: &str, kind: EntityKind) -> usize {
        self.entities
            .get(&(tenant_id.to_string(), kind))
            .map_or(0, |rows| rows.len())
    }

    #[must_use]
    pub fn get_raw(&self, tenant_id: &str, kind: EntityKind, id: &str) -> Option<Value> {
        self.entities
            .get(&(tenant_id.to_string(), kind))
            .and_then(|rows| rows.get(id).cloned())
    }

    #[must_use]
    pub fn report_count(&self, tenant_id: &str) -> usize {
        self.reports.get(tenant_id).map_or(0, |r| r.len())
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn load_entities(
        &self,
        tenant_id: &str,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Value>, StorageError> {
        Ok(self
            .entities
            .get(&(tenant_id.to_string(), kind))
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }

    async fn put_entity(
        &self,
        tenant_id: &str,
        kind: EntityKind,
        id: &str,
        record: &Value,
    ) -> Result<(), StorageError> {
        self.insert_raw(tenant_id, kind, id, record.clone());
        Ok(())
    }

    async fn sync_status(&self, tenant_id: &str) -> Result<BTreeMap<EntityKind, DateTime<Utc>>, StorageError> {
        Ok(self.syncs.get(tenant_id).map(|s| s.value().clone()).unwrap_or_default())
    }

    async fn record_sync(&self, tenant_id: &str, kind: EntityKind, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.syncs.entry(tenant_id.to_string()).or_default().insert(kind, at);
        Ok(())
    }

    async fn insert_report(&self, report: &ConsistencyCheckResult) -> Result<(), StorageError> {
        self.reports
            .entry(report.tenant_id.clone())
            .or_default()
            .push(report.clone());
        Ok(())
    }

    async fn recent_reports(&self, tenant_id: &str, limit: usize) -> Result<Vec<ConsistencyCheckResult>, StorageError> {
        Ok(self
            .reports
            .get(tenant_id)
            .map(|r| r.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Search index keyed by namespace, then vector id.
#[derive(Default)]
pub struct MemorySearchIndex {
    namespaces: DashMap<String, BTreeMap<String, VectorRecord>>,
    failing: DashSet<String>,
    upsert_calls: AtomicUsize,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against `namespace` fail.
    pub fn fail_namespace(&self, namespace: &str) {
        self.failing.insert(namespace.to_string());
    }

    pub fn heal_namespace(&self, namespace: &str) {
        self.failing.remove(namespace);
    }

    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn check(&self, namespace: &str) -> Result<(), StorageError> {
        if self.failing.contains(namespace) {
            return Err(StorageError::Backend(format!("namespace {namespace} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize, StorageError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check(namespace)?;
        let written = vectors.len();
        let mut ns = self.namespaces.entry(namespace.to_string()).or_default();
        for vector in vectors {
            ns.insert(vector.id.clone(), vector);
        }
        Ok(written)
    }

    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<usize, StorageError> {
        self.check(namespace)?;
        let Some(mut ns) = self.namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| ns.remove(id.as_str()).is_some()).count())
    }

    async fn stats(&self, namespace: &str) -> Result<IndexStats, StorageError> {
        self.check(namespace)?;
        let mut stats = IndexStats { namespace: namespace.to_string(), ..Default::default() };
        if let Some(ns) = self.namespaces.get(namespace) {
            stats.total_vectors = ns.len() as u64;
            for kind in ns.values().filter_map(VectorRecord::kind) {
                *stats.by_kind.entry(kind).or_default() += 1;
            }
        }
        Ok(stats)
    }
}

/// Deterministic embedder: each text hashes to a fixed vector.
pub struct MemoryEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
}

impl MemoryEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, calls: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, model: &str, text: &str) -> Vec<f32> {
        let digest = Sha256::new().chain_update(model).chain_update([0u8]).chain_update(text).finalize();
        digest
            .iter()
            .cycle()
            .take(self.dimensions)
            .map(|b| f32::from(*b) / 255.0)
            .collect()
    }
}

#[async_trait]
impl Embedder for MemoryEmbedder {
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(model, t)).collect())
    }
}
