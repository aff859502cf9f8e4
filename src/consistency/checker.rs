// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The check run: snapshot, compare, score, repair, persist.
//!
//! ```text
//! INIT → SNAPSHOT → CHECK[store] → CHECK[product] → CHECK[order]
//!      → CHECK[customer] → CHECK[analytics] → SCORE → PERSIST → DONE
//! ```
//!
//! Every source-system and search-index read goes through the manager, so a
//! check competes for the same rate budget as sync traffic. Primary store
//! reads are local and go direct.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::compare::{check_analytics, check_collection, Collection, Findings, Rules};
use super::scoring;
use super::types::{
    CheckLevel, CheckPhase, CheckStatistics, ConsistencyCheckResult, ConsistencyOptions,
    Discrepancy, RecordCounts, RepairAction, Severity, SystemScores,
};
use crate::config::TargetSystem;
use crate::manager::RateLimitedBatchManager;
use crate::metrics;
use crate::model::{
    namespace_for, AnalyticsSummary, CustomerRecord, Entity, EntityKind, EntitySet, IndexStats,
    OrderRecord, Page, ProductRecord, StoreRecord, TenantRef,
};
use crate::options::CallOptions;
use crate::storage::traits::{PrimaryStore, SearchIndex, SourceSystem, StorageError};

/// Kinds in the order they are checked.
const CHECK_ORDER: [EntityKind; 5] = [
    EntityKind::Store,
    EntityKind::Product,
    EntityKind::Order,
    EntityKind::Customer,
    EntityKind::Analytics,
];

/// Suggested retry delay after a failed snapshot.
const RETRY_AFTER_HOURS: i64 = 1;

/// Everything one run compares, collected before any rule runs.
#[derive(Default)]
struct Snapshot {
    store: Option<StoreRecord>,
    products: Vec<ProductRecord>,
    orders: Vec<OrderRecord>,
    customers: Vec<CustomerRecord>,
    primary: BTreeMap<EntityKind, BTreeMap<String, Value>>,
    last_sync: BTreeMap<EntityKind, DateTime<Utc>>,
    index: Option<IndexStats>,
}

impl Snapshot {
    fn take_rows(&mut self, kind: EntityKind) -> BTreeMap<String, Value> {
        self.primary.remove(&kind).unwrap_or_default()
    }
}

/// Audits one tenant across the source system, primary store and search index.
pub struct ConsistencyChecker {
    manager: Arc<RateLimitedBatchManager>,
    source: Arc<dyn SourceSystem>,
    primary: Arc<dyn PrimaryStore>,
    index: Arc<dyn SearchIndex>,
    options: ConsistencyOptions,
}

impl ConsistencyChecker {
    /// Options default to the manager's `consistency` configuration.
    pub fn new(
        manager: Arc<RateLimitedBatchManager>,
        source: Arc<dyn SourceSystem>,
        primary: Arc<dyn PrimaryStore>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        let options = manager.config().consistency.clone();
        Self { manager, source, primary, index, options }
    }

    #[must_use]
    pub fn with_options(mut self, options: ConsistencyOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn options(&self) -> &ConsistencyOptions {
        &self.options
    }

    /// Run a check with the configured options.
    pub async fn execute_check(&self, tenant: &TenantRef) -> ConsistencyCheckResult {
        self.execute_check_with(tenant, &self.options).await
    }

    /// Run a check with per-run options.
    ///
    /// Data mismatches never fail the run. If a snapshot cannot be taken the
    /// result has a zero score, `needs_attention` set and `error` filled in.
    #[instrument(skip(self, tenant, options), fields(tenant = %tenant.store_id, level = ?options.level))]
    pub async fn execute_check_with(&self, tenant: &TenantRef, options: &ConsistencyOptions) -> ConsistencyCheckResult {
        let started = Instant::now();
        let checked_at = Utc::now();
        debug!(phase = %CheckPhase::Init, "Consistency check starting");

        let kinds: Vec<EntityKind> = CHECK_ORDER.into_iter().filter(|k| options.checks(*k)).collect();

        if let Err(e) = options.validate() {
            warn!(error = %e, "Rejecting check with invalid options");
            return failed_result(tenant, options, &kinds, checked_at, started, e.to_string());
        }

        debug!(phase = %CheckPhase::Snapshot, "Collecting snapshots");
        let mut snapshot = match self.snapshot(tenant, options, &kinds).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot failed; reporting zero score");
                let result = failed_result(tenant, options, &kinds, checked_at, started, e);
                metrics::record_consistency_check(
                    options.level.as_str(),
                    result.overall_score,
                    true,
                    started.elapsed(),
                );
                self.persist(&result, options).await;
                return result;
            }
        };

        let rules = Rules { level: options.level, options, now: checked_at };
        let mut findings = Findings::new(options.max_discrepancies);
        let mut base = CheckStatistics::default();

        for kind in &kinds {
            debug!(phase = %CheckPhase::Check(*kind), "Comparing");
            let counts = match kind {
                EntityKind::Store => {
                    let source: Vec<StoreRecord> = snapshot.store.iter().cloned().collect();
                    check_kind(&source, &mut snapshot, &rules, &mut findings)
                }
                EntityKind::Product => {
                    let source = std::mem::take(&mut snapshot.products);
                    check_kind(&source, &mut snapshot, &rules, &mut findings)
                }
                EntityKind::Order => {
                    let source = snapshot.orders.clone();
                    check_kind(&source, &mut snapshot, &rules, &mut findings)
                }
                EntityKind::Customer => {
                    let source = snapshot.customers.clone();
                    check_kind(&source, &mut snapshot, &rules, &mut findings)
                }
                EntityKind::Analytics => {
                    let expected = AnalyticsSummary::derive(
                        &snapshot.orders,
                        snapshot.customers.len() as u64,
                        checked_at,
                    );
                    let rows = snapshot.take_rows(EntityKind::Analytics);
                    check_analytics(&expected, rows.get(AnalyticsSummary::ID), &rules, &mut findings);
                    RecordCounts { source: 1, primary: rows.len(), index: None }
                }
            };
            base.records.insert(*kind, counts);
        }

        debug!(phase = %CheckPhase::Score, "Scoring");
        let (discrepancies, truncated) = findings.into_parts();
        base.truncated = truncated;

        let overall_score = scoring::score(&discrepancies, &options.penalties);
        let system_scores = scoring::system_scores(&discrepancies, &options.penalties);
        let needs_attention = scoring::needs_attention(&discrepancies);
        let next_check_at = checked_at + scoring::next_check_interval(&discrepancies);
        let recommendations = scoring::recommendations(&discrepancies, truncated);

        for d in &discrepancies {
            metrics::record_discrepancy(d.kind.as_str(), d.discrepancy_type.as_str(), d.severity.as_str());
        }

        let repairs_performed = if options.auto_repair {
            self.repair(tenant, &discrepancies).await
        } else {
            Vec::new()
        };
        base.repaired = repairs_performed.len();

        let result = ConsistencyCheckResult {
            id: Uuid::new_v4(),
            tenant_id: tenant.store_id.clone(),
            level: options.level,
            data_types: kinds,
            overall_score,
            system_scores,
            statistics: scoring::statistics(&discrepancies, base),
            discrepancies,
            execution_time_ms: elapsed_ms(started),
            recommendations,
            repairs_performed,
            needs_attention,
            checked_at,
            next_check_at,
            error: None,
        };

        metrics::record_consistency_check(options.level.as_str(), overall_score, false, started.elapsed());
        self.persist(&result, options).await;

        info!(
            score = result.overall_score,
            discrepancies = result.discrepancies.len(),
            repaired = result.repairs_performed.len(),
            needs_attention = result.needs_attention,
            duration_ms = result.execution_time_ms,
            "Consistency check complete"
        );
        result
    }

    /// Stored reports for a tenant, newest first.
    pub async fn recent_reports(&self, tenant_id: &str, limit: usize) -> Result<Vec<ConsistencyCheckResult>, StorageError> {
        self.primary.recent_reports(tenant_id, limit).await
    }

    async fn snapshot(
        &self,
        tenant: &TenantRef,
        options: &ConsistencyOptions,
        kinds: &[EntityKind],
    ) -> Result<Snapshot, String> {
        let wants = |kind: EntityKind| kinds.contains(&kind);
        let analytics = wants(EntityKind::Analytics);
        let mut snapshot = Snapshot::default();

        if wants(EntityKind::Store) {
            let store = self
                .manager
                .execute_with_rate_limit(
                    TargetSystem::SourceApi,
                    || self.source.fetch_store(tenant),
                    &CallOptions::default(),
                )
                .await
                .map_err(|e| format!("fetching store: {e}"))?;
            snapshot.store = Some(store);
        }
        if wants(EntityKind::Product) {
            snapshot.products =
                self.fetch_pages("products", options, |page| self.source.fetch_products(tenant, page)).await?;
        }
        if wants(EntityKind::Order) || analytics {
            snapshot.orders =
                self.fetch_pages("orders", options, |page| self.source.fetch_orders(tenant, page)).await?;
        }
        if wants(EntityKind::Customer) || analytics {
            snapshot.customers =
                self.fetch_pages("customers", options, |page| self.source.fetch_customers(tenant, page)).await?;
        }

        for kind in kinds {
            let rows = self
                .primary
                .load_entities(&tenant.store_id, *kind)
                .await
                .map_err(|e| format!("loading {kind} from primary store: {e}"))?;
            snapshot.primary.insert(*kind, rows);
        }
        snapshot.last_sync = self
            .primary
            .sync_status(&tenant.store_id)
            .await
            .map_err(|e| format!("loading sync status: {e}"))?;

        let needs_index = options.level >= CheckLevel::Standard
            && kinds.iter().any(|k| k.is_indexed());
        if needs_index {
            let namespace = namespace_for(&tenant.store_id);
            let stats = self
                .manager
                .execute_with_rate_limit(
                    TargetSystem::SearchIndex,
                    || self.index.stats(&namespace),
                    &CallOptions::default(),
                )
                .await
                .map_err(|e| format!("reading search index stats: {e}"))?;
            snapshot.index = Some(stats);
        }

        Ok(snapshot)
    }

    /// Read a paginated source collection until a short page or `max_pages`.
    async fn fetch_pages<T, F, Fut>(&self, what: &str, options: &ConsistencyOptions, mut fetch: F) -> Result<Vec<T>, String>
    where
        F: FnMut(Page) -> Fut,
        Fut: Future<Output = Result<Vec<T>, StorageError>>,
    {
        let mut page = Page::first(options.page_size);
        let mut all = Vec::new();
        for _ in 0..options.max_pages {
            let batch = self
                .manager
                .execute_with_rate_limit(TargetSystem::SourceApi, || fetch(page), &CallOptions::default())
                .await
                .map_err(|e| format!("fetching {what} page {}: {e}", page.page))?;
            let short = batch.len() < page.limit as usize;
            all.extend(batch);
            if short {
                return Ok(all);
            }
            page = page.next();
        }
        warn!(what, pages = options.max_pages, "Page limit reached; collection may be incomplete");
        Ok(all)
    }

    /// Apply low-severity repairs. Failures are logged and skipped.
    async fn repair(&self, tenant: &TenantRef, discrepancies: &[Discrepancy]) -> Vec<RepairAction> {
        let mut done = Vec::new();
        let eligible = discrepancies
            .iter()
            .filter(|d| d.severity == Severity::Low && d.auto_repairable)
            .filter_map(|d| d.repair.as_ref());

        for action in eligible {
            match self.primary.apply_repair(&tenant.store_id, action).await {
                Ok(()) => {
                    debug!(%action, "Repaired");
                    metrics::record_repair(repair_label(action), "success");
                    done.push(action.clone());
                }
                Err(e) => {
                    warn!(%action, error = %e, "Repair failed");
                    metrics::record_repair(repair_label(action), "error");
                }
            }
        }
        done
    }

    async fn persist(&self, result: &ConsistencyCheckResult, options: &ConsistencyOptions) {
        if !options.generate_report {
            debug!(phase = %CheckPhase::Done, "Report generation disabled");
            return;
        }
        debug!(phase = %CheckPhase::Persist, "Persisting report");
        if let Err(e) = self.primary.insert_report(result).await {
            error!(report = %result.id, error = %e, "Failed to persist consistency report");
        }
        debug!(phase = %CheckPhase::Done, "Check finished");
    }
}

fn check_kind<T: Entity>(source: &[T], snapshot: &mut Snapshot, rules: &Rules<'_>, out: &mut Findings) -> RecordCounts {
    let primary = EntitySet::<T>::decode(snapshot.take_rows(T::KIND));
    let index_count = if T::KIND.is_indexed() {
        snapshot.index.as_ref().map(|s| s.count(T::KIND))
    } else {
        None
    };
    let input = Collection {
        source,
        primary: &primary,
        index_count,
        last_sync: snapshot.last_sync.get(&T::KIND).copied(),
    };
    check_collection(&input, rules, out);
    RecordCounts { source: source.len(), primary: primary.len(), index: index_count }
}

fn repair_label(action: &RepairAction) -> &'static str {
    match action {
        RepairAction::UpdateField { .. } => "update_field",
        RepairAction::RefreshSyncTimestamp { .. } => "refresh_sync_timestamp",
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn failed_result(
    tenant: &TenantRef,
    options: &ConsistencyOptions,
    kinds: &[EntityKind],
    checked_at: DateTime<Utc>,
    started: Instant,
    error: String,
) -> ConsistencyCheckResult {
    ConsistencyCheckResult {
        id: Uuid::new_v4(),
        tenant_id: tenant.store_id.clone(),
        level: options.level,
        data_types: kinds.to_vec(),
        overall_score: 0,
        system_scores: SystemScores { source_primary: 0, primary_index: 0, source_index: 0 },
        discrepancies: Vec::new(),
        statistics: CheckStatistics::default(),
        execution_time_ms: elapsed_ms(started),
        recommendations: vec![format!("Retry the check once the failure is resolved: {error}")],
        repairs_performed: Vec::new(),
        needs_attention: true,
        checked_at,
        next_check_at: checked_at + Duration::hours(RETRY_AFTER_HOURS),
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncConfig, TargetProfile};
    use crate::consistency::types::DiscrepancyType;
    use crate::model::VectorRecord;
    use crate::storage::memory::{MemoryEmbedder, MemoryPrimaryStore, MemorySearchIndex, MemorySource, SourceCatalog};
    use serde_json::json;

    const TENANT: &str = "shop-1";

    struct Fixture {
        source: Arc<MemorySource>,
        primary: Arc<MemoryPrimaryStore>,
        index: Arc<MemorySearchIndex>,
        checker: ConsistencyChecker,
    }

    fn fixture(options: ConsistencyOptions) -> Fixture {
        let mut config = SyncConfig::default();
        for target in TargetSystem::ALL {
            config.targets.insert(target, TargetProfile::test());
        }
        let source = Arc::new(MemorySource::new());
        let primary = Arc::new(MemoryPrimaryStore::new());
        let index = Arc::new(MemorySearchIndex::new());
        let manager = Arc::new(
            RateLimitedBatchManager::new(config, index.clone(), Arc::new(MemoryEmbedder::new(4))).unwrap(),
        );
        let checker = ConsistencyChecker::new(manager, source.clone(), primary.clone(), index.clone())
            .with_options(options);
        Fixture { source, primary, index, checker }
    }

    fn tenant() -> TenantRef {
        TenantRef::new(TENANT, "token")
    }

    fn product(id: u32, title: &str) -> ProductRecord {
        ProductRecord {
            id: format!("p{id}"),
            title: title.into(),
            handle: format!("item-{id}"),
            price: "19.99".into(),
            status: "active".into(),
            updated_at: Utc::now(),
        }
    }

    fn products_only(level: CheckLevel) -> ConsistencyOptions {
        ConsistencyOptions { level, data_types: vec![EntityKind::Product], ..ConsistencyOptions::default() }
    }

    /// Five products upstream, one renamed copy downstream, empty index.
    fn seed_renamed_product(f: &Fixture) {
        let upstream: Vec<_> = (1..=5).map(|i| product(i, &format!("Product {i}"))).collect();
        for p in &upstream {
            let mut stored = p.clone();
            if p.id == "p3" {
                stored.title = "Renamed".into();
            }
            f.primary.insert(TENANT, &stored).unwrap();
        }
        f.source.set_catalog(TENANT, SourceCatalog { products: upstream, ..Default::default() });
    }

    #[tokio::test]
    async fn test_renamed_product_and_empty_index_score_75() {
        let f = fixture(products_only(CheckLevel::Standard));
        seed_renamed_product(&f);

        let result = f.checker.execute_check(&tenant()).await;

        assert_eq!(result.discrepancies.len(), 2);
        assert_eq!(result.count(DiscrepancyType::Outdated, Severity::Medium), 1);
        assert_eq!(result.count(DiscrepancyType::Missing, Severity::High), 1);
        assert_eq!(result.overall_score, 75);
        assert_eq!(result.system_scores.source_primary, 90);
        assert_eq!(result.system_scores.source_index, 85);
        assert!(!result.needs_attention);
        assert_eq!(result.next_check_at - result.checked_at, Duration::hours(24));
        assert_eq!(result.statistics.records[&EntityKind::Product].source, 5);
        assert_eq!(result.statistics.records[&EntityKind::Product].index, Some(0));
        assert_eq!(f.primary.report_count(TENANT), 1);
    }

    #[tokio::test]
    async fn test_repeat_check_is_idempotent() {
        let f = fixture(products_only(CheckLevel::Comprehensive));
        seed_renamed_product(&f);

        let first = f.checker.execute_check(&tenant()).await;
        let second = f.checker.execute_check(&tenant()).await;

        assert_eq!(first.overall_score, second.overall_score);
        assert_eq!(first.fingerprints(), second.fingerprints());
        assert_ne!(first.id, second.id);

        let reports = f.checker.recent_reports(TENANT, 10).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].id, second.id);
    }

    #[tokio::test]
    async fn test_snapshot_failure_yields_zero_score() {
        let f = fixture(ConsistencyOptions::default());
        f.source.set_unavailable(true);

        let result = f.checker.execute_check(&tenant()).await;

        assert_eq!(result.overall_score, 0);
        assert!(result.needs_attention);
        assert!(result.discrepancies.is_empty());
        assert!(result.error.as_deref().unwrap().contains("fetching store"));
        assert!(result.recommendations[0].starts_with("Retry"));
        assert_eq!(f.primary.report_count(TENANT), 1);
    }

    #[tokio::test]
    async fn test_index_failure_yields_zero_score() {
        let f = fixture(products_only(CheckLevel::Standard));
        seed_renamed_product(&f);
        f.index.fail_namespace(&namespace_for(TENANT));

        let result = f.checker.execute_check(&tenant()).await;
        assert_eq!(result.overall_score, 0);
        assert!(result.error.unwrap().contains("search index"));
    }

    #[tokio::test]
    async fn test_auto_repair_fixes_cosmetic_fields_only() {
        let options = ConsistencyOptions { auto_repair: true, ..products_only(CheckLevel::Standard) };
        let f = fixture(options);
        let upstream = vec![product(1, "Hat"), product(2, "Scarf")];
        let mut cosmetic = upstream[0].clone();
        cosmetic.handle = "old-hat".into();
        let mut real = upstream[1].clone();
        real.price = "1.00".into();
        f.primary.insert(TENANT, &cosmetic).unwrap();
        f.primary.insert(TENANT, &real).unwrap();
        f.source.set_catalog(TENANT, SourceCatalog { products: upstream, ..Default::default() });
        f.index
            .upsert(
                &namespace_for(TENANT),
                vec![VectorRecord { id: "product:p1".into(), values: vec![0.0], metadata: json!({"kind": "product"}) }],
            )
            .await
            .unwrap();

        let result = f.checker.execute_check(&tenant()).await;

        assert_eq!(result.discrepancies.len(), 2);
        assert_eq!(result.repairs_performed.len(), 1);
        assert_eq!(result.statistics.repaired, 1);
        let row = f.primary.get_raw(TENANT, EntityKind::Product, "p1").unwrap();
        assert_eq!(row["handle"], "item-1");
        let untouched = f.primary.get_raw(TENANT, EntityKind::Product, "p2").unwrap();
        assert_eq!(untouched["price"], "1.00");

        // The repaired field no longer shows up
        let again = f.checker.execute_check(&tenant()).await;
        assert_eq!(again.discrepancies.len(), 1);
    }

    #[tokio::test]
    async fn test_no_repairs_without_auto_repair() {
        let f = fixture(products_only(CheckLevel::Standard));
        let upstream = vec![product(1, "Hat")];
        let mut cosmetic = upstream[0].clone();
        cosmetic.handle = "old-hat".into();
        f.primary.insert(TENANT, &cosmetic).unwrap();
        f.source.set_catalog(TENANT, SourceCatalog { products: upstream, ..Default::default() });

        let result = f.checker.execute_check(&tenant()).await;
        assert!(result.repairs_performed.is_empty());
        assert!(result.discrepancies.iter().any(|d| d.auto_repairable));
        assert_eq!(f.primary.get_raw(TENANT, EntityKind::Product, "p1").unwrap()["handle"], "old-hat");
    }

    #[tokio::test]
    async fn test_missing_store_needs_attention() {
        let options = ConsistencyOptions {
            level: CheckLevel::Basic,
            data_types: vec![EntityKind::Store, EntityKind::Analytics],
            ..ConsistencyOptions::default()
        };
        let f = fixture(options);
        let store = StoreRecord {
            id: TENANT.into(),
            name: "Shop".into(),
            domain: "shop.example.com".into(),
            currency: "USD".into(),
            email: None,
            timezone: None,
            updated_at: Utc::now(),
        };
        f.source.set_catalog(TENANT, SourceCatalog { store: Some(store), ..Default::default() });

        let result = f.checker.execute_check(&tenant()).await;

        assert_eq!(result.data_types, vec![EntityKind::Store, EntityKind::Analytics]);
        assert_eq!(result.count(DiscrepancyType::Missing, Severity::Critical), 1);
        assert_eq!(result.count(DiscrepancyType::Missing, Severity::High), 1);
        assert!(result.needs_attention);
        assert_eq!(result.overall_score, 60);
        assert_eq!(result.next_check_at - result.checked_at, Duration::hours(4));
    }

    #[tokio::test]
    async fn test_pagination_reads_every_page() {
        let options = ConsistencyOptions { page_size: 2, ..products_only(CheckLevel::Standard) };
        let f = fixture(options);
        let upstream: Vec<_> = (1..=5).map(|i| product(i, "Hat")).collect();
        for p in &upstream {
            f.primary.insert(TENANT, p).unwrap();
        }
        f.source.set_catalog(TENANT, SourceCatalog { products: upstream, ..Default::default() });

        let result = f.checker.execute_check(&tenant()).await;

        assert_eq!(f.source.calls(), 3);
        assert_eq!(result.statistics.records[&EntityKind::Product].source, 5);
        // Only the empty index is reported
        assert_eq!(result.discrepancies.len(), 1);
    }

    #[tokio::test]
    async fn test_discrepancy_cap_truncates() {
        let options = ConsistencyOptions { max_discrepancies: 2, ..products_only(CheckLevel::Standard) };
        let f = fixture(options);
        f.source.set_catalog(
            TENANT,
            SourceCatalog { products: (1..=5).map(|i| product(i, "Hat")).collect(), ..Default::default() },
        );

        let result = f.checker.execute_check(&tenant()).await;
        assert_eq!(result.discrepancies.len(), 2);
        assert!(result.statistics.truncated);
        assert!(result.recommendations.iter().any(|r| r.contains("cap")));
    }

    #[tokio::test]
    async fn test_invalid_run_options_are_rejected_before_snapshot() {
        let f = fixture(products_only(CheckLevel::Standard));
        seed_renamed_product(&f);

        let zero_page = ConsistencyOptions { page_size: 0, ..products_only(CheckLevel::Standard) };
        let result = f.checker.execute_check_with(&tenant(), &zero_page).await;

        assert_eq!(result.overall_score, 0);
        assert!(result.needs_attention);
        assert!(result.error.as_deref().unwrap().contains("page_size"));
        assert_eq!(f.source.calls(), 0);
        assert_eq!(f.primary.report_count(TENANT), 0);
    }

    #[tokio::test]
    async fn test_report_generation_can_be_disabled() {
        let options = ConsistencyOptions { generate_report: false, ..products_only(CheckLevel::Basic) };
        let f = fixture(options);
        f.source.set_catalog(TENANT, SourceCatalog::default());

        let result = f.checker.execute_check(&tenant()).await;
        assert_eq!(result.overall_score, 100);
        assert_eq!(result.recommendations, vec!["No action needed".to_string()]);
        assert_eq!(f.primary.report_count(TENANT), 0);
    }
}
