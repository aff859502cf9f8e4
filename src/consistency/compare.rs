// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Comparison rules. Pure functions over snapshot data; no I/O.
//!
//! | Finding  | Severity                              | Found in          |
//! |----------|---------------------------------------|-------------------|
//! | missing  | critical (store) / high (others)      | primary, index    |
//! | outdated | medium, low for cosmetic fields/stale | primary, index    |
//! | corrupt  | high                                  | primary           |
//! | orphaned | medium                                | primary           |
//!
//! `Basic` only compares counts. `Standard` works per id, so it reports
//! everything a count check would (orphans, undecodable rows) by id.
//! `Comprehensive` adds record validation and index parity.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::types::{
    CheckLevel, ConsistencyOptions, Discrepancy, DiscrepancyType, RepairAction, Severity, System,
    SystemPair,
};
use crate::model::{AnalyticsSummary, Entity, EntityKind, EntitySet};

/// Capped, de-duplicated collector of findings.
#[derive(Debug)]
pub(crate) struct Findings {
    items: Vec<Discrepancy>,
    seen: HashSet<String>,
    cap: usize,
    truncated: bool,
}

impl Findings {
    pub(crate) fn new(cap: usize) -> Self {
        Self { items: Vec::new(), seen: HashSet::new(), cap, truncated: false }
    }

    pub(crate) fn push(&mut self, d: Discrepancy) {
        let fingerprint = d.fingerprint();
        if self.seen.contains(&fingerprint) {
            return;
        }
        if self.items.len() >= self.cap {
            self.truncated = true;
            return;
        }
        self.seen.insert(fingerprint);
        self.items.push(d);
    }

    fn has_kind(&self, kind: EntityKind) -> bool {
        self.items.iter().any(|d| d.kind == kind)
    }

    pub(crate) fn into_parts(self) -> (Vec<Discrepancy>, bool) {
        (self.items, self.truncated)
    }
}

/// Settings shared by every rule in one run.
pub(crate) struct Rules<'a> {
    pub level: CheckLevel,
    pub options: &'a ConsistencyOptions,
    pub now: DateTime<Utc>,
}

impl Rules<'_> {
    fn comprehensive(&self) -> bool {
        self.level == CheckLevel::Comprehensive
    }
}

/// One kind's data from all three stores.
pub(crate) struct Collection<'a, T> {
    pub source: &'a [T],
    pub primary: &'a EntitySet<T>,
    /// `None` when the index was not consulted
    pub index_count: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
}

pub(crate) fn check_collection<T: Entity>(input: &Collection<'_, T>, rules: &Rules<'_>, out: &mut Findings) {
    let kind = T::KIND;
    let source: BTreeMap<&str, &T> = input.source.iter().map(|r| (r.id(), r)).collect();

    if rules.level == CheckLevel::Basic {
        check_counts(kind, source.len(), input.primary.len(), out);
        return;
    }

    for (id, upstream) in &source {
        if let Some(reason) = input.primary.undecodable.get(*id) {
            out.push(corrupt(kind, id, format!("{kind} {id} cannot be decoded: {reason}")));
            continue;
        }
        let Some(stored) = input.primary.records.get(*id) else {
            out.push(
                Discrepancy::new(
                    DiscrepancyType::Missing,
                    missing_severity(kind),
                    System::Primary,
                    SystemPair::SourcePrimary,
                    kind,
                    format!("{kind} {id} exists in the source system but not in the primary store"),
                )
                .entity(*id)
                .suggest(format!("Resync {kind} {id} from the source system")),
            );
            continue;
        };
        if rules.comprehensive() {
            if let Err(reason) = stored.validate() {
                out.push(corrupt(kind, id, format!("{kind} {id} fails validation: {reason}")));
            }
        }
        compare_fields(kind, id, *upstream, stored, rules, out);
    }

    let stored_ids = input.primary.records.keys().chain(input.primary.undecodable.keys());
    for id in stored_ids {
        if !source.contains_key(id.as_str()) {
            out.push(
                Discrepancy::new(
                    DiscrepancyType::Orphaned,
                    Severity::Medium,
                    System::Primary,
                    SystemPair::SourcePrimary,
                    kind,
                    format!("{kind} {id} is in the primary store but no longer in the source system"),
                )
                .entity(id.as_str())
                .suggest("Confirm the record was deleted upstream, then remove it"),
            );
        }
    }

    check_staleness(kind, input.last_sync, rules, out);

    if kind.is_indexed() {
        if let Some(indexed) = input.index_count {
            check_index(kind, source.len(), input.primary.records.len(), indexed, rules, out);
        }
    }
}

fn missing_severity(kind: EntityKind) -> Severity {
    if kind.is_core() {
        Severity::Critical
    } else {
        Severity::High
    }
}

fn corrupt(kind: EntityKind, id: &str, description: String) -> Discrepancy {
    Discrepancy::new(
        DiscrepancyType::Corrupt,
        Severity::High,
        System::Primary,
        SystemPair::SourcePrimary,
        kind,
        description,
    )
    .entity(id)
    .suggest(format!("Rewrite {kind} {id} from the source system"))
}

fn check_counts(kind: EntityKind, source: usize, primary: usize, out: &mut Findings) {
    if source > primary {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Missing,
                missing_severity(kind),
                System::Primary,
                SystemPair::SourcePrimary,
                kind,
                format!("{} {kind} records in the source system are missing from the primary store", source - primary),
            )
            .values(json!(source), json!(primary))
            .suggest(format!("Run a {kind} sync")),
        );
    } else if primary > source {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Orphaned,
                Severity::Medium,
                System::Primary,
                SystemPair::SourcePrimary,
                kind,
                format!("{} {kind} records in the primary store are no longer in the source system", primary - source),
            )
            .values(json!(source), json!(primary))
            .suggest("Run a standard check to identify the orphaned records"),
        );
    }
}

fn compare_fields<T: Entity>(kind: EntityKind, id: &str, upstream: &T, stored: &T, rules: &Rules<'_>, out: &mut Findings) {
    for (expected, actual) in upstream.fields().into_iter().zip(stored.fields()) {
        if expected.value == actual.value {
            continue;
        }
        let field = expected.name;
        let severity = if expected.cosmetic { Severity::Low } else { Severity::Medium };
        let mut d = Discrepancy::new(
            DiscrepancyType::Outdated,
            severity,
            System::Primary,
            SystemPair::SourcePrimary,
            kind,
            format!("{kind} {id}: {field} differs from the source system"),
        )
        .entity(id)
        .field(field)
        .values(expected.value.clone(), actual.value)
        .suggest(format!("Resync {kind} {id}"));

        if expected.cosmetic && rules.options.repair_cosmetic_fields {
            d = d.repairable(RepairAction::UpdateField {
                kind,
                id: id.to_string(),
                field: field.to_string(),
                value: expected.value,
            });
        }
        out.push(d);
    }
}

fn check_staleness(kind: EntityKind, last_sync: Option<DateTime<Utc>>, rules: &Rules<'_>, out: &mut Findings) {
    let Some(last) = last_sync else {
        return;
    };
    let age = rules.now - last;
    if age <= Duration::days(i64::from(rules.options.staleness_threshold_days)) {
        return;
    }

    // Only a kind whose data checked out may simply have its timestamp refreshed
    let verified = !out.truncated && !out.has_kind(kind);
    let mut d = Discrepancy::new(
        DiscrepancyType::Outdated,
        Severity::Low,
        System::Primary,
        SystemPair::SourcePrimary,
        kind,
        format!("last {kind} sync was {} days ago", age.num_days()),
    )
    .field("last_synced_at")
    .suggest(format!("Schedule a {kind} sync"));
    if verified {
        d = d.repairable(RepairAction::RefreshSyncTimestamp { kind });
    }
    out.push(d);
}

fn check_index(kind: EntityKind, source: usize, primary: usize, indexed: u64, rules: &Rules<'_>, out: &mut Findings) {
    if source > 0 && indexed == 0 {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Missing,
                Severity::High,
                System::SearchIndex,
                SystemPair::SourceIndex,
                kind,
                format!("search index has no {kind} vectors; source system has {source}"),
            )
            .values(json!(source), json!(0))
            .suggest(format!("Re-index {kind} records for this store")),
        );
    } else if rules.comprehensive() && indexed > 0 && indexed != primary as u64 {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Outdated,
                Severity::Medium,
                System::SearchIndex,
                SystemPair::PrimaryIndex,
                kind,
                format!("search index holds {indexed} {kind} vectors; primary store has {primary}"),
            )
            .values(json!(primary), json!(indexed))
            .suggest(format!("Re-index {kind} records for this store")),
        );
    }
}

/// Compare the summary implied by source orders with the stored one.
pub(crate) fn check_analytics(expected: &AnalyticsSummary, stored: Option<&Value>, rules: &Rules<'_>, out: &mut Findings) {
    let kind = EntityKind::Analytics;
    let id = AnalyticsSummary::ID;

    let Some(row) = stored else {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Missing,
                Severity::High,
                System::Primary,
                SystemPair::SourcePrimary,
                kind,
                "primary store has no analytics summary",
            )
            .entity(id)
            .suggest("Recompute analytics for this store"),
        );
        return;
    };

    let actual: AnalyticsSummary = match serde_json::from_value(row.clone()) {
        Ok(summary) => summary,
        Err(e) => {
            out.push(corrupt(kind, id, format!("analytics summary cannot be decoded: {e}")));
            return;
        }
    };

    let mut mismatch = |field: &str, want: Value, have: Value| {
        out.push(
            Discrepancy::new(
                DiscrepancyType::Outdated,
                Severity::Medium,
                System::Primary,
                SystemPair::SourcePrimary,
                kind,
                format!("analytics {field} differs from the source system"),
            )
            .entity(id)
            .field(field)
            .values(want, have)
            .suggest("Recompute analytics for this store"),
        );
    };

    if expected.order_count != actual.order_count {
        mismatch("order_count", json!(expected.order_count), json!(actual.order_count));
    }
    if (expected.total_revenue - actual.total_revenue).abs() > 0.005 {
        mismatch("total_revenue", json!(expected.total_revenue), json!(actual.total_revenue));
    }
    if expected.customer_count != actual.customer_count {
        mismatch("customer_count", json!(expected.customer_count), json!(actual.customer_count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::scoring;
    use crate::consistency::types::ScoringPolicy;
    use crate::model::{OrderRecord, ProductRecord, StoreRecord};
    use std::collections::BTreeMap;

    fn product(id: &str, title: &str) -> ProductRecord {
        ProductRecord {
            id: id.into(),
            title: title.into(),
            handle: format!("handle-{id}"),
            price: "10.00".into(),
            status: "active".into(),
            updated_at: Utc::now(),
        }
    }

    fn primary<T: Entity>(records: &[T]) -> EntitySet<T> {
        let rows: BTreeMap<String, Value> = records
            .iter()
            .map(|r| (r.id().to_string(), serde_json::to_value(r).unwrap()))
            .collect();
        EntitySet::decode(rows)
    }

    fn run<T: Entity>(level: CheckLevel, input: &Collection<'_, T>) -> Vec<Discrepancy> {
        let options = ConsistencyOptions::default();
        let rules = Rules { level, options: &options, now: Utc::now() };
        let mut out = Findings::new(100);
        check_collection(input, &rules, &mut out);
        out.into_parts().0
    }

    #[test]
    fn test_name_mismatch_and_empty_index() {
        let source: Vec<_> = (1..=5).map(|i| product(&i.to_string(), "Hat")).collect();
        let mut stored = source.clone();
        stored[2].title = "Cap".into();
        let stored = primary(&stored);

        let found = run(
            CheckLevel::Standard,
            &Collection { source: &source, primary: &stored, index_count: Some(0), last_sync: None },
        );

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].discrepancy_type, DiscrepancyType::Outdated);
        assert_eq!(found[0].severity, Severity::Medium);
        assert_eq!(found[0].field.as_deref(), Some("title"));
        assert_eq!(found[0].expected, Some(json!("Hat")));
        assert_eq!(found[1].discrepancy_type, DiscrepancyType::Missing);
        assert_eq!(found[1].severity, Severity::High);
        assert_eq!(found[1].system, System::SearchIndex);
    }

    #[test]
    fn test_cosmetic_mismatch_is_low_and_repairable() {
        let source = vec![product("1", "Hat")];
        let mut stored = source.clone();
        stored[0].handle = "old-handle".into();
        let stored = primary(&stored);

        let found = run(
            CheckLevel::Standard,
            &Collection { source: &source, primary: &stored, index_count: None, last_sync: None },
        );

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Low);
        assert!(found[0].auto_repairable);
        assert_eq!(
            found[0].repair,
            Some(RepairAction::UpdateField {
                kind: EntityKind::Product,
                id: "1".into(),
                field: "handle".into(),
                value: json!("handle-1"),
            })
        );
    }

    #[test]
    fn test_missing_store_is_critical() {
        let store = StoreRecord {
            id: "s1".into(),
            name: "Shop".into(),
            domain: "shop.example.com".into(),
            currency: "USD".into(),
            email: None,
            timezone: None,
            updated_at: Utc::now(),
        };
        let empty = EntitySet::<StoreRecord>::default();
        for level in [CheckLevel::Basic, CheckLevel::Standard] {
            let found = run(
                level,
                &Collection { source: std::slice::from_ref(&store), primary: &empty, index_count: None, last_sync: None },
            );
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].severity, Severity::Critical);
            assert_eq!(found[0].discrepancy_type, DiscrepancyType::Missing);
        }
    }

    #[test]
    fn test_basic_level_compares_counts_only() {
        let source = vec![product("1", "Hat"), product("2", "Scarf")];
        let stored = primary(&[product("1", "Different"), product("2", "Scarf"), product("3", "Gone")]);

        let found = run(
            CheckLevel::Basic,
            &Collection { source: &source, primary: &stored, index_count: Some(0), last_sync: None },
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].discrepancy_type, DiscrepancyType::Orphaned);
        assert_eq!(found[0].entity_id, None);
    }

    #[test]
    fn test_standard_reports_what_basic_counts() {
        let source = vec![product("1", "Hat"), product("2", "Scarf")];
        let mut rows: BTreeMap<String, Value> = BTreeMap::new();
        rows.insert("1".into(), serde_json::to_value(product("1", "Hat")).unwrap());
        rows.insert("2".into(), json!({"id": "2", "title": 7}));
        rows.insert("8".into(), serde_json::to_value(product("8", "Old")).unwrap());
        rows.insert("9".into(), serde_json::to_value(product("9", "Older")).unwrap());
        let stored = EntitySet::<ProductRecord>::decode(rows);
        let input = Collection { source: &source, primary: &stored, index_count: None, last_sync: None };

        let basic = run(CheckLevel::Basic, &input);
        assert_eq!(basic.len(), 1);
        assert_eq!(basic[0].discrepancy_type, DiscrepancyType::Orphaned);

        let standard = run(CheckLevel::Standard, &input);
        let found: Vec<_> = standard
            .iter()
            .map(|d| (d.discrepancy_type, d.entity_id.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            found,
            vec![
                (DiscrepancyType::Corrupt, "2".to_string()),
                (DiscrepancyType::Orphaned, "8".to_string()),
                (DiscrepancyType::Orphaned, "9".to_string()),
            ]
        );
        let policy = ScoringPolicy::default();
        assert!(scoring::score(&standard, &policy) < scoring::score(&basic, &policy));
    }

    #[test]
    fn test_comprehensive_finds_corrupt_orphans_and_parity() {
        let source = vec![product("1", "Hat"), product("2", "Scarf")];
        let mut rows: BTreeMap<String, Value> = BTreeMap::new();
        rows.insert("1".into(), serde_json::to_value(product("1", "Hat")).unwrap());
        rows.insert("2".into(), json!({"id": "2", "title": 7}));
        rows.insert("9".into(), serde_json::to_value(product("9", "Old")).unwrap());
        let stored = EntitySet::<ProductRecord>::decode(rows);

        let found = run(
            CheckLevel::Comprehensive,
            &Collection { source: &source, primary: &stored, index_count: Some(5), last_sync: None },
        );

        let types: Vec<_> = found.iter().map(|d| d.discrepancy_type).collect();
        assert_eq!(
            types,
            vec![DiscrepancyType::Corrupt, DiscrepancyType::Orphaned, DiscrepancyType::Outdated]
        );
        assert_eq!(found[0].entity_id.as_deref(), Some("2"));
        assert_eq!(found[1].entity_id.as_deref(), Some("9"));
        assert_eq!(found[2].pair, SystemPair::PrimaryIndex);
    }

    #[test]
    fn test_comprehensive_validates_decoded_records() {
        let source = vec![product("1", "Hat")];
        let mut bad = product("1", "Hat");
        bad.price = "-3".into();
        let stored = primary(&[bad]);

        let found = run(
            CheckLevel::Comprehensive,
            &Collection { source: &source, primary: &stored, index_count: None, last_sync: None },
        );
        assert_eq!(found[0].discrepancy_type, DiscrepancyType::Corrupt);
        // The price itself also differs
        assert_eq!(found[1].field.as_deref(), Some("price"));
    }

    #[test]
    fn test_staleness_repair_only_when_verified() {
        let source = vec![product("1", "Hat")];
        let stale = Some(Utc::now() - Duration::days(10));

        let clean = primary(&source);
        let found = run(
            CheckLevel::Standard,
            &Collection { source: &source, primary: &clean, index_count: None, last_sync: stale },
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Low);
        assert_eq!(found[0].repair, Some(RepairAction::RefreshSyncTimestamp { kind: EntityKind::Product }));

        let dirty = primary(&[product("1", "Cap")]);
        let found = run(
            CheckLevel::Standard,
            &Collection { source: &source, primary: &dirty, index_count: None, last_sync: stale },
        );
        assert_eq!(found.len(), 2);
        assert!(!found[1].auto_repairable);

        let fresh = Some(Utc::now() - Duration::days(2));
        let found = run(
            CheckLevel::Standard,
            &Collection { source: &source, primary: &clean, index_count: None, last_sync: fresh },
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_findings_cap_and_dedupe() {
        let mut out = Findings::new(2);
        let d = || {
            Discrepancy::new(
                DiscrepancyType::Missing,
                Severity::High,
                System::Primary,
                SystemPair::SourcePrimary,
                EntityKind::Order,
                "x",
            )
        };
        out.push(d().entity("1"));
        out.push(d().entity("1"));
        out.push(d().entity("2"));
        out.push(d().entity("3"));
        let (items, truncated) = out.into_parts();
        assert_eq!(items.len(), 2);
        assert!(truncated);
    }

    #[test]
    fn test_analytics_mismatch() {
        let now = Utc::now();
        let order = |id: &str, total: f64| OrderRecord {
            id: id.into(),
            order_number: id.into(),
            total_price: total,
            currency: "USD".into(),
            customer_id: None,
            financial_status: "paid".into(),
            updated_at: now,
        };
        let expected = AnalyticsSummary::derive(&[order("1", 10.0), order("2", 5.5)], 2, now);
        let options = ConsistencyOptions::default();
        let rules = Rules { level: CheckLevel::Standard, options: &options, now };

        let mut out = Findings::new(10);
        check_analytics(&expected, None, &rules, &mut out);
        assert_eq!(out.into_parts().0[0].discrepancy_type, DiscrepancyType::Missing);

        let stale = AnalyticsSummary { order_count: 1, total_revenue: 10.0, ..expected.clone() };
        let row = serde_json::to_value(&stale).unwrap();
        let mut out = Findings::new(10);
        check_analytics(&expected, Some(&row), &rules, &mut out);
        let fields: Vec<_> = out.into_parts().0.into_iter().filter_map(|d| d.field).collect();
        assert_eq!(fields, vec!["order_count", "total_revenue"]);

        let same = serde_json::to_value(&expected).unwrap();
        let mut out = Findings::new(10);
        check_analytics(&expected, Some(&same), &rules, &mut out);
        assert!(out.into_parts().0.is_empty());
    }
}
