// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Options, findings and results of a consistency check.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::model::EntityKind;

/// How deep a check goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    /// Store record presence and per-kind record counts
    Basic,
    /// Field comparison, orphans and undecodable rows by id, staleness,
    /// search index non-empty
    #[default]
    Standard,
    /// Standard plus record validation and index parity
    Comprehensive,
}

impl CheckLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Comprehensive => "comprehensive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    /// Present upstream, absent downstream
    Missing,
    /// Present on both sides but different or stale
    Outdated,
    /// Present downstream but structurally invalid
    Corrupt,
    /// Present downstream, gone upstream
    Orphaned,
}

impl DiscrepancyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Outdated => "outdated",
            Self::Corrupt => "corrupt",
            Self::Orphaned => "orphaned",
        }
    }
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One of the three stores kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    Source,
    Primary,
    SearchIndex,
}

impl System {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Primary => "primary",
            Self::SearchIndex => "search_index",
        }
    }
}

/// The two stores a discrepancy was found between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPair {
    SourcePrimary,
    PrimaryIndex,
    SourceIndex,
}

impl SystemPair {
    pub const ALL: [SystemPair; 3] = [Self::SourcePrimary, Self::PrimaryIndex, Self::SourceIndex];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourcePrimary => "source_primary",
            Self::PrimaryIndex => "primary_index",
            Self::SourceIndex => "source_index",
        }
    }
}

/// A low-risk correction applied to the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    /// Overwrite one field with the upstream value
    UpdateField { kind: EntityKind, id: String, field: String, value: Value },
    /// Mark a kind as freshly synced after it was verified consistent
    RefreshSyncTimestamp { kind: EntityKind },
}

impl std::fmt::Display for RepairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateField { kind, id, field, .. } => write!(f, "update {kind} {id}.{field}"),
            Self::RefreshSyncTimestamp { kind } => write!(f, "refresh {kind} sync timestamp"),
        }
    }
}

/// One detected mismatch. Severity is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub discrepancy_type: DiscrepancyType,
    pub severity: Severity,
    /// Where the anomaly was found
    pub system: System,
    pub pair: SystemPair,
    pub kind: EntityKind,
    pub entity_id: Option<String>,
    pub field: Option<String>,
    pub description: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
    pub suggestion: String,
    pub auto_repairable: bool,
    pub repair: Option<RepairAction>,
}

impl Discrepancy {
    #[must_use]
    pub fn new(
        discrepancy_type: DiscrepancyType,
        severity: Severity,
        system: System,
        pair: SystemPair,
        kind: EntityKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            discrepancy_type,
            severity,
            system,
            pair,
            kind,
            entity_id: None,
            field: None,
            description: description.into(),
            expected: None,
            actual: None,
            suggestion: String::new(),
            auto_repairable: false,
            repair: None,
        }
    }

    #[must_use]
    pub fn entity(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn values(mut self, expected: Value, actual: Value) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }

    #[must_use]
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    /// Mark as repairable with `action`.
    #[must_use]
    pub fn repairable(mut self, action: RepairAction) -> Self {
        self.auto_repairable = true;
        self.repair = Some(action);
        self
    }

    /// Stable identity of the finding, independent of run and wording.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.discrepancy_type.as_str(),
            self.system.as_str(),
            self.pair.as_str(),
            self.kind.as_str(),
            self.entity_id.as_deref().unwrap_or(""),
            self.field.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

/// Score deduction per severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self { critical: 25, high: 15, medium: 10, low: 5 }
    }
}

impl ScoringPolicy {
    #[must_use]
    pub fn penalty(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

fn default_data_types() -> Vec<EntityKind> {
    vec![
        EntityKind::Store,
        EntityKind::Product,
        EntityKind::Order,
        EntityKind::Customer,
        EntityKind::Analytics,
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_discrepancies() -> usize {
    100
}

fn default_staleness_days() -> u32 {
    7
}

fn default_page_size() -> u32 {
    250
}

fn default_max_pages() -> u32 {
    40
}

/// What one check run looks at and what it may do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyOptions {
    #[serde(default)]
    pub level: CheckLevel,

    /// Entity kinds to check; checked in the fixed order store, products,
    /// orders, customers, analytics whatever order they are listed in
    #[serde(default = "default_data_types")]
    pub data_types: Vec<EntityKind>,

    /// Apply repairs for low-severity auto-repairable findings
    #[serde(default)]
    pub auto_repair: bool,

    /// Whether cosmetic field mismatches are offered as repairs
    #[serde(default = "default_true")]
    pub repair_cosmetic_fields: bool,

    /// Persist the result to the primary store
    #[serde(default = "default_true")]
    pub generate_report: bool,

    /// Hard cap on findings collected per run
    #[serde(default = "default_max_discrepancies")]
    pub max_discrepancies: usize,

    #[serde(default = "default_staleness_days")]
    pub staleness_threshold_days: u32,

    /// Page size for source collection reads
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on pages read per collection
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default)]
    pub penalties: ScoringPolicy,
}

impl Default for ConsistencyOptions {
    fn default() -> Self {
        Self {
            level: CheckLevel::default(),
            data_types: default_data_types(),
            auto_repair: false,
            repair_cosmetic_fields: true,
            generate_report: true,
            max_discrepancies: default_max_discrepancies(),
            staleness_threshold_days: default_staleness_days(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            penalties: ScoringPolicy::default(),
        }
    }
}

impl ConsistencyOptions {
    #[must_use]
    pub fn checks(&self, kind: EntityKind) -> bool {
        self.data_types.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_discrepancies == 0 {
            return Err(ConfigError::Consistency("max_discrepancies must be > 0"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Consistency("page_size must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Consistency("max_pages must be > 0"));
        }
        Ok(())
    }
}

/// Per-pair scores, same penalty table as the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemScores {
    pub source_primary: u8,
    pub primary_index: u8,
    pub source_index: u8,
}

impl SystemScores {
    #[must_use]
    pub fn get(&self, pair: SystemPair) -> u8 {
        match pair {
            SystemPair::SourcePrimary => self.source_primary,
            SystemPair::PrimaryIndex => self.primary_index,
            SystemPair::SourceIndex => self.source_index,
        }
    }
}

/// Records seen per kind in each store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub source: usize,
    pub primary: usize,
    pub index: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckStatistics {
    pub records: BTreeMap<EntityKind, RecordCounts>,
    pub total_discrepancies: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<DiscrepancyType, usize>,
    /// The discrepancy cap was hit; later findings were dropped
    pub truncated: bool,
    pub repaired: usize,
}

/// Outcome of one check run. Read-only once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheckResult {
    pub id: Uuid,
    pub tenant_id: String,
    pub level: CheckLevel,
    pub data_types: Vec<EntityKind>,
    /// 0..=100
    pub overall_score: u8,
    pub system_scores: SystemScores,
    pub discrepancies: Vec<Discrepancy>,
    pub statistics: CheckStatistics,
    pub execution_time_ms: u64,
    pub recommendations: Vec<String>,
    pub repairs_performed: Vec<RepairAction>,
    pub needs_attention: bool,
    pub checked_at: DateTime<Utc>,
    pub next_check_at: DateTime<Utc>,
    /// Set when the snapshot could not be taken
    pub error: Option<String>,
}

impl ConsistencyCheckResult {
    #[must_use]
    pub fn count(&self, discrepancy_type: DiscrepancyType, severity: Severity) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.discrepancy_type == discrepancy_type && d.severity == severity)
            .count()
    }

    /// Fingerprints of every finding, in result order.
    #[must_use]
    pub fn fingerprints(&self) -> Vec<String> {
        self.discrepancies.iter().map(Discrepancy::fingerprint).collect()
    }
}

/// Linear phases of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Init,
    Snapshot,
    Check(EntityKind),
    Score,
    Persist,
    Done,
}

impl std::fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Snapshot => f.write_str("snapshot"),
            Self::Check(kind) => write!(f, "check[{kind}]"),
            Self::Score => f.write_str("score"),
            Self::Persist => f.write_str("persist"),
            Self::Done => f.write_str("done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_fingerprint_ignores_wording() {
        let a = Discrepancy::new(
            DiscrepancyType::Outdated,
            Severity::Medium,
            System::Primary,
            SystemPair::SourcePrimary,
            EntityKind::Product,
            "title differs",
        )
        .entity("p1")
        .field("title");
        let mut b = a.clone();
        b.description = "something else".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);

        let c = a.clone().field("price");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: ConsistencyOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, ConsistencyOptions::default());
        assert_eq!(options.staleness_threshold_days, 7);
        assert_eq!(options.data_types.len(), 5);
        assert_eq!(options.penalties.penalty(Severity::Critical), 25);
    }

    #[test]
    fn test_repair_action_json_shape() {
        let action = RepairAction::RefreshSyncTimestamp { kind: EntityKind::Order };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"action": "refresh_sync_timestamp", "kind": "order"})
        );
        assert_eq!(action.to_string(), "refresh order sync timestamp");
    }

    #[test]
    fn test_discrepancy_serializes_type_field() {
        let d = Discrepancy::new(
            DiscrepancyType::Missing,
            Severity::High,
            System::SearchIndex,
            SystemPair::SourceIndex,
            EntityKind::Product,
            "no products indexed",
        );
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], "missing");
        assert_eq!(v["severity"], "high");
    }
}
