// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Turning findings into a score, an attention flag and a next-check time.

use std::collections::BTreeSet;

use chrono::Duration;

use super::types::{
    CheckStatistics, Discrepancy, DiscrepancyType, ScoringPolicy, Severity, System, SystemPair,
    SystemScores,
};
use crate::model::EntityKind;

/// `100 - Σ penalty(severity)`, floored at 0.
#[must_use]
pub fn score<'a>(discrepancies: impl IntoIterator<Item = &'a Discrepancy>, policy: &ScoringPolicy) -> u8 {
    let penalty: u32 = discrepancies.into_iter().map(|d| policy.penalty(d.severity)).sum();
    u8::try_from(100u32.saturating_sub(penalty)).unwrap_or(0)
}

#[must_use]
pub fn system_scores(discrepancies: &[Discrepancy], policy: &ScoringPolicy) -> SystemScores {
    let for_pair = |pair: SystemPair| score(discrepancies.iter().filter(|d| d.pair == pair), policy);
    SystemScores {
        source_primary: for_pair(SystemPair::SourcePrimary),
        primary_index: for_pair(SystemPair::PrimaryIndex),
        source_index: for_pair(SystemPair::SourceIndex),
    }
}

/// Any critical finding, or more than two high ones.
#[must_use]
pub fn needs_attention(discrepancies: &[Discrepancy]) -> bool {
    let high = discrepancies.iter().filter(|d| d.severity == Severity::High).count();
    discrepancies.iter().any(|d| d.severity == Severity::Critical) || high > 2
}

/// Sooner the worse the worst finding is.
#[must_use]
pub fn next_check_interval(discrepancies: &[Discrepancy]) -> Duration {
    match discrepancies.iter().map(|d| d.severity).max() {
        Some(Severity::Critical) => Duration::hours(4),
        Some(Severity::High) => Duration::hours(24),
        Some(_) => Duration::hours(72),
        None => Duration::hours(168),
    }
}

#[must_use]
pub fn statistics(discrepancies: &[Discrepancy], base: CheckStatistics) -> CheckStatistics {
    let mut stats = base;
    stats.total_discrepancies = discrepancies.len();
    stats.by_severity.clear();
    stats.by_type.clear();
    for d in discrepancies {
        *stats.by_severity.entry(d.severity).or_default() += 1;
        *stats.by_type.entry(d.discrepancy_type).or_default() += 1;
    }
    stats
}

fn kinds_where(discrepancies: &[Discrepancy], pred: impl Fn(&Discrepancy) -> bool) -> String {
    let kinds: BTreeSet<EntityKind> = discrepancies.iter().filter(|d| pred(d)).map(|d| d.kind).collect();
    kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}

/// Human-readable next steps, in a fixed order.
#[must_use]
pub fn recommendations(discrepancies: &[Discrepancy], truncated: bool) -> Vec<String> {
    let mut out = Vec::new();
    let any = |t: DiscrepancyType, system: System| {
        discrepancies.iter().any(|d| d.discrepancy_type == t && d.system == system)
    };

    if any(DiscrepancyType::Missing, System::Primary) {
        let kinds = kinds_where(discrepancies, |d| {
            d.discrepancy_type == DiscrepancyType::Missing && d.system == System::Primary
        });
        out.push(format!("Run a full resync from the source system for: {kinds}"));
    }
    if any(DiscrepancyType::Missing, System::SearchIndex) {
        let kinds = kinds_where(discrepancies, |d| {
            d.discrepancy_type == DiscrepancyType::Missing && d.system == System::SearchIndex
        });
        out.push(format!("Re-index into the search index: {kinds}"));
    }
    if discrepancies
        .iter()
        .any(|d| d.discrepancy_type == DiscrepancyType::Outdated && !d.auto_repairable)
    {
        out.push("Resync records whose fields differ from the source system".to_string());
    }
    if discrepancies.iter().any(|d| d.discrepancy_type == DiscrepancyType::Corrupt) {
        out.push("Inspect and rewrite corrupt records in the primary store".to_string());
    }
    if discrepancies.iter().any(|d| d.discrepancy_type == DiscrepancyType::Orphaned) {
        out.push("Review orphaned records before removing them".to_string());
    }
    if discrepancies.iter().any(|d| d.auto_repairable) {
        out.push("Enable auto-repair to fix low-risk findings automatically".to_string());
    }
    if truncated {
        out.push("Discrepancy cap reached; rerun with fewer data types to see the rest".to_string());
    }
    if out.is_empty() {
        out.push("No action needed".to_string());
    }
    out
}
