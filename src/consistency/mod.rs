// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Three-way consistency auditing.
//!
//! - [`types`]: options, findings and the persisted result
//! - [`compare`]: per-kind comparison rules
//! - [`scoring`]: score, attention flag, next-check time, recommendations
//! - [`checker`]: [`ConsistencyChecker`], which runs a check end to end

pub mod checker;
pub(crate) mod compare;
pub mod scoring;
pub mod types;

pub use checker::ConsistencyChecker;
pub use types::{
    CheckLevel, ConsistencyCheckResult, ConsistencyOptions, Discrepancy, DiscrepancyType,
    RepairAction, Severity, System, SystemPair,
};
