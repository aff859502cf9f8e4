//! Property-based tests (fuzzing) for storefront-sync.
//!
//! Uses proptest to generate random inputs and verify that:
//! - no rolling one-second window holds more calls than the target allows
//! - batches always dispatch in (priority, arrival) order
//! - scoring is bounded, order-independent and deterministic
//! - malformed stored rows and config documents fail cleanly, never panic
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};

use storefront_sync::batching::{BatchExecutor, BatchProcessor};
use storefront_sync::consistency::scoring;
use storefront_sync::consistency::types::ScoringPolicy;
use storefront_sync::model::{EntitySet, ProductRecord};
use storefront_sync::{
    BatchError, BatchOptions, BatchType, BatchTypeConfig, CallOptions, Discrepancy, DiscrepancyType,
    EntityKind, Priority, RateLimiter, Severity, SyncConfig, System, SystemPair, TargetProfile,
    TargetSystem,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Normal), Just(Priority::Low)]
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn pair_strategy() -> impl Strategy<Value = SystemPair> {
    prop_oneof![
        Just(SystemPair::SourcePrimary),
        Just(SystemPair::PrimaryIndex),
        Just(SystemPair::SourceIndex),
    ]
}

fn discrepancy_strategy() -> impl Strategy<Value = Discrepancy> {
    (severity_strategy(), pair_strategy(), "[a-z0-9]{1,8}").prop_map(|(severity, pair, id)| {
        Discrepancy::new(
            DiscrepancyType::Outdated,
            severity,
            System::Primary,
            pair,
            EntityKind::Product,
            format!("product {id} differs"),
        )
        .entity(id)
    })
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

// =============================================================================
// Pacing
// =============================================================================

/// Run `callers` concurrent calls through one limiter on paused time and
/// return the instants at which the operation actually started.
fn dispatch_times(rps: u32, max_concurrent: usize, callers: usize, work_ms: u64) -> Vec<tokio::time::Instant> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async {
        let limiter = Arc::new(RateLimiter::new(
            TargetSystem::SourceApi,
            TargetProfile {
                requests_per_second: rps,
                requests_per_minute: 100_000,
                burst_allowance: 0,
                max_concurrent,
                retry_attempts: 0,
                backoff_multiplier: 2.0,
                circuit_breaker_threshold: 100,
                circuit_breaker_timeout_ms: 1_000,
                timeout_ms: 0,
            },
        ));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let limiter = limiter.clone();
                let stamps = stamps.clone();
                tokio::spawn(async move {
                    limiter
                        .execute(
                            move || {
                                let stamps = stamps.clone();
                                async move {
                                    stamps.lock().push(tokio::time::Instant::now());
                                    tokio::time::sleep(Duration::from_millis(work_ms)).await;
                                    Ok::<_, String>(())
                                }
                            },
                            &CallOptions::default(),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut stamps = stamps.lock().clone();
        stamps.sort();
        stamps
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any `rps + 1` consecutive dispatches span at least one second.
    #[test]
    fn prop_pacing_never_exceeds_rate(
        rps in 1u32..6,
        max_concurrent in 1usize..5,
        callers in 1usize..25,
        work_ms in 0u64..400,
    ) {
        let stamps = dispatch_times(rps, max_concurrent, callers, work_ms);
        prop_assert_eq!(stamps.len(), callers);

        let per_second = rps as usize;
        for pair in stamps.windows(per_second + 1) {
            prop_assert!(pair[per_second] - pair[0] >= Duration::from_secs(1));
        }
    }
}

// =============================================================================
// Batch ordering
// =============================================================================

#[derive(Default)]
struct OrderLog {
    dispatched: Mutex<Vec<usize>>,
}

#[async_trait]
impl BatchExecutor for OrderLog {
    type Input = usize;
    type Output = usize;

    fn batch_type(&self) -> BatchType {
        BatchType::Embed
    }

    async fn execute(&self, inputs: Vec<usize>) -> Result<Vec<Result<usize, BatchError>>, BatchError> {
        self.dispatched.lock().extend(inputs.iter().copied());
        Ok(inputs.into_iter().map(Ok).collect())
    }
}

/// Submit every item in one burst, flush, and return the dispatch order.
fn dispatch_order(priorities: &[Priority], max_batch_size: usize) -> (Vec<usize>, Vec<Result<usize, BatchError>>) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let log = Arc::new(OrderLog::default());
        let config = BatchTypeConfig {
            max_batch_size,
            flush_interval_ms: 3_600_000,
            max_wait_time_ms: 3_600_000,
            ..BatchTypeConfig::default()
        };
        let processor = BatchProcessor::with_executor(config, log.clone());
        let tickets: Vec<_> = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| processor.add(i, BatchOptions::from(*p)))
            .collect();
        processor.flush_all().await;
        let results = futures::future::join_all(tickets).await;
        let order = log.dispatched.lock().clone();
        (order, results)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A single burst that fits one batch dispatches as a stable sort by priority.
    #[test]
    fn prop_single_batch_is_priority_sorted(priorities in prop::collection::vec(priority_strategy(), 1..60)) {
        let (order, results) = dispatch_order(&priorities, 64);

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&i| priorities[i]);
        prop_assert_eq!(order, expected);

        for (i, result) in results.into_iter().enumerate() {
            prop_assert_eq!(result, Ok(i));
        }
    }

    /// However the burst is split into batches, every ticket settles once
    /// and nothing is dispatched twice.
    #[test]
    fn prop_every_ticket_settles_once(
        priorities in prop::collection::vec(priority_strategy(), 1..80),
        max_batch_size in 1usize..10,
    ) {
        let (order, results) = dispatch_order(&priorities, max_batch_size);

        prop_assert_eq!(results.len(), priorities.len());
        prop_assert!(results.iter().all(Result::is_ok));
        let mut seen = order.clone();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), order.len());
        prop_assert_eq!(order.len(), priorities.len());
    }
}

// =============================================================================
// Scoring
// =============================================================================

proptest! {
    /// `score = max(0, 100 - Σ penalties)` for the default policy.
    #[test]
    fn prop_score_is_bounded_penalty_sum(findings in prop::collection::vec(discrepancy_strategy(), 0..20)) {
        let policy = ScoringPolicy::default();
        let penalty: u32 = findings.iter().map(|d| policy.penalty(d.severity)).sum();
        let score = scoring::score(&findings, &policy);

        prop_assert!(score <= 100);
        prop_assert_eq!(u32::from(score), 100u32.saturating_sub(penalty));
    }

    /// Scores, attention flag and next-check interval ignore finding order.
    #[test]
    fn prop_scoring_ignores_order(findings in prop::collection::vec(discrepancy_strategy(), 0..20)) {
        let policy = ScoringPolicy::default();
        let mut reversed = findings.clone();
        reversed.reverse();

        prop_assert_eq!(scoring::score(&findings, &policy), scoring::score(&reversed, &policy));
        prop_assert_eq!(
            scoring::system_scores(&findings, &policy),
            scoring::system_scores(&reversed, &policy)
        );
        prop_assert_eq!(scoring::needs_attention(&findings), scoring::needs_attention(&reversed));
        prop_assert_eq!(
            scoring::next_check_interval(&findings),
            scoring::next_check_interval(&reversed)
        );
    }

    /// A pair's score never drops below the overall score.
    #[test]
    fn prop_pair_scores_dominate_overall(findings in prop::collection::vec(discrepancy_strategy(), 0..20)) {
        let policy = ScoringPolicy::default();
        let overall = scoring::score(&findings, &policy);
        let pairs = scoring::system_scores(&findings, &policy);
        for pair in SystemPair::ALL {
            prop_assert!(pairs.get(pair) >= overall);
        }
    }

    /// Fingerprints ignore wording and suggestions.
    #[test]
    fn prop_fingerprint_ignores_description(d in discrepancy_strategy(), text in ".*") {
        let reworded = Discrepancy { description: text.clone(), ..d.clone() }.suggest(text);
        prop_assert_eq!(d.fingerprint(), reworded.fingerprint());
    }
}

// =============================================================================
// Decoding Fuzz Tests
// =============================================================================

proptest! {
    /// Arbitrary stored rows split cleanly into decoded and undecodable.
    #[test]
    fn fuzz_entity_set_never_panics(rows in prop::collection::btree_map("[a-z0-9]{1,6}", arbitrary_json_strategy(), 0..12)) {
        let total = rows.len();
        let set = EntitySet::<ProductRecord>::decode(rows);
        prop_assert_eq!(set.records.len() + set.undecodable.len(), total);
    }

    /// Config documents never panic on deserialize; valid ones validate or
    /// return a clean error.
    #[test]
    fn fuzz_sync_config_from_arbitrary_json(doc in arbitrary_json_strategy()) {
        if let Ok(config) = serde_json::from_value::<SyncConfig>(doc) {
            let _ = config.validate();
        }
    }

    /// SyncConfig deserialization should never panic on arbitrary bytes
    #[test]
    fn fuzz_sync_config_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = serde_json::from_slice::<SyncConfig>(&bytes);
    }
}

#[test]
fn well_formed_rows_decode() {
    let rows: BTreeMap<String, Value> = [(
        "p1".to_string(),
        json!({
            "id": "p1",
            "title": "Linen Shirt",
            "handle": "linen-shirt",
            "price": "49.00",
            "status": "active",
            "updated_at": "2026-03-01T12:00:00Z"
        }),
    )]
    .into_iter()
    .collect();

    let set = EntitySet::<ProductRecord>::decode(rows);
    assert_eq!(set.len(), 1);
    assert!(set.undecodable.is_empty());
    assert_eq!(set.records["p1"].title, "Linen Shirt");
}
