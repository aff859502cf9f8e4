// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic storefront-sync usage example.
//!
//! Demonstrates:
//! 1. Building the manager and checker over in-memory backends
//! 2. Syncing a small catalog through the embed and upsert batches
//! 3. Running a consistency check on the synced tenant
//! 4. Introducing drift and checking again with auto-repair
//! 5. Displaying rate-limit status and captured metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use chrono::Utc;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

use storefront_sync::batching::{EmbedRequest, UpsertRequest};
use storefront_sync::manager::kind;
use storefront_sync::model::{namespace_for, Entity, EntityKind, ProductRecord, VectorRecord};
use storefront_sync::storage::memory::{
    MemoryEmbedder, MemoryPrimaryStore, MemorySearchIndex, MemorySource, SourceCatalog,
};
use storefront_sync::storage::PrimaryStore;
use storefront_sync::{
    BatchOptions, BatchType, CheckLevel, ConsistencyCheckResult, ConsistencyChecker, ConsistencyOptions,
    RateLimitedBatchManager, SyncConfig, TargetSystem, TenantRef,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the crate emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "storefront_sync=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           storefront-sync: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Build the manager and checker
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Building manager over in-memory backends...");

    let source = Arc::new(MemorySource::new());
    let primary = Arc::new(MemoryPrimaryStore::new());
    let index = Arc::new(MemorySearchIndex::new());
    let manager = Arc::new(RateLimitedBatchManager::new(
        SyncConfig::default(),
        index.clone(),
        Arc::new(MemoryEmbedder::new(32)),
    )?);
    let checker = ConsistencyChecker::new(manager.clone(), source.clone(), primary.clone(), index.clone())
        .with_options(ConsistencyOptions {
            level: CheckLevel::Comprehensive,
            data_types: vec![EntityKind::Product],
            auto_repair: true,
            ..ConsistencyOptions::default()
        });

    let tenant = TenantRef::new("demo-store", "shpat_demo");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Sync a catalog
    // ─────────────────────────────────────────────────────────────────────────
    let products: Vec<ProductRecord> = [
        ("p1", "Linen Shirt", "linen-shirt", "49.00"),
        ("p2", "Wool Scarf", "wool-scarf", "29.00"),
        ("p3", "Canvas Tote", "canvas-tote", "19.50"),
        ("p4", "Leather Belt", "leather-belt", "39.00"),
        ("p5", "Cotton Socks", "cotton-socks", "9.00"),
    ]
    .into_iter()
    .map(|(id, title, handle, price)| ProductRecord {
        id: id.into(),
        title: title.into(),
        handle: handle.into(),
        price: price.into(),
        status: "active".into(),
        updated_at: Utc::now(),
    })
    .collect();
    source.set_catalog(&tenant.store_id, SourceCatalog { products: products.clone(), ..Default::default() });

    println!("\n📝 Syncing {} products (embed → upsert → primary)...", products.len());
    let start = std::time::Instant::now();
    let embed_tickets: Vec<_> = products
        .iter()
        .map(|p| {
            manager.add_to_batch::<kind::Embed>(
                EmbedRequest { model: "text-embedding-3-small".into(), text: p.embedding_text() },
                BatchOptions::default(),
            )
        })
        .collect();

    let mut upsert_tickets = Vec::new();
    for (p, ticket) in products.iter().zip(embed_tickets) {
        let values = ticket.await?;
        upsert_tickets.push(manager.add_to_batch::<kind::VectorUpsert>(
            UpsertRequest {
                namespace: namespace_for(&tenant.store_id),
                vector: VectorRecord {
                    id: VectorRecord::id_for(EntityKind::Product, &p.id),
                    values,
                    metadata: json!({"kind": "product", "entity_id": p.id}),
                },
            },
            BatchOptions::default(),
        ));
        primary.insert(&tenant.store_id, p)?;
    }
    for ticket in upsert_tickets {
        ticket.await?;
    }
    primary.record_sync(&tenant.store_id, EntityKind::Product, Utc::now()).await?;
    println!("   ✅ Synced in {:?}", start.elapsed());

    for batch_type in BatchType::ALL {
        if let Some(stats) = manager.batch_stats(batch_type) {
            println!(
                "   └─ {}: {} batches, {} ok, {} failed, avg {:.2}ms",
                batch_type, stats.batches_executed, stats.operations_succeeded, stats.operations_failed,
                stats.avg_execution_ms
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Check the synced tenant
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Checking consistency...");
    let clean = checker.execute_check(&tenant).await;
    print_result(&clean);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Drift: a cosmetic edit, a price change and a new product upstream
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🌪️  Introducing drift upstream...");
    source.update(&tenant.store_id, |catalog| {
        catalog.products[0].handle = "linen-shirt-relaxed".into();
        catalog.products[1].price = "24.00".into();
        catalog.products.push(ProductRecord {
            id: "p6".into(),
            title: "Straw Hat".into(),
            handle: "straw-hat".into(),
            price: "35.00".into(),
            status: "active".into(),
            updated_at: Utc::now(),
        });
    });

    let drifted = checker.execute_check(&tenant).await;
    print_result(&drifted);

    println!("\n🔁 Checking again after auto-repair...");
    let repaired = checker.execute_check(&tenant).await;
    print_result(&repaired);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Rate limits and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚦 Rate-limit status:");
    for target in TargetSystem::ALL {
        let status = manager.get_rate_limit_status(target);
        println!(
            "   └─ {}: {} calls, circuit {:?}, {} left this minute",
            target, status.total_calls, status.circuit_state, status.remaining_minute
        );
    }

    let reports = checker.recent_reports(&tenant.store_id, 10).await?;
    println!("\n🗂️  {} reports stored, newest score {}", reports.len(), reports[0].overall_score);

    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    manager.shutdown().await;
    println!("   ✅ Done\n");

    Ok(())
}

fn print_result(result: &ConsistencyCheckResult) {
    println!(
        "   Score: {} (source↔primary {}, primary↔index {}, source↔index {})",
        result.overall_score,
        result.system_scores.source_primary,
        result.system_scores.primary_index,
        result.system_scores.source_index
    );
    for d in &result.discrepancies {
        println!(
            "   └─ [{}/{}] {}",
            d.discrepancy_type.as_str(),
            d.severity.as_str(),
            d.description
        );
    }
    for action in &result.repairs_performed {
        println!("   🔧 {action}");
    }
    for rec in &result.recommendations {
        println!("   💡 {rec}");
    }
    println!("   Next check: {} (needs attention: {})", result.next_check_at, result.needs_attention);
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let key = composite_key.key();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {name} = {value}");
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {name} = {value:.2}");
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("      └─ {name} count={count} avg={avg:.4}");
        }
    }
}
