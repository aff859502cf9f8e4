// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL primary store (SQLite or MySQL through the sqlx `Any` driver).
//!
//! ```sql
//! CREATE TABLE entities (
//!   tenant_id VARCHAR(255), kind VARCHAR(32), id VARCHAR(255),
//!   payload LONGTEXT,          -- entity JSON
//!   updated_at BIGINT,         -- unix millis of the last write
//!   PRIMARY KEY (tenant_id, kind, id)
//! )
//! CREATE TABLE sync_status (
//!   tenant_id VARCHAR(255), kind VARCHAR(32),
//!   synced_at BIGINT,          -- unix millis
//!   PRIMARY KEY (tenant_id, kind)
//! )
//! CREATE TABLE consistency_reports (
//!   seq BIGINT AUTO_INCREMENT PRIMARY KEY,
//!   id VARCHAR(36) UNIQUE, tenant_id VARCHAR(255),
//!   checked_at BIGINT, overall_score INT, needs_attention TINYINT,
//!   report LONGTEXT            -- full result JSON
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! JSON lives in TEXT columns: the `Any` driver has no mapping for MySQL's
//! JSON type and hands LONGTEXT back as bytes, so text columns are read as
//! `String` first and `Vec<u8>` second. `JSON_EXTRACT()` still works on them:
//!
//! ```sql
//! SELECT id FROM consistency_reports
//! WHERE tenant_id = 'shop-1' AND JSON_EXTRACT(report, '$.needs_attention') = true;
//! ```

use std::collections::BTreeMap;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{PrimaryStore, StorageError};
use crate::consistency::types::ConsistencyCheckResult;
use crate::model::EntityKind;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Read a TEXT column as String (SQLite) or bytes (MySQL LONGTEXT).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Decode(format!("timestamp {millis} out of range")))
}

pub struct SqlPrimaryStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlPrimaryStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the schema if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };
        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other stores.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {e}")))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {e}")))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    tenant_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (tenant_id, kind, id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_status (
                    tenant_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    synced_at INTEGER NOT NULL,
                    PRIMARY KEY (tenant_id, kind)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS consistency_reports (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    tenant_id TEXT NOT NULL,
                    checked_at INTEGER NOT NULL,
                    overall_score INTEGER NOT NULL,
                    needs_attention INTEGER NOT NULL,
                    report TEXT NOT NULL
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_reports_tenant ON consistency_reports (tenant_id, seq)",
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    tenant_id VARCHAR(255) NOT NULL,
                    kind VARCHAR(32) NOT NULL,
                    id VARCHAR(255) NOT NULL,
                    payload LONGTEXT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    PRIMARY KEY (tenant_id, kind, id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_status (
                    tenant_id VARCHAR(255) NOT NULL,
                    kind VARCHAR(32) NOT NULL,
                    synced_at BIGINT NOT NULL,
                    PRIMARY KEY (tenant_id, kind)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS consistency_reports (
                    seq BIGINT AUTO_INCREMENT PRIMARY KEY,
                    id VARCHAR(36) NOT NULL UNIQUE,
                    tenant_id VARCHAR(255) NOT NULL,
                    checked_at BIGINT NOT NULL,
                    overall_score INT NOT NULL,
                    needs_attention TINYINT NOT NULL,
                    report LONGTEXT NOT NULL,
                    INDEX idx_reports_tenant (tenant_id, seq)
                )
                "#,
            ]
        };

        for sql in statements.iter().copied() {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    /// Number of stored reports for a tenant.
    pub async fn report_count(&self, tenant_id: &str) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM consistency_reports WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl PrimaryStore for SqlPrimaryStore {
    async fn load_entities(
        &self,
        tenant_id: &str,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Value>, StorageError> {
        let rows = retry("sql_load_entities", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, payload FROM entities WHERE tenant_id = ? AND kind = ?")
                .bind(tenant_id)
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        let mut out = BTreeMap::new();
        for row in rows {
            let id = text_column(&row, "id").ok_or_else(|| StorageError::Decode("entity id".into()))?;
            // A payload that is not even JSON is kept as a string so it reports as corrupt
            let payload = text_column(&row, "payload").unwrap_or_default();
            let value = serde_json::from_str(&payload).unwrap_or(Value::String(payload));
            out.insert(id, value);
        }
        Ok(out)
    }

    async fn put_entity(
        &self,
        tenant_id: &str,
        kind: EntityKind,
        id: &str,
        record: &Value,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(record)?;
        let now = Utc::now().timestamp_millis();
        let sql = if self.is_sqlite {
            "INSERT INTO entities (tenant_id, kind, id, payload, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, kind, id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at"
        } else {
            "INSERT INTO entities (tenant_id, kind, id, payload, updated_at) VALUES (?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                payload = VALUES(payload),
                updated_at = VALUES(updated_at)"
        };

        retry("sql_put_entity", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(tenant_id)
                .bind(kind.as_str())
                .bind(id)
                .bind(&payload)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn sync_status(&self, tenant_id: &str) -> Result<BTreeMap<EntityKind, DateTime<Utc>>, StorageError> {
        let rows = sqlx::query("SELECT kind, synced_at FROM sync_status WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut out = BTreeMap::new();
        for row in rows {
            let Some(kind) = text_column(&row, "kind").as_deref().and_then(EntityKind::parse) else {
                continue;
            };
            let synced_at: i64 = row.try_get("synced_at").map_err(backend)?;
            out.insert(kind, millis_to_datetime(synced_at)?);
        }
        Ok(out)
    }

    async fn record_sync(&self, tenant_id: &str, kind: EntityKind, at: DateTime<Utc>) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO sync_status (tenant_id, kind, synced_at) VALUES (?, ?, ?)
             ON CONFLICT(tenant_id, kind) DO UPDATE SET synced_at = excluded.synced_at"
        } else {
            "INSERT INTO sync_status (tenant_id, kind, synced_at) VALUES (?, ?, ?)
             ON DUPLICATE KEY UPDATE synced_at = VALUES(synced_at)"
        };
        sqlx::query(sql)
            .bind(tenant_id)
            .bind(kind.as_str())
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_report(&self, report: &ConsistencyCheckResult) -> Result<(), StorageError> {
        let body = serde_json::to_string(report)?;
        sqlx::query(
            "INSERT INTO consistency_reports (id, tenant_id, checked_at, overall_score, needs_attention, report)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(report.id.to_string())
        .bind(&report.tenant_id)
        .bind(report.checked_at.timestamp_millis())
        .bind(i64::from(report.overall_score))
        .bind(i64::from(report.needs_attention))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn recent_reports(&self, tenant_id: &str, limit: usize) -> Result<Vec<ConsistencyCheckResult>, StorageError> {
        let rows = sqlx::query(
            "SELECT report FROM consistency_reports WHERE tenant_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| -> Result<ConsistencyCheckResult, StorageError> {
                let body = text_column(row, "report")
                    .ok_or_else(|| StorageError::Decode("report column".into()))?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::types::{CheckLevel, CheckStatistics, RepairAction, SystemScores};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open() -> (SqlPrimaryStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("primary.db").display());
        let store = SqlPrimaryStore::new(&url).await.unwrap();
        (store, dir)
    }

    fn report(tenant: &str, score: u8) -> ConsistencyCheckResult {
        let now = Utc::now();
        ConsistencyCheckResult {
            id: uuid::Uuid::new_v4(),
            tenant_id: tenant.into(),
            level: CheckLevel::Standard,
            data_types: vec![EntityKind::Product],
            overall_score: score,
            system_scores: SystemScores { source_primary: score, primary_index: 100, source_index: 100 },
            discrepancies: Vec::new(),
            statistics: CheckStatistics::default(),
            execution_time_ms: 3,
            recommendations: vec!["No action needed".into()],
            repairs_performed: Vec::new(),
            needs_attention: false,
            checked_at: now,
            next_check_at: now,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_entities_upsert_and_load() {
        let (store, _dir) = open().await;
        store.put_entity("s1", EntityKind::Product, "p1", &json!({"id": "p1", "title": "Hat"})).await.unwrap();
        store.put_entity("s1", EntityKind::Product, "p1", &json!({"id": "p1", "title": "Cap"})).await.unwrap();
        store.put_entity("s1", EntityKind::Order, "o1", &json!({"id": "o1"})).await.unwrap();
        store.put_entity("s2", EntityKind::Product, "p9", &json!({"id": "p9"})).await.unwrap();

        let products = store.load_entities("s1", EntityKind::Product).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products["p1"]["title"], "Cap");
        assert!(store.load_entities("s1", EntityKind::Customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_status_round_trip() {
        let (store, _dir) = open().await;
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        store.record_sync("s1", EntityKind::Order, at).await.unwrap();
        store.record_sync("s1", EntityKind::Order, at).await.unwrap();

        let status = store.sync_status("s1").await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[&EntityKind::Order], at);
    }

    #[tokio::test]
    async fn test_reports_newest_first() {
        let (store, _dir) = open().await;
        let first = report("s1", 90);
        let second = report("s1", 40);
        store.insert_report(&first).await.unwrap();
        store.insert_report(&second).await.unwrap();
        store.insert_report(&report("s2", 100)).await.unwrap();

        let recent = store.recent_reports("s1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], second);
        assert_eq!(recent[1].id, first.id);
        assert_eq!(store.recent_reports("s1", 1).await.unwrap().len(), 1);
        assert_eq!(store.report_count("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_repair_patches_single_field() {
        let (store, _dir) = open().await;
        store
            .put_entity("s1", EntityKind::Product, "p1", &json!({"id": "p1", "title": "Hat", "handle": "old"}))
            .await
            .unwrap();

        let action = RepairAction::UpdateField {
            kind: EntityKind::Product,
            id: "p1".into(),
            field: "handle".into(),
            value: json!("hat"),
        };
        store.apply_repair("s1", &action).await.unwrap();

        let rows = store.load_entities("s1", EntityKind::Product).await.unwrap();
        assert_eq!(rows["p1"], json!({"id": "p1", "title": "Hat", "handle": "hat"}));

        let missing = RepairAction::UpdateField {
            kind: EntityKind::Product,
            id: "p404".into(),
            field: "handle".into(),
            value: json!("x"),
        };
        assert_eq!(store.apply_repair("s1", &missing).await, Err(StorageError::NotFound));
    }
}
