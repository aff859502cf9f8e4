// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant records exchanged with the three stores.
//!
//! The source system is authoritative; the primary store keeps JSON copies
//! keyed by `(tenant, kind, id)`; the search index only holds vectors whose
//! metadata names the entity kind.
//!
//! # Example
//!
//! ```
//! use storefront_sync::model::{Entity, ProductRecord};
//! use chrono::Utc;
//!
//! let product = ProductRecord {
//!     id: "p-1".into(),
//!     title: "Linen Shirt".into(),
//!     handle: "linen-shirt".into(),
//!     price: "49.00".into(),
//!     status: "active".into(),
//!     updated_at: Utc::now(),
//! };
//! assert!(product.validate().is_ok());
//! assert!(product.embedding_text().contains("Linen Shirt"));
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A merchant store ID; one tenant per connected store.
pub type TenantId = String;

/// Identity + credential for calls to the source system.
#[derive(Clone)]
pub struct TenantRef {
    pub store_id: TenantId,
    /// Bearer credential obtained by the OAuth collaborator
    pub access_token: String,
}

impl TenantRef {
    pub fn new(store_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self { store_id: store_id.into(), access_token: access_token.into() }
    }
}

impl std::fmt::Debug for TenantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRef")
            .field("store_id", &self.store_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Search index namespace scoping one tenant's vectors.
#[must_use]
pub fn namespace_for(tenant_id: &str) -> String {
    format!("store-{tenant_id}")
}

/// Caller-supplied page window for source collection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
}

impl Page {
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self { page: 1, limit }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self { page: self.page + 1, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Store,
    Product,
    Order,
    Customer,
    Analytics,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Product => "product",
            Self::Order => "order",
            Self::Customer => "customer",
            Self::Analytics => "analytics",
        }
    }

    /// Kinds whose absence downstream is a critical finding.
    #[must_use]
    pub fn is_core(self) -> bool {
        matches!(self, Self::Store)
    }

    /// Kinds that are embedded into the search index.
    #[must_use]
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Product | Self::Order | Self::Customer)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "store" => Some(Self::Store),
            "product" => Some(Self::Product),
            "order" => Some(Self::Order),
            "customer" => Some(Self::Customer),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One comparable field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: &'static str,
    pub value: Value,
    /// Display-only field; mismatches are low severity
    pub cosmetic: bool,
}

impl FieldValue {
    fn new(name: &'static str, value: impl Into<Value>) -> Self {
        Self { name, value: value.into(), cosmetic: false }
    }

    fn cosmetic(name: &'static str, value: impl Into<Value>) -> Self {
        Self { name, value: value.into(), cosmetic: true }
    }
}

/// Common surface of every synced record.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Structural validation; `Err` carries the first violated rule.
    fn validate(&self) -> Result<(), String>;

    /// Fields compared between source and primary, in a stable order.
    fn fields(&self) -> Vec<FieldValue>;

    /// Text handed to the embedder for the search index.
    fn embedding_text(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub currency: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for StoreRecord {
    const KIND: EntityKind = EntityKind::Store;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("store name is empty".into());
        }
        if self.domain.trim().is_empty() || !self.domain.contains('.') {
            return Err(format!("store domain '{}' is not a host name", self.domain));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("currency '{}' is not an ISO 4217 code", self.currency));
        }
        Ok(())
    }

    fn fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::new("name", self.name.clone()),
            FieldValue::new("domain", self.domain.clone()),
            FieldValue::new("currency", self.currency.clone()),
            FieldValue::cosmetic("email", self.email.clone()),
            FieldValue::cosmetic("timezone", self.timezone.clone()),
        ]
    }

    fn embedding_text(&self) -> String {
        format!("{} ({}) sells in {}", self.name, self.domain, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub handle: String,
    /// Decimal string as returned by the storefront API
    pub price: String,
    #[serde(default)]
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl Entity for ProductRecord {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("product id is empty".into());
        }
        if self.title.trim().is_empty() {
            return Err("product title is empty".into());
        }
        match self.price.parse::<f64>() {
            Ok(p) if p >= 0.0 => Ok(()),
            _ => Err(format!("product price '{}' is not a non-negative decimal", self.price)),
        }
    }

    fn fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::new("title", self.title.clone()),
            FieldValue::new("price", self.price.clone()),
            FieldValue::new("status", self.status.clone()),
            FieldValue::cosmetic("handle", self.handle.clone()),
        ]
    }

    fn embedding_text(&self) -> String {
        format!("Product {}: {} priced {}", self.id, self.title, self.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub order_number: String,
    pub total_price: f64,
    pub currency: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub financial_status: String,
    pub updated_at: DateTime<Utc>,
}

impl Entity for OrderRecord {
    const KIND: EntityKind = EntityKind::Order;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_number.trim().is_empty() {
            return Err("order number is empty".into());
        }
        if !self.total_price.is_finite() || self.total_price < 0.0 {
            return Err(format!("order total {} is invalid", self.total_price));
        }
        Ok(())
    }

    fn fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::new("order_number", self.order_number.clone()),
            FieldValue::new("total_price", self.total_price),
            FieldValue::new("currency", self.currency.clone()),
            FieldValue::new("financial_status", self.financial_status.clone()),
            FieldValue::new("customer_id", self.customer_id.clone()),
        ]
    }

    fn embedding_text(&self) -> String {
        format!(
            "Order {} total {:.2} {} ({})",
            self.order_number, self.total_price, self.currency, self.financial_status
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub orders_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl Entity for CustomerRecord {
    const KIND: EntityKind = EntityKind::Customer;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> Result<(), String> {
        match &self.email {
            Some(email) if !email.contains('@') => Err(format!("customer email '{email}' is malformed")),
            _ => Ok(()),
        }
    }

    fn fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::new("email", self.email.clone()),
            FieldValue::new("orders_count", self.orders_count),
            FieldValue::cosmetic("first_name", self.first_name.clone()),
            FieldValue::cosmetic("last_name", self.last_name.clone()),
        ]
    }

    fn embedding_text(&self) -> String {
        format!(
            "Customer {} {} <{}> with {} orders",
            self.first_name,
            self.last_name,
            self.email.as_deref().unwrap_or("-"),
            self.orders_count
        )
    }
}

/// Aggregates the primary store keeps for dashboard analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub order_count: u64,
    pub total_revenue: f64,
    pub customer_count: u64,
    pub computed_at: DateTime<Utc>,
}

impl AnalyticsSummary {
    /// Primary-store id of the single summary row.
    pub const ID: &'static str = "summary";

    /// Derive the summary the source data implies.
    #[must_use]
    pub fn derive(orders: &[OrderRecord], customer_count: u64, at: DateTime<Utc>) -> Self {
        Self {
            order_count: orders.len() as u64,
            total_revenue: orders.iter().map(|o| o.total_price).sum(),
            customer_count,
            computed_at: at,
        }
    }
}

/// Records of one kind read from the primary store.
///
/// Rows that fail to decode are kept by id so they can be reported as corrupt.
#[derive(Debug, Clone)]
pub struct EntitySet<T> {
    pub records: BTreeMap<String, T>,
    pub undecodable: BTreeMap<String, String>,
}

impl<T> Default for EntitySet<T> {
    fn default() -> Self {
        Self { records: BTreeMap::new(), undecodable: BTreeMap::new() }
    }
}

impl<T: Entity> EntitySet<T> {
    /// Decode raw JSON rows, splitting out the ones that don't fit `T`.
    #[must_use]
    pub fn decode(rows: BTreeMap<String, Value>) -> Self {
        let mut set = Self::default();
        for (id, value) in rows {
            match serde_json::from_value::<T>(value) {
                Ok(record) => {
                    set.records.insert(id, record);
                }
                Err(e) => {
                    set.undecodable.insert(id, e.to_string());
                }
            }
        }
        set
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len() + self.undecodable.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A vector as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    /// Must carry `"kind"` so index statistics can be split per entity kind
    pub metadata: Value,
}

impl VectorRecord {
    #[must_use]
    pub fn kind(&self) -> Option<EntityKind> {
        self.metadata.get("kind").and_then(Value::as_str).and_then(EntityKind::parse)
    }

    /// Vector id for an entity: `{kind}:{id}`.
    #[must_use]
    pub fn id_for(kind: EntityKind, entity_id: &str) -> String {
        format!("{kind}:{entity_id}")
    }
}

/// Aggregate statistics for one namespace of the search index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub namespace: String,
    pub total_vectors: u64,
    pub by_kind: BTreeMap<EntityKind, u64>,
}

impl IndexStats {
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}
