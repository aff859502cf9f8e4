// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP collaborators: the e-commerce platform API and the embeddings API.
//!
//! Neither client retries or paces on its own; both are meant to be called
//! through the manager so the target's limiter owns that.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::traits::{Embedder, SourceSystem, StorageError};
use crate::metrics::LatencyTimer;
use crate::model::{CustomerRecord, OrderRecord, Page, ProductRecord, StoreRecord, TenantRef};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> Result<Client, StorageError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Map a non-success status to a storage error.
fn check_status(status: StatusCode, body: &str) -> Result<(), StorageError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound);
    }
    let snippet: String = body.chars().take(200).collect();
    Err(StorageError::Backend(format!("HTTP {}: {snippet}", status.as_u16())))
}

/// Pull `key` out of a `{ "<key>": ... }` response envelope.
fn unwrap_envelope<T: DeserializeOwned>(body: &str, key: &str) -> Result<T, StorageError> {
    let mut doc: Value = serde_json::from_str(body)?;
    let inner = doc
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| StorageError::Decode(format!("response has no '{key}' field")))?;
    Ok(serde_json::from_value(inner)?)
}

/// REST client for the e-commerce platform.
///
/// Routes: `GET {base}/stores/{store_id}/store.json` and
/// `GET {base}/stores/{store_id}/{collection}.json?page=N&limit=M`.
pub struct HttpSourceSystem {
    client: Client,
    base_url: String,
}

impl HttpSourceSystem {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StorageError> {
        Ok(Self { client: build_client()?, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    fn url(&self, tenant: &TenantRef, resource: &str) -> String {
        format!("{}/stores/{}/{resource}.json", self.base_url, tenant.store_id)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        tenant: &TenantRef,
        resource: &'static str,
        page: Option<Page>,
    ) -> Result<T, StorageError> {
        let _timer = LatencyTimer::new("source_api", resource);
        let mut request = self.client.get(self.url(tenant, resource)).bearer_auth(&tenant.access_token);
        if let Some(page) = page {
            request = request.query(&[("page", page.page), ("limit", page.limit)]);
        }
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(store = %tenant.store_id, resource, status = status.as_u16(), "Source API response");
        check_status(status, &body)?;
        unwrap_envelope(&body, resource)
    }
}

#[async_trait]
impl SourceSystem for HttpSourceSystem {
    async fn fetch_store(&self, tenant: &TenantRef) -> Result<StoreRecord, StorageError> {
        self.get(tenant, "store", None).await
    }

    async fn fetch_products(&self, tenant: &TenantRef, page: Page) -> Result<Vec<ProductRecord>, StorageError> {
        self.get(tenant, "products", Some(page)).await
    }

    async fn fetch_orders(&self, tenant: &TenantRef, page: Page) -> Result<Vec<OrderRecord>, StorageError> {
        self.get(tenant, "orders", Some(page)).await
    }

    async fn fetch_customers(&self, tenant: &TenantRef, page: Page) -> Result<Vec<CustomerRecord>, StorageError> {
        self.get(tenant, "customers", Some(page)).await
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Order embeddings by their `index` and check one per input.
fn collect_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, StorageError> {
    let mut items = response.data;
    if items.len() != expected {
        return Err(StorageError::Decode(format!(
            "expected {expected} embeddings, got {}",
            items.len()
        )));
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

/// Client for an OpenAI-compatible `POST {base}/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, StorageError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, StorageError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let _timer = LatencyTimer::new("llm_api", "embed");
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model, input: &texts })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        check_status(status, &body)?;
        collect_embeddings(serde_json::from_str(&body)?, texts.len())
    }
}
