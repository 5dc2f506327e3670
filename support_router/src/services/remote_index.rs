//! Managed remote vector index (Pinecone-style data-plane REST API), the Primary backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use support_observability::log_external_call;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::{BackendHealth, Metadata, MetadataFilter, VectorMatch, VectorRecord};
use crate::services::vector_backend::VectorIndex;

pub struct RemoteVectorIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    index_name: String,
    namespace: Option<String>,
}

// ============================================================================
// Data-plane API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Metadata,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: Option<u64>,
}

impl RemoteVectorIndex {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        index_name: impl Into<String>,
        namespace: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to create HTTP client: {}", e)))?;

        let index_name = index_name.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::info!(index = %index_name, endpoint = %base_url, "Remote vector index client initialized");

        Ok(Self {
            client,
            base_url,
            api_key,
            index_name,
            namespace,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST an authenticated JSON request and decode the reply.
    async fn make_request<T: Serialize, R: for<'de> Deserialize<'de> + Default>(
        &self,
        path: &str,
        body: &T,
    ) -> ProviderResult<R> {
        let url = self.api_url(path);

        let mut request = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }

        log_external_call!("vector_index", path);
        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        log_external_call!("vector_index", path, start.elapsed().as_millis() as u64, status.as_u16());

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(&self.index_name, status, &error_text));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(R::default());
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

/// Equality filter in the index's `$eq` operator syntax
fn filter_expression(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let mut clauses = Map::new();
    for (key, value) in filter {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        clauses.insert(key.clone(), serde_json::json!({ "$eq": value }));
    }
    Some(Value::Object(clauses))
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    fn name(&self) -> &str {
        &self.index_name
    }

    async fn upsert(&self, records: &[VectorRecord]) -> ProviderResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let request = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| UpsertVector {
                    id: &r.id,
                    values: &r.embedding,
                    metadata: &r.metadata,
                })
                .collect(),
            namespace: self.namespace.as_deref(),
        };

        let response: UpsertResponse = self.make_request("/vectors/upsert", &request).await?;
        tracing::debug!(index = %self.index_name, count = response.upserted_count, "Upserted vectors");
        Ok(response.upserted_count)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> ProviderResult<Vec<VectorMatch>> {
        let request = QueryRequest {
            vector: embedding,
            top_k,
            include_metadata: true,
            filter: filter.and_then(filter_expression),
            namespace: self.namespace.as_deref(),
        };

        let response: QueryResponse = self.make_request("/query", &request).await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> ProviderResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let request = DeleteRequest {
            ids,
            namespace: self.namespace.as_deref(),
        };
        let _: Value = self.make_request("/vectors/delete", &request).await?;
        Ok(ids.len())
    }

    async fn health(&self) -> BackendHealth {
        match self
            .make_request::<_, IndexStats>("/describe_index_stats", &serde_json::json!({}))
            .await
        {
            Ok(stats) => BackendHealth {
                available: true,
                detail: Some(format!(
                    "dimension={} vectors={}",
                    stats.dimension.map_or_else(|| "?".to_string(), |d| d.to_string()),
                    stats.total_vector_count.unwrap_or(0)
                )),
            },
            Err(e) => BackendHealth::down(e.to_string()),
        }
    }
}
