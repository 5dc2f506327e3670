use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use support_observability::log_external_call;

use crate::errors::{ProviderError, ProviderResult};

#[derive(Debug, Clone, PartialEq)]
pub struct WebResult {
    pub url: String,
    pub title: String,
    pub content: String,
    /// Provider relevance, when it reports one
    pub score: Option<f32>,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<WebResult>>;
}

/// Tavily-compatible `/search` client
pub struct TavilySearchClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl TavilySearchClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearchClient {
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<WebResult>> {
        let url = format!("{}/search", self.endpoint);
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results,
            search_depth: "basic",
        };

        log_external_call!("web_search", "/search");
        let start = Instant::now();
        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        log_external_call!("web_search", "/search", start.elapsed().as_millis() as u64, status.as_u16());

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("web search", status, &error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .take(max_results)
            .map(|r| WebResult {
                url: r.url,
                title: r.title,
                content: r.content,
                score: r.score,
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
}
