use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use support_observability::log_external_call;

use crate::errors::{ProviderError, ProviderResult};

/// Maps text into the shared embedding space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    fn dimension(&self) -> usize;
}

fn default_dimension(model: &str) -> Option<usize> {
    let model = model.to_ascii_lowercase();
    if model == "text-embedding-3-large" {
        Some(3072)
    } else if model.starts_with("text-embedding-") {
        Some(1536)
    } else {
        None
    }
}

/// OpenAI-compatible `/v1/embeddings` client
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiEmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let model = model.into();
        if let Some(expected) = default_dimension(&model) {
            if expected != dimension {
                tracing::warn!(model = %model, expected, configured = dimension, "Embedding dimension differs from model default");
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("cannot embed empty text".to_string()));
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        log_external_call!("openai", "/v1/embeddings");
        let start = Instant::now();

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        log_external_call!("openai", "/v1/embeddings", start.elapsed().as_millis() as u64, status.as_u16());

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("embedding provider", status, &error_text));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::MalformedResponse("no embedding in response".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(ProviderError::MalformedResponse(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, dimension: usize) -> OpenAiEmbeddingClient {
        OpenAiEmbeddingClient::new(
            server.uri(),
            Some("sk-test".to_string()),
            "text-embedding-ada-002",
            dimension,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_the_first_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
            })))
            .mount(&server)
            .await;

        let embedding = client(&server, 3).embed("vpn drops").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2] }]
            })))
            .mount(&server)
            .await;

        let err = client(&server, 3).embed("vpn drops").await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn quota_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server, 3).embed("vpn drops").await.unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)));
        assert!(err.is_transient());
    }
}
