use crate::config::EmbeddingConfig;
use crate::error::{AppError, AppResult};
use crate::models::CatalogItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Black-box text → fixed-length vector service
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_text(&self, text: &str) -> AppResult<Vec<f32>>;

    async fn embed_product(&self, product: &CatalogItem) -> AppResult<Vec<f32>> {
        self.embed_text(&product.embedding_text()).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP client for the embedding service
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEmbeddingClient {
    pub fn new(cfg: &EmbeddingConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("embedding client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/embeddings", cfg.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingClient {
    async fn embed_text(&self, text: &str) -> AppResult<Vec<f32>> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Embedding(format!(
                "embedding service returned {status}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("invalid response body: {e}")))?;

        if body.embedding.is_empty() {
            return Err(AppError::Embedding("empty embedding".into()));
        }

        Ok(body.embedding)
    }
}
