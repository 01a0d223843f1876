//! Embedding model trait and HTTP-backed implementations.
//!
//! The `EmbeddingModel` trait abstracts over embedding generation.
//! Implementations:
//! - `OllamaEmbedder`: local runtime `/api/embed`
//! - `OpenAiEmbedder`: OpenAI-compatible `/embeddings` (also used for custom endpoints)

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{join_url, Error, ProviderKind, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Texts sent per request to OpenAI-compatible endpoints.
const OPENAI_BATCH_SIZE: usize = 64;

/// Observable configuration of a resolved embedding handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedderConfig {
    /// Backend actually used; may differ from the requested kind when a
    /// provider has no embeddings API.
    pub backend: ProviderKind,
    pub model: String,
    pub base_url: String,
}

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Backend("Empty embedding response".into()))
    }

    fn config(&self) -> &EmbedderConfig;
}

/// Build an HTTP client with the interactive timeout.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::ProviderUnavailable(format!("HTTP client: {}", e)))
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::Backend(format!(
            "Embedding backend returned {} vectors for {} inputs",
            got, expected
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------

pub struct OllamaEmbedder {
    client: Client,
    config: EmbedderConfig,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(client: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            config: EmbedderConfig {
                backend: ProviderKind::LocalRuntime,
                model: model.into(),
                base_url: base_url.into(),
            },
        }
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = join_url(&self.config.base_url, "api/embed");
        debug!("Embedding {} texts via {} ({})", texts.len(), url, self.config.model);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.config.model, "input": texts }))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("API error {}: {}", status, body)));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Malformed embedding response: {}", e)))?;
        check_count(texts.len(), parsed.embeddings.len())?;
        Ok(parsed.embeddings)
    }

    fn config(&self) -> &EmbedderConfig {
        &self.config
    }
}

// ---------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    config: EmbedderConfig,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        client: Client,
        backend: ProviderKind,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            config: EmbedderConfig {
                backend,
                model: model.into(),
                base_url: base_url.into(),
            },
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = join_url(&self.config.base_url, "embeddings");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "model": self.config.model, "input": batch }))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("API error {}: {}", status, body)));
        }

        let mut parsed: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Malformed embedding response: {}", e)))?;
        check_count(batch.len(), parsed.data.len())?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OPENAI_BATCH_SIZE) {
            debug!("Embedding batch of {} via {}", batch.len(), self.config.base_url);
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn config(&self) -> &EmbedderConfig {
        &self.config
    }
}
