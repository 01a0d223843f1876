//! Model catalog routes proxied to the local runtime (Ollama).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::{join_url, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/models/{name}/pull", post(pull_model))
        .route("/api/models/{name}/info", get(model_info))
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: String,
    #[serde(default)]
    digest: String,
}

/// One installed model as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
    /// First 12 characters of the content digest.
    pub digest: String,
}

impl From<TagEntry> for ModelSummary {
    fn from(entry: TagEntry) -> Self {
        Self {
            name: entry.name,
            size: entry.size,
            modified_at: entry.modified_at,
            digest: entry.digest.chars().take(12).collect(),
        }
    }
}

fn ollama_unreachable(e: reqwest::Error) -> Error {
    Error::ProviderUnavailable(format!("Cannot reach Ollama: {}", e))
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Backend(format!("Ollama error {}: {}", status, body)))
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Backend(format!("Malformed Ollama response: {}", e)))
}

/// GET /api/models
async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let url = join_url(&state.config.providers.ollama_host, "api/tags");
    let response = state.http.get(url).send().await.map_err(ollama_unreachable)?;
    let tags: TagsResponse = read_json(checked(response).await?).await?;

    let models: Vec<ModelSummary> = tags.models.into_iter().map(ModelSummary::from).collect();
    Ok(Json(json!({ "models": models })))
}

/// POST /api/models/{name}/pull
async fn pull_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let url = join_url(&state.config.providers.ollama_host, "api/pull");
    info!("Pulling model {}", name);
    let response = state
        .http
        .post(url)
        .timeout(state.config.providers.pull_timeout())
        .json(&json!({ "name": name, "stream": false }))
        .send()
        .await
        .map_err(ollama_unreachable)?;
    checked(response).await?;

    info!("Pulled model {}", name);
    Ok(Json(json!({
        "status": "success",
        "message": format!("Model {} pulled", name),
    })))
}

/// GET /api/models/{name}/info
async fn model_info(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let url = join_url(&state.config.providers.ollama_host, "api/show");
    let response = state
        .http
        .post(url)
        .json(&json!({ "name": name }))
        .send()
        .await
        .map_err(ollama_unreachable)?;
    Ok(Json(read_json(checked(response).await?).await?))
}
