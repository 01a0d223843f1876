//! Retrieval-augmented generation routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parley_runtime::{IndexRequest, RagRequest};
use serde::Deserialize;
use serde_json::{json, Value};

use super::event_stream;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rag/index", post(index))
        .route("/rag/query", post(query))
        .route("/rag/query/stream", post(query_stream))
}

#[derive(Debug, Deserialize)]
pub struct RagBody {
    #[serde(flatten)]
    pub request: RagRequest,
    #[serde(default)]
    pub debug: Option<bool>,
}

/// POST /rag/index
async fn index(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndexRequest>,
) -> ApiResult<Json<Value>> {
    let chunks = state.pipeline.index(&request).await?;
    Ok(Json(json!({ "chunks": chunks })))
}

/// POST /rag/query
///
/// Verbose requests also get the retrieved chunks under `sources`.
async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RagBody>,
) -> ApiResult<Json<Value>> {
    let verbose = state.verbose(body.debug);
    let answer = state.pipeline.answer(&body.request).await?;

    let mut response = json!({ "role": "assistant", "content": answer.content });
    if verbose {
        response["sources"] = answer
            .sources
            .iter()
            .map(|r| {
                json!({
                    "content": r.chunk.content,
                    "score": r.score,
                    "source_document_ref": r.chunk.source_document_ref,
                    "offset": r.chunk.offset,
                    "metadata": r.chunk.metadata,
                })
            })
            .collect();
    }
    Ok(Json(response))
}

/// POST /rag/query/stream
async fn query_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RagBody>,
) -> ApiResult<impl IntoResponse> {
    let verbose = state.verbose(body.debug);
    let events = state.pipeline.answer_stream(&body.request, verbose).await?;
    Ok(event_stream(events, verbose))
}
