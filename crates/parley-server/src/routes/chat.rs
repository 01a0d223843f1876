//! Plain chat routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parley_core::{deserialize_messages, Message, ProviderSpec};
use parley_runtime::ChatRequest;
use serde::Deserialize;
use serde_json::json;

use super::event_stream;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(deserialize_with = "deserialize_messages")]
    pub messages: Vec<Message>,
    /// Local runtime model; ignored when `provider` is given.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderSpec>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
}

impl ChatBody {
    fn into_request(self, state: &AppState) -> ChatRequest {
        let provider = match self.provider {
            Some(spec) => spec,
            None => state.default_provider(self.model),
        };
        ChatRequest {
            messages: self.messages,
            provider,
            system_prompt: self.system_prompt,
        }
    }
}

/// POST /chat
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = body.into_request(&state);
    let content = state.chat.complete(&request).await?;
    Ok(Json(json!({ "role": "assistant", "content": content })))
}

/// POST /chat/stream
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> ApiResult<impl IntoResponse> {
    let verbose = state.verbose(body.debug);
    let request = body.into_request(&state);
    let events = state.chat.stream(&request, verbose)?;
    Ok(event_stream(events, verbose))
}
