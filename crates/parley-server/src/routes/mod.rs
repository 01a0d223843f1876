//! HTTP route handlers.

pub mod chat;
pub mod models;
pub mod rag;

use std::convert::Infallible;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use parley_chat::StreamEvent;
use parley_core::config::DEFAULT_FRONTEND_URL;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.frontend_url);
    Router::new()
        .route("/health", get(health))
        .merge(chat::routes())
        .merge(rag::routes())
        .merge(models::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in [frontend_url, DEFAULT_FRONTEND_URL] {
        if let Ok(value) = HeaderValue::from_str(origin.trim_end_matches('/')) {
            if !origins.contains(&value) {
                origins.push(value);
            }
        }
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Frame generation events as SSE `data:` records.
pub(crate) fn event_stream(
    events: ReceiverStream<StreamEvent>,
    verbose: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(events.map(move |event| {
        Ok::<_, Infallible>(Event::default().data(event.to_frame(verbose).to_string()))
    }))
}
