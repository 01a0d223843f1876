//! Chat handle configuration, stream events and their wire frames.

use parley_core::ProviderKind;
use serde::Serialize;
use serde_json::{json, Value};

/// Observable configuration of a resolved chat handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatModelConfig {
    pub backend: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Latency and throughput accounting for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStats {
    pub total_tokens: u64,
    pub total_time_ms: u64,
    pub time_to_first_token_ms: u64,
    pub tokens_per_second: f64,
    pub model: String,
}

/// One event of a streaming generation run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Only emitted in verbose mode.
    Started { model: String, timestamp_ms: i64 },
    Token {
        content: String,
        index: u64,
        elapsed_ms: u64,
    },
    Done {
        full_response: String,
        stats: GenerationStats,
    },
    /// Backend failure; ends a failed run in place of `Done`.
    Error { error: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// JSON payload of the `data:` frame for this event.
    ///
    /// Compact frames carry `content` per token and `done`/`full_response` at
    /// the end; verbose frames add `type`, `token_index`, `elapsed_ms` and
    /// `stats`.
    pub fn to_frame(&self, verbose: bool) -> Value {
        match self {
            StreamEvent::Started {
                model,
                timestamp_ms,
            } => json!({
                "type": "start",
                "model": model,
                "timestamp": timestamp_ms,
            }),
            StreamEvent::Token {
                content,
                index,
                elapsed_ms,
            } => {
                let mut frame = json!({ "content": content });
                if verbose {
                    frame["type"] = json!("token");
                    frame["token_index"] = json!(index);
                    frame["elapsed_ms"] = json!(elapsed_ms);
                }
                frame
            }
            StreamEvent::Done {
                full_response,
                stats,
            } => {
                let mut frame = json!({ "done": true, "full_response": full_response });
                if verbose {
                    frame["type"] = json!("done");
                    frame["stats"] = json!(stats);
                }
                frame
            }
            StreamEvent::Error { error } => {
                let mut frame = json!({ "error": error });
                if verbose {
                    frame["type"] = json!("error");
                }
                frame
            }
        }
    }
}
