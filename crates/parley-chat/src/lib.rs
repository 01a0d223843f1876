//! Parley Chat: chat model clients and the streaming generation protocol.
//!
//! Clients speak the Ollama, OpenAI-compatible and Anthropic wire formats.
//! `spawn_generation` wraps any client in the token/stats event protocol
//! consumed by the HTTP layer.

pub mod providers;
pub mod stream;
pub mod types;

pub use providers::{
    protocol_name, AnthropicChat, ChatModel, FragmentStream, OllamaChat, OpenAiChat,
};
pub use stream::{spawn_generation, StatsTracker, StreamOptions};
pub use types::*;
