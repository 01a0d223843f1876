//! Runtime services: provider resolution, plain chat and the RAG pipeline.

pub mod chat;
pub mod pipeline;
pub mod prompts;
pub mod resolver;
pub mod types;

pub use chat::{prepare_messages, ChatService};
pub use pipeline::{assemble_prompt, retrieval_query, RagAnswer, RagPipeline};
pub use resolver::{ProviderResolver, PLACEHOLDER_API_KEY};
pub use types::*;
