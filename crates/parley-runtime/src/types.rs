//! Request types for chat, indexing and RAG queries.

use parley_core::{ChunkingSpec, Document, Message, ProviderSpec, VectorStoreSpec};
use serde::{Deserialize, Serialize};

/// How the retrieval query is derived from the question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrievalPolicy {
    /// Search with the question text exactly.
    #[default]
    Verbatim,
    /// Prefix the question with the last `turns` user messages.
    WithHistory { turns: usize },
}

fn default_top_k() -> usize {
    5
}

fn default_score_threshold() -> f32 {
    0.7
}

/// A retrieval-augmented question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagRequest {
    pub question: String,
    #[serde(default, deserialize_with = "parley_core::deserialize_messages")]
    pub history: Vec<Message>,
    pub llm: ProviderSpec,
    pub embedding: ProviderSpec,
    pub vector_store: VectorStoreSpec,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Human-turn template with `{context}` and `{question}` placeholders.
    #[serde(default)]
    pub context_template: Option<String>,
    #[serde(default)]
    pub retrieval_policy: RetrievalPolicy,
}

impl RagRequest {
    pub fn new(
        question: impl Into<String>,
        llm: ProviderSpec,
        embedding: ProviderSpec,
        vector_store: VectorStoreSpec,
    ) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            llm,
            embedding,
            vector_store,
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            system_prompt: None,
            context_template: None,
            retrieval_policy: RetrievalPolicy::default(),
        }
    }
}

/// Documents to chunk, embed and store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub documents: Vec<Document>,
    pub chunking: ChunkingSpec,
    pub vector_store: VectorStoreSpec,
    pub embedding: ProviderSpec,
}

/// A plain chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub provider: ProviderSpec,
    pub system_prompt: Option<String>,
}
