//! RAG pipeline: retrieve → assemble → generate.
//!
//! Retrieval and generation talk to backends; prompt assembly and the
//! retrieval-query policy are pure functions over the request.

use std::sync::Arc;

use parley_chat::{spawn_generation, ChatModel, StreamEvent, StreamOptions};
use parley_core::{Error, Message, Result, RetrievalResult, Role};
use parley_ingest::select_splitter;
use parley_store::{StoreHandle, StoreRegistry};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::prompts::{CONTEXT_TEMPLATE, NO_CONTEXT_NOTICE, RAG_HISTORY_SYSTEM_PROMPT, RAG_SYSTEM_PROMPT};
use crate::resolver::ProviderResolver;
use crate::types::{IndexRequest, RagRequest, RetrievalPolicy};

/// A completed RAG answer with the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub content: String,
    pub sources: Vec<RetrievalResult>,
}

/// Text used for the similarity search.
pub fn retrieval_query(question: &str, history: &[Message], policy: RetrievalPolicy) -> String {
    match policy {
        RetrievalPolicy::Verbatim => question.to_string(),
        RetrievalPolicy::WithHistory { turns } => {
            let user_turns: Vec<&str> = history
                .iter()
                .filter(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .collect();
            let recent = &user_turns[user_turns.len().saturating_sub(turns)..];
            if recent.is_empty() {
                return question.to_string();
            }
            format!("{}\n{}", recent.join("\n"), question)
        }
    }
}

/// Substitute `{context}` and `{question}` in one pass, so placeholder text
/// inside either value is never expanded.
fn fill_template(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Build the message list sent to the chat model.
///
/// `results` must already be ordered best first. Only user and assistant
/// turns of the history are carried over.
pub fn assemble_prompt(request: &RagRequest, results: &[RetrievalResult]) -> Vec<Message> {
    let history: Vec<&Message> = request
        .history
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();

    let system = match request.system_prompt.as_deref() {
        Some(prompt) => prompt,
        None if history.is_empty() => RAG_SYSTEM_PROMPT,
        None => RAG_HISTORY_SYSTEM_PROMPT,
    };

    let context = if results.is_empty() {
        NO_CONTEXT_NOTICE.to_string()
    } else {
        results
            .iter()
            .map(|r| r.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let template = request.context_template.as_deref().unwrap_or(CONTEXT_TEMPLATE);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.into_iter().cloned());
    messages.push(Message::user(fill_template(template, &context, &request.question)));
    messages
}

fn validate(request: &RagRequest) -> Result<()> {
    if request.question.trim().is_empty() {
        return Err(Error::InvalidRequest("question must not be empty".into()));
    }
    if !request.score_threshold.is_finite() {
        return Err(Error::InvalidRequest("score_threshold must be a number".into()));
    }
    Ok(())
}

pub struct RagPipeline {
    resolver: Arc<ProviderResolver>,
    registry: Arc<StoreRegistry>,
}

impl RagPipeline {
    pub fn new(resolver: Arc<ProviderResolver>, registry: Arc<StoreRegistry>) -> Self {
        Self { resolver, registry }
    }

    async fn open_store(&self, request: &RagRequest) -> Result<StoreHandle> {
        let embedder = self.resolver.resolve_embedding_model(&request.embedding)?;
        self.registry.open(&request.vector_store, embedder).await
    }

    /// Retrieve context only.
    pub async fn retrieve(&self, request: &RagRequest) -> Result<Vec<RetrievalResult>> {
        validate(request)?;
        let store = self.open_store(request).await?;
        let query = retrieval_query(&request.question, &request.history, request.retrieval_policy);
        let results = store
            .search(&query, request.top_k, request.score_threshold)
            .await?;
        debug!(
            "RAG retrieval for '{}' found {} chunks in '{}'",
            request.question,
            results.len(),
            request.vector_store.collection_name
        );
        Ok(results)
    }

    /// Resolve the chat model and fetch context; no generation.
    async fn prepare(&self, request: &RagRequest) -> Result<(Arc<dyn ChatModel>, Vec<RetrievalResult>)> {
        validate(request)?;
        let model = self.resolver.resolve_chat_model(&request.llm)?;
        let results = self.retrieve(request).await?;
        Ok((model, results))
    }

    /// Answer with a single blocking generation call.
    pub async fn answer(&self, request: &RagRequest) -> Result<RagAnswer> {
        let (model, sources) = self.prepare(request).await?;
        let messages = assemble_prompt(request, &sources);
        let content = model.invoke(&messages).await?;
        Ok(RagAnswer { content, sources })
    }

    /// Answer through the streaming generation protocol.
    pub async fn answer_stream(
        &self,
        request: &RagRequest,
        verbose: bool,
    ) -> Result<ReceiverStream<StreamEvent>> {
        let (model, sources) = self.prepare(request).await?;
        let messages = assemble_prompt(request, &sources);
        Ok(spawn_generation(
            model,
            messages,
            StreamOptions {
                verbose,
                ..StreamOptions::default()
            },
        ))
    }

    /// Chunk, embed and store documents; returns the number of chunks written.
    pub async fn index(&self, request: &IndexRequest) -> Result<usize> {
        let splitter = select_splitter(&request.chunking)?;
        let embedder = self.resolver.resolve_embedding_model(&request.embedding)?;
        let store = self.registry.open(&request.vector_store, embedder).await?;
        let count = parley_ingest::index(&request.documents, &splitter, &store).await?;
        debug!(
            "Index request: {} documents as {} chunks into {} collection '{}'",
            request.documents.len(),
            count,
            request.vector_store.kind,
            request.vector_store.collection_name
        );
        Ok(count)
    }
}
