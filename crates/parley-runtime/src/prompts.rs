//! Default prompts.

/// System prompt for plain chat when the conversation has none.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Respond in the same language as the user. \
If the user speaks Korean, respond in Korean. \
Provide clear, concise, and helpful responses.";

/// Appended to local-runtime system prompts to turn off reasoning traces.
pub const NO_THINK_SUFFIX: &str = " /no_think";

pub const RAG_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.
Answer the question based on the provided context.
If you cannot find the answer in the context, say so.
Respond in the same language as the user's question.";

/// Used instead of [`RAG_SYSTEM_PROMPT`] when prior turns are supplied.
pub const RAG_HISTORY_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.
Answer the question based on the provided context and conversation history.
If you cannot find the answer in the context, say so.
Respond in the same language as the user's question.";

pub const CONTEXT_TEMPLATE: &str = "Context:\n{context}\n\nQuestion: {question}";

/// Stands in for the context when retrieval finds nothing.
pub const NO_CONTEXT_NOTICE: &str = "No relevant context was found in the indexed documents. \
Do not invent context; tell the user that the documents do not contain the answer, \
then answer only from general knowledge if appropriate.";
