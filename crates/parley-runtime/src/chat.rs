//! Plain chat: default system prompt handling plus blocking and streaming
//! generation.

use std::sync::Arc;

use parley_chat::{spawn_generation, StreamEvent, StreamOptions};
use parley_core::{Error, Message, ProviderKind, Result, Role};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::prompts::{CHAT_SYSTEM_PROMPT, NO_THINK_SUFFIX};
use crate::resolver::ProviderResolver;
use crate::types::ChatRequest;

/// Prepend a system prompt unless the conversation already opens with one.
///
/// The prepended prompt is `system_prompt` or the default chat prompt; for the
/// local runtime it carries the `/no_think` suffix. A caller-supplied leading
/// system message is left untouched.
pub fn prepare_messages(
    messages: Vec<Message>,
    kind: ProviderKind,
    system_prompt: Option<&str>,
) -> Vec<Message> {
    if messages.first().map(|m| m.role) == Some(Role::System) {
        return messages;
    }

    let mut prompt = system_prompt.unwrap_or(CHAT_SYSTEM_PROMPT).to_string();
    if kind == ProviderKind::LocalRuntime {
        prompt.push_str(NO_THINK_SUFFIX);
    }

    let mut prepared = Vec::with_capacity(messages.len() + 1);
    prepared.push(Message::system(prompt));
    prepared.extend(messages);
    prepared
}

pub struct ChatService {
    resolver: Arc<ProviderResolver>,
}

impl ChatService {
    pub fn new(resolver: Arc<ProviderResolver>) -> Self {
        Self { resolver }
    }

    fn checked_messages(request: &ChatRequest) -> Result<Vec<Message>> {
        if request.messages.is_empty() {
            return Err(Error::InvalidRequest(
                "messages must contain at least one message".into(),
            ));
        }
        Ok(prepare_messages(
            request.messages.clone(),
            request.provider.kind,
            request.system_prompt.as_deref(),
        ))
    }

    /// Generate a complete reply.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let model = self.resolver.resolve_chat_model(&request.provider)?;
        let messages = Self::checked_messages(request)?;
        debug!(
            "Chat completion with {} messages on {}",
            messages.len(),
            request.provider.model_name
        );
        model.invoke(&messages).await
    }

    /// Start a streaming reply. Resolution errors are returned before any
    /// event is produced; backend failures arrive as an `Error` event.
    pub fn stream(&self, request: &ChatRequest, verbose: bool) -> Result<ReceiverStream<StreamEvent>> {
        let model = self.resolver.resolve_chat_model(&request.provider)?;
        let messages = Self::checked_messages(request)?;
        Ok(spawn_generation(
            model,
            messages,
            StreamOptions {
                verbose,
                ..StreamOptions::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use parley_core::{ProviderDefaults, ProviderSpec};
    use serde_json::Value;
    use tokio_stream::StreamExt;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Ollama stand-in that replies with the role and length of every
    /// message it received, one fragment each.
    fn fake_ollama() -> Router {
        Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                let mut lines = String::new();
                for m in body["messages"].as_array().cloned().unwrap_or_default() {
                    let fragment = format!("{}:{};", m["role"].as_str().unwrap_or(""), m["content"]);
                    lines.push_str(&serde_json::json!({ "message": { "content": fragment } }).to_string());
                    lines.push('\n');
                }
                lines.push_str("{\"done\":true}\n");
                lines
            }),
        )
    }

    async fn service() -> ChatService {
        let base = spawn(fake_ollama()).await;
        let defaults = ProviderDefaults {
            ollama_host: base,
            ..ProviderDefaults::default()
        };
        ChatService::new(Arc::new(ProviderResolver::new(defaults).unwrap()))
    }

    fn request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            messages,
            provider: ProviderSpec::new(ProviderKind::LocalRuntime, "llama3"),
            system_prompt: None,
        }
    }

    #[test]
    fn test_default_prompt_prepended_with_no_think_for_local() {
        let prepared = prepare_messages(vec![Message::user("hi")], ProviderKind::LocalRuntime, None);
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].role, Role::System);
        assert_eq!(prepared[0].content, format!("{}{}", CHAT_SYSTEM_PROMPT, NO_THINK_SUFFIX));
        assert_eq!(prepared[1], Message::user("hi"));
    }

    #[test]
    fn test_no_suffix_for_remote_providers() {
        let prepared = prepare_messages(
            vec![Message::user("hi")],
            ProviderKind::OpenaiCompatible,
            Some("Be brief."),
        );
        assert_eq!(prepared[0], Message::system("Be brief."));
    }

    #[test]
    fn test_existing_system_message_kept() {
        let messages = vec![Message::system("custom"), Message::user("hi")];
        let prepared = prepare_messages(messages.clone(), ProviderKind::LocalRuntime, None);
        assert_eq!(prepared, messages);
    }

    #[test]
    fn test_system_later_in_history_still_gets_default() {
        let messages = vec![Message::user("hi"), Message::system("late")];
        let prepared = prepare_messages(messages, ProviderKind::AnthropicCompatible, None);
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0], Message::system(CHAT_SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn test_complete_sends_prepared_messages() {
        let reply = service().await.complete(&request(vec![Message::user("hi")])).await.unwrap();
        assert!(reply.starts_with("system:"));
        assert!(reply.contains("/no_think"));
        assert!(reply.ends_with("user:\"hi\";"));
    }

    #[tokio::test]
    async fn test_stream_ends_with_done() {
        let service = service().await;
        let events: Vec<StreamEvent> = service
            .stream(&request(vec![Message::user("hi")]), false)
            .unwrap()
            .collect()
            .await;
        let tokens = events.iter().filter(|e| matches!(e, StreamEvent::Token { .. })).count();
        assert_eq!(tokens, 2);
        match events.last() {
            Some(StreamEvent::Done { full_response, stats }) => {
                assert!(full_response.ends_with("user:\"hi\";"));
                assert_eq!(stats.total_tokens, 2);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let err = service().await.complete(&request(Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
