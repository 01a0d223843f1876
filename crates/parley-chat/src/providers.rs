//! Chat model clients.
//!
//! Each backend streams text fragments from its own wire format:
//! Ollama emits newline-delimited JSON, OpenAI-compatible APIs and Anthropic
//! emit SSE. Fragments are passed through unfiltered; the streaming protocol
//! decides what to do with empty ones.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parley_core::{join_url, Error, Message, ProviderKind, Result, Role};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::types::ChatModelConfig;

/// Boxed stream of raw text fragments from a chat backend.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A resolved chat model handle.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start an incremental generation. Dropping the stream abandons the
    /// underlying request.
    fn stream(&self, messages: &[Message]) -> FragmentStream;

    /// Run a generation to completion and return the whole text.
    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let mut stream = self.stream(messages);
        let mut full = String::new();
        while let Some(fragment) = stream.next().await {
            full.push_str(&fragment?);
        }
        Ok(full)
    }

    fn config(&self) -> &ChatModelConfig;
}

/// Splits a byte stream into complete lines, holding back a partial tail so
/// multi-byte characters split across reads are decoded intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

async fn send_checked(request: reqwest::RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::ProviderUnavailable(format!("Request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Backend(format!("API error {}: {}", status, body)));
    }
    Ok(response)
}

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect()
}

// ---------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------

pub struct OllamaChat {
    client: Client,
    config: ChatModelConfig,
}

impl OllamaChat {
    pub fn new(client: Client, config: ChatModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn stream(&self, messages: &[Message]) -> FragmentStream {
        let url = join_url(&self.config.base_url, "api/chat");
        let body = json!({
            "model": self.config.model,
            "messages": wire_messages(messages),
            "stream": true,
            "options": { "temperature": self.config.temperature },
        });
        let request = self.client.post(url).json(&body);
        let model = self.config.model.clone();

        Box::pin(async_stream::stream! {
            debug!("Streaming from Ollama with model {}", model);

            let response = match send_checked(request).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            loop {
                let (batch, eof) = match stream.next().await {
                    Some(Ok(bytes)) => (lines.push(&bytes), false),
                    Some(Err(e)) => {
                        yield Err(Error::Backend(format!("Stream read error: {}", e)));
                        return;
                    }
                    None => (lines.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for line in batch {
                    let parsed: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(msg) = parsed["error"].as_str() {
                        error!("Ollama error: {}", msg);
                        yield Err(Error::Backend(msg.to_string()));
                        return;
                    }
                    if let Some(content) = parsed["message"]["content"].as_str() {
                        yield Ok(content.to_string());
                    }
                    if parsed["done"].as_bool() == Some(true) {
                        return;
                    }
                }

                if eof {
                    return;
                }
            }
        })
    }

    fn config(&self) -> &ChatModelConfig {
        &self.config
    }
}

// ---------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------

/// Client for `/chat/completions` APIs (OpenAI and custom endpoints).
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    config: ChatModelConfig,
}

impl OpenAiChat {
    pub fn new(client: Client, api_key: impl Into<String>, config: ChatModelConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            config,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn stream(&self, messages: &[Message]) -> FragmentStream {
        let url = join_url(&self.config.base_url, "chat/completions");
        let body = json!({
            "model": self.config.model,
            "messages": wire_messages(messages),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        });
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        let model = self.config.model.clone();

        Box::pin(async_stream::stream! {
            debug!("Streaming from {} with model {}", url, model);

            let response = match send_checked(request).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(Error::Backend(format!("Stream read error: {}", e)));
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    if line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<Value>(data) {
                        if let Some(msg) = parsed["error"]["message"].as_str() {
                            yield Err(Error::Backend(msg.to_string()));
                            return;
                        }
                        if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                            yield Ok(content.to_string());
                        }
                    }
                }
            }
        })
    }

    fn config(&self) -> &ChatModelConfig {
        &self.config
    }
}

// ---------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------

/// Client for Anthropic's Messages API.
pub struct AnthropicChat {
    client: Client,
    api_key: String,
    config: ChatModelConfig,
}

impl AnthropicChat {
    pub fn new(client: Client, api_key: impl Into<String>, config: ChatModelConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            config,
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicChat {
    fn stream(&self, messages: &[Message]) -> FragmentStream {
        // System turns travel in a separate field.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let conversation: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": wire_messages(&conversation),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        let request = self
            .client
            .post(join_url(&self.config.base_url, "v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body);
        let model = self.config.model.clone();

        Box::pin(async_stream::stream! {
            debug!("Streaming from Anthropic with model {}", model);

            let response = match send_checked(request).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(Error::Backend(format!("Stream read error: {}", e)));
                        return;
                    }
                };

                // "event:" lines are redundant with the payload's "type".
                for line in lines.push(&bytes) {
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    match parsed["type"].as_str() {
                        Some("content_block_delta") => {
                            if let Some(text) = parsed["delta"]["text"].as_str() {
                                yield Ok(text.to_string());
                            }
                        }
                        Some("message_stop") => return,
                        Some("error") => {
                            let msg = parsed["error"]["message"]
                                .as_str()
                                .unwrap_or("Unknown error");
                            error!("Anthropic error: {}", msg);
                            yield Err(Error::Backend(msg.to_string()));
                            return;
                        }
                        _ => {}
                    }
                }
            }
        })
    }

    fn config(&self) -> &ChatModelConfig {
        &self.config
    }
}

/// Describe which wire protocol a backend kind speaks; used in logs.
pub fn protocol_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::LocalRuntime => "ollama",
        ProviderKind::OpenaiCompatible | ProviderKind::CustomEndpoint => "openai",
        ProviderKind::AnthropicCompatible => "anthropic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::time::Duration;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(backend: ProviderKind, base_url: String) -> ChatModelConfig {
        ChatModelConfig {
            backend,
            model: "test-model".into(),
            base_url,
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    fn client() -> Client {
        Client::builder().timeout(Duration::from_secs(5)).build().unwrap()
    }

    async fn collect(model: &dyn ChatModel) -> Vec<Result<String>> {
        model
            .stream(&[Message::user("hello")])
            .collect::<Vec<_>>()
            .await
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let mut buf = LineBuffer::default();
        let bytes = "héllo\nwor".as_bytes();
        // Split inside the two-byte 'é'.
        assert!(buf.push(&bytes[..2]).is_empty());
        assert_eq!(buf.push(&bytes[2..]), vec!["héllo".to_string()]);
        assert_eq!(buf.finish(), Some("wor".to_string()));
    }

    #[tokio::test]
    async fn test_ollama_ndjson_stream() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["messages"][0]["role"], "user");
                Body::from(concat!(
                    "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
                    "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
                    "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
                    "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
                ))
            }),
        );
        let base = spawn(router).await;
        let chat = OllamaChat::new(client(), config(ProviderKind::LocalRuntime, base));

        let fragments: Vec<String> = collect(&chat)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(fragments, vec!["Hel", "", "lo", ""]);
        assert_eq!(chat.invoke(&[Message::user("hello")]).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_ollama_error_payload() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { Body::from("{\"error\":\"model 'x' not found\"}\n") }),
        );
        let base = spawn(router).await;
        let chat = OllamaChat::new(client(), config(ProviderKind::LocalRuntime, base));
        let err = chat.invoke(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, Error::Backend(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_openai_sse_stream() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Body::from(concat!(
                    ": keep-alive\n\n",
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Bon\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"jour\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ))
            }),
        );
        let base = spawn(router).await;
        let chat = OpenAiChat::new(
            client(),
            "dummy-key",
            config(ProviderKind::OpenaiCompatible, format!("{}/v1", base)),
        );
        assert_eq!(chat.invoke(&[Message::user("hi")]).await.unwrap(), "Bonjour");
    }

    #[tokio::test]
    async fn test_anthropic_sse_stream_moves_system_prompt() {
        let router = Router::new().route(
            "/v1/messages",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["system"], "be brief");
                assert_eq!(body["messages"].as_array().unwrap().len(), 1);
                Body::from(concat!(
                    "event: message_start\n",
                    "data: {\"type\":\"message_start\"}\n\n",
                    "event: content_block_delta\n",
                    "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Hi\"}}\n\n",
                    "event: message_stop\n",
                    "data: {\"type\":\"message_stop\"}\n\n",
                ))
            }),
        );
        let base = spawn(router).await;
        let chat = AnthropicChat::new(
            client(),
            "sk-ant",
            config(ProviderKind::AnthropicCompatible, base),
        );
        let out = chat
            .invoke(&[Message::system("be brief"), Message::user("hi")])
            .await
            .unwrap();
        assert_eq!(out, "Hi");
    }

    #[tokio::test]
    async fn test_http_error_status_is_backend_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = spawn(router).await;
        let chat = OpenAiChat::new(
            client(),
            "wrong",
            config(ProviderKind::OpenaiCompatible, format!("{}/v1", base)),
        );
        let err = chat.invoke(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, Error::Backend(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_provider_unavailable() {
        // Port 9 (discard) is closed on test hosts.
        let chat = OllamaChat::new(
            client(),
            config(ProviderKind::LocalRuntime, "http://127.0.0.1:9".into()),
        );
        let err = chat.invoke(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }
}
