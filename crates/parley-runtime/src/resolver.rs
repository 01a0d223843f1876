//! Provider resolution: `ProviderSpec` → chat or embedding handle.
//!
//! Each provider kind maps to exactly one constructor. Resolution never
//! contacts the backend; unreachable hosts surface on first use.

use std::sync::Arc;

use parley_chat::{protocol_name, AnthropicChat, ChatModel, ChatModelConfig, OllamaChat, OpenAiChat};
use parley_core::{Error, ProviderDefaults, ProviderKind, ProviderSpec, Result};
use parley_infer::{http_client, EmbeddingModel, OllamaEmbedder, OpenAiEmbedder};
use reqwest::{Client, Url};
use tracing::{debug, warn};

/// Key sent to OpenAI-compatible servers when the caller supplies none.
pub const PLACEHOLDER_API_KEY: &str = "dummy-key";

type ChatConstructor = fn(&ProviderResolver, &ProviderSpec) -> Result<Arc<dyn ChatModel>>;
type EmbeddingConstructor = fn(&ProviderResolver, &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>>;

pub struct ProviderResolver {
    defaults: ProviderDefaults,
    client: Client,
}

impl ProviderResolver {
    pub fn new(defaults: ProviderDefaults) -> Result<Self> {
        let client = http_client(defaults.request_timeout())?;
        Ok(Self { defaults, client })
    }

    pub fn with_client(defaults: ProviderDefaults, client: Client) -> Self {
        Self { defaults, client }
    }

    pub fn defaults(&self) -> &ProviderDefaults {
        &self.defaults
    }

    pub fn resolve_chat_model(&self, spec: &ProviderSpec) -> Result<Arc<dyn ChatModel>> {
        spec.validate()?;
        let model = chat_constructor(spec.kind)(self, spec)?;
        debug!(
            "Resolved chat model {} via {} ({}) at {}",
            spec.model_name,
            spec.kind,
            protocol_name(spec.kind),
            model.config().base_url
        );
        Ok(model)
    }

    pub fn resolve_embedding_model(&self, spec: &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>> {
        spec.validate()?;
        let model = embedding_constructor(spec.kind)(self, spec)?;
        debug!(
            "Resolved embedding model {} via {} at {}",
            spec.model_name,
            model.config().backend,
            model.config().base_url
        );
        Ok(model)
    }

    /// Caller endpoint if given (validated), otherwise `fallback`.
    fn base_url(&self, spec: &ProviderSpec, fallback: &str) -> Result<String> {
        match spec.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => validate_endpoint(endpoint),
            None => Ok(fallback.to_string()),
        }
    }

    fn chat_config(&self, spec: &ProviderSpec, base_url: String) -> ChatModelConfig {
        ChatModelConfig {
            backend: spec.kind,
            model: spec.model_name.clone(),
            base_url,
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
        }
    }
}

fn validate_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::ProviderUnavailable(format!("malformed endpoint '{}': {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::ProviderUnavailable(format!(
            "endpoint '{}' must be an http(s) URL",
            endpoint
        )));
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

/// Supplied key, or the placeholder accepted by keyless compatible servers.
pub fn api_key_or_placeholder(spec: &ProviderSpec) -> &str {
    spec.api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .unwrap_or(PLACEHOLDER_API_KEY)
}

fn required_endpoint(spec: &ProviderSpec) -> Result<String> {
    match spec.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => validate_endpoint(endpoint),
        None => Err(Error::ProviderUnavailable(
            "CUSTOM_ENDPOINT requires an endpoint".into(),
        )),
    }
}

// ---------------------------------------------------------------
// Dispatch tables
// ---------------------------------------------------------------

fn chat_constructor(kind: ProviderKind) -> ChatConstructor {
    match kind {
        ProviderKind::LocalRuntime => local_chat,
        ProviderKind::OpenaiCompatible => openai_chat,
        ProviderKind::AnthropicCompatible => anthropic_chat,
        ProviderKind::CustomEndpoint => custom_chat,
    }
}

fn embedding_constructor(kind: ProviderKind) -> EmbeddingConstructor {
    match kind {
        ProviderKind::LocalRuntime => local_embeddings,
        ProviderKind::OpenaiCompatible => openai_embeddings,
        ProviderKind::AnthropicCompatible => anthropic_embeddings,
        ProviderKind::CustomEndpoint => custom_embeddings,
    }
}

fn local_chat(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn ChatModel>> {
    let base = r.base_url(spec, &r.defaults.ollama_host)?;
    Ok(Arc::new(OllamaChat::new(r.client.clone(), r.chat_config(spec, base))))
}

fn openai_chat(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn ChatModel>> {
    let base = r.base_url(spec, &r.defaults.openai_base_url)?;
    Ok(Arc::new(OpenAiChat::new(
        r.client.clone(),
        api_key_or_placeholder(spec),
        r.chat_config(spec, base),
    )))
}

fn anthropic_chat(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn ChatModel>> {
    let key = spec
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::ProviderUnavailable("ANTHROPIC_COMPATIBLE requires an api_key".into()))?;
    let base = r.base_url(spec, &r.defaults.anthropic_base_url)?;
    Ok(Arc::new(AnthropicChat::new(
        r.client.clone(),
        key,
        r.chat_config(spec, base),
    )))
}

fn custom_chat(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn ChatModel>> {
    let base = required_endpoint(spec)?;
    Ok(Arc::new(OpenAiChat::new(
        r.client.clone(),
        api_key_or_placeholder(spec),
        r.chat_config(spec, base),
    )))
}

fn local_embeddings(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>> {
    let base = r.base_url(spec, &r.defaults.ollama_host)?;
    Ok(Arc::new(OllamaEmbedder::new(
        r.client.clone(),
        base,
        spec.model_name.clone(),
    )))
}

fn openai_embeddings(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>> {
    let base = r.base_url(spec, &r.defaults.openai_base_url)?;
    Ok(Arc::new(OpenAiEmbedder::new(
        r.client.clone(),
        ProviderKind::OpenaiCompatible,
        base,
        spec.model_name.clone(),
        api_key_or_placeholder(spec),
    )))
}

fn anthropic_embeddings(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>> {
    warn!(
        "ANTHROPIC_COMPATIBLE has no embeddings API, using LOCAL_RUNTIME at {} for {}",
        r.defaults.ollama_host, spec.model_name
    );
    Ok(Arc::new(OllamaEmbedder::new(
        r.client.clone(),
        r.defaults.ollama_host.clone(),
        spec.model_name.clone(),
    )))
}

fn custom_embeddings(r: &ProviderResolver, spec: &ProviderSpec) -> Result<Arc<dyn EmbeddingModel>> {
    let base = required_endpoint(spec)?;
    Ok(Arc::new(OpenAiEmbedder::new(
        r.client.clone(),
        ProviderKind::CustomEndpoint,
        base,
        spec.model_name.clone(),
        api_key_or_placeholder(spec),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ProviderResolver {
        ProviderResolver::new(ProviderDefaults::default()).unwrap()
    }

    #[test]
    fn test_every_kind_resolves_with_sufficient_spec() {
        let r = resolver();
        for kind in ProviderKind::ALL {
            let spec = ProviderSpec::new(kind, "m")
                .with_endpoint("http://localhost:9999/v1")
                .with_api_key("k");
            let chat = r.resolve_chat_model(&spec).unwrap();
            assert_eq!(chat.config().backend, kind);
            assert!(r.resolve_embedding_model(&spec).is_ok());
        }
    }

    #[test]
    fn test_same_spec_same_configuration() {
        let r = resolver();
        let spec = ProviderSpec::new(ProviderKind::OpenaiCompatible, "gpt-4o-mini").with_temperature(0.2);
        let a = r.resolve_chat_model(&spec).unwrap();
        let b = r.resolve_chat_model(&spec).unwrap();
        assert_eq!(a.config(), b.config());
        assert_eq!(a.config().base_url, "https://api.openai.com/v1");
        assert_eq!(a.config().temperature, 0.2);
        assert_eq!(a.config().max_tokens, 4096);
    }

    #[test]
    fn test_unknown_kind_resolves_to_local_runtime() {
        let r = resolver();
        let spec: ProviderSpec =
            serde_json::from_str(r#"{"provider": "HUGGINGFACE", "model": "llama3"}"#).unwrap();
        let chat = r.resolve_chat_model(&spec).unwrap();
        assert_eq!(chat.config().backend, ProviderKind::LocalRuntime);
        assert_eq!(chat.config().base_url, "http://localhost:11434");
    }

    #[test]
    fn test_placeholder_key_for_openai_compatible() {
        let spec = ProviderSpec::new(ProviderKind::OpenaiCompatible, "gpt-4o-mini");
        assert_eq!(api_key_or_placeholder(&spec), "dummy-key");
        let spec = spec.with_api_key("sk-real");
        assert_eq!(api_key_or_placeholder(&spec), "sk-real");
    }

    #[test]
    fn test_anthropic_requires_key() {
        let r = resolver();
        let spec = ProviderSpec::new(ProviderKind::AnthropicCompatible, "claude-3-haiku");
        assert!(matches!(
            r.resolve_chat_model(&spec).err(),
            Some(Error::ProviderUnavailable(_))
        ));
        let chat = r.resolve_chat_model(&spec.with_api_key("sk-ant")).unwrap();
        assert_eq!(chat.config().base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_anthropic_embeddings_fall_back_to_local() {
        let r = resolver();
        let spec = ProviderSpec::new(ProviderKind::AnthropicCompatible, "nomic-embed-text");
        let embedder = r.resolve_embedding_model(&spec).unwrap();
        assert_eq!(embedder.config().backend, ProviderKind::LocalRuntime);
        assert_eq!(embedder.config().base_url, "http://localhost:11434");
    }

    #[test]
    fn test_custom_endpoint_requires_endpoint() {
        let r = resolver();
        let spec = ProviderSpec::new(ProviderKind::CustomEndpoint, "local-model");
        assert!(matches!(
            r.resolve_chat_model(&spec).err(),
            Some(Error::ProviderUnavailable(_))
        ));
        assert!(matches!(
            r.resolve_embedding_model(&spec).err(),
            Some(Error::ProviderUnavailable(_))
        ));

        let chat = r
            .resolve_chat_model(&spec.with_endpoint("http://gpu-box:8080/v1/"))
            .unwrap();
        assert_eq!(chat.config().backend, ProviderKind::CustomEndpoint);
        assert_eq!(chat.config().base_url, "http://gpu-box:8080/v1");
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let r = resolver();
        for endpoint in ["not a url", "ftp://files.example.com", "localhost:11434"] {
            let spec = ProviderSpec::new(ProviderKind::LocalRuntime, "llama3").with_endpoint(endpoint);
            assert!(
                matches!(r.resolve_chat_model(&spec).err(), Some(Error::ProviderUnavailable(_))),
                "endpoint {:?} should be rejected",
                endpoint
            );
        }
    }

    #[test]
    fn test_endpoint_overrides_default_host() {
        let defaults = ProviderDefaults {
            ollama_host: "http://ollama.internal:11434".into(),
            ..ProviderDefaults::default()
        };
        let r = ProviderResolver::new(defaults).unwrap();

        let spec = ProviderSpec::new(ProviderKind::LocalRuntime, "llama3");
        assert_eq!(
            r.resolve_chat_model(&spec).unwrap().config().base_url,
            "http://ollama.internal:11434"
        );
        let spec = spec.with_endpoint("http://other:11434");
        assert_eq!(
            r.resolve_chat_model(&spec).unwrap().config().base_url,
            "http://other:11434"
        );
    }

    #[test]
    fn test_invalid_sampling_parameters() {
        let r = resolver();
        let spec = ProviderSpec::new(ProviderKind::LocalRuntime, "llama3").with_temperature(3.5);
        assert!(matches!(
            r.resolve_chat_model(&spec).err(),
            Some(Error::InvalidRequest(_))
        ));
    }
}
