//! Shared application state.

use std::sync::Arc;

use parley_core::{ParleyConfig, ProviderKind, ProviderSpec, Result};
use parley_infer::http_client;
use parley_runtime::{ChatService, ProviderResolver, RagPipeline};
use parley_store::StoreRegistry;
use reqwest::Client;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: ParleyConfig,
    /// Client for Ollama catalog calls; pulls override its timeout.
    pub http: Client,
    pub chat: ChatService,
    pub pipeline: RagPipeline,
}

impl AppState {
    pub fn new(config: ParleyConfig) -> Result<Self> {
        let http = http_client(config.providers.request_timeout())?;
        let resolver = Arc::new(ProviderResolver::with_client(
            config.providers.clone(),
            http.clone(),
        ));
        let registry = Arc::new(StoreRegistry::new(http.clone()));

        Ok(Self {
            chat: ChatService::new(resolver.clone()),
            pipeline: RagPipeline::new(resolver, registry),
            http,
            config,
        })
    }

    /// Local runtime spec for requests that carry no provider block.
    pub fn default_provider(&self, model: Option<String>) -> ProviderSpec {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.providers.default_model.clone());
        ProviderSpec::new(ProviderKind::LocalRuntime, model)
    }

    /// Whether streams default to verbose telemetry.
    pub fn verbose(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.config.debug)
    }
}
