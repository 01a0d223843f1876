//! Process configuration and provider defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Host and timeout defaults consulted by the provider resolver.
///
/// This is the only process-wide state resolution reads, and it is handed to
/// the resolver explicitly rather than looked up from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefaults {
    /// Base URL of the local model runtime (Ollama).
    pub ollama_host: String,
    /// Model used when a request does not name one.
    pub default_model: String,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    /// Timeout for interactive chat and embedding calls.
    pub request_timeout_secs: u64,
    /// Timeout for model pulls, which can take minutes.
    pub pull_timeout_secs: u64,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.into(),
            default_model: DEFAULT_OLLAMA_MODEL.into(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.into(),
            request_timeout_secs: 120,
            pull_timeout_secs: 600,
        }
    }
}

impl ProviderDefaults {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// Join a base URL and an API path without doubling or dropping slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Top-level Parley configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    /// Bind address for the HTTP server.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Enables debug logging.
    pub debug: bool,
    /// Origin allowed by CORS in addition to localhost:3000.
    pub frontend_url: String,
    pub providers: ProviderDefaults,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            debug: false,
            frontend_url: DEFAULT_FRONTEND_URL.into(),
            providers: ProviderDefaults::default(),
        }
    }
}

impl ParleyConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_secs = |key: &str, fallback: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(fallback)
        };

        let providers = ProviderDefaults {
            ollama_host: lookup("OLLAMA_HOST").unwrap_or(defaults.providers.ollama_host),
            default_model: lookup("OLLAMA_DEFAULT_MODEL")
                .unwrap_or(defaults.providers.default_model),
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or(defaults.providers.openai_base_url),
            anthropic_base_url: lookup("ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.providers.anthropic_base_url),
            request_timeout_secs: parse_secs(
                "REQUEST_TIMEOUT_SECS",
                defaults.providers.request_timeout_secs,
            ),
            pull_timeout_secs: parse_secs("PULL_TIMEOUT_SECS", defaults.providers.pull_timeout_secs),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            debug: lookup("DEBUG")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            frontend_url: lookup("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_env() {
        let config = ParleyConfig::from_lookup(|_| None);
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.debug);
        assert_eq!(config.providers.ollama_host, "http://localhost:11434");
        assert_eq!(config.providers.default_model, "llama3");
        assert_eq!(config.providers.pull_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:11434/", "/api/chat"),
            "http://localhost:11434/api/chat"
        );
        assert_eq!(
            join_url("https://api.openai.com/v1", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OLLAMA_HOST", "http://gpu-box:11434"),
            ("PORT", "9001"),
            ("DEBUG", "TRUE"),
            ("PULL_TIMEOUT_SECS", "1200"),
            ("REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = ParleyConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 9001);
        assert!(config.debug);
        assert_eq!(config.providers.ollama_host, "http://gpu-box:11434");
        assert_eq!(config.providers.pull_timeout_secs, 1200);
        assert_eq!(config.providers.request_timeout_secs, 120);
    }
}
