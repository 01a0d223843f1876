//! Request-scoped specifications and the document/chunk data model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Scalar metadata attached to documents and chunks.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------
// Messages
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a wire role; unknown roles yield `None`.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A message as received from clients; the role is free text.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl WireMessage {
    /// Convert, dropping roles that are not system/user/assistant.
    pub fn into_message(self) -> Option<Message> {
        Role::parse(&self.role.to_ascii_lowercase()).map(|role| Message::new(role, self.content))
    }
}

/// Deserialize a message list, silently dropping unknown roles.
pub fn deserialize_messages<'de, D>(deserializer: D) -> std::result::Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Vec::<WireMessage>::deserialize(deserializer)?;
    Ok(wire.into_iter().filter_map(WireMessage::into_message).collect())
}

// ---------------------------------------------------------------
// Providers
// ---------------------------------------------------------------

/// Model backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum ProviderKind {
    /// Ollama-style local runtime.
    LocalRuntime,
    OpenaiCompatible,
    AnthropicCompatible,
    /// OpenAI-compatible API at a caller-supplied endpoint.
    CustomEndpoint,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::LocalRuntime,
        ProviderKind::OpenaiCompatible,
        ProviderKind::AnthropicCompatible,
        ProviderKind::CustomEndpoint,
    ];

    /// Parse a wire identifier. Unrecognized identifiers select the local
    /// runtime.
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_uppercase().as_str() {
            "OPENAI" | "OPENAI_COMPATIBLE" => ProviderKind::OpenaiCompatible,
            "ANTHROPIC" | "ANTHROPIC_COMPATIBLE" => ProviderKind::AnthropicCompatible,
            "CUSTOM" | "CUSTOM_ENDPOINT" => ProviderKind::CustomEndpoint,
            _ => ProviderKind::LocalRuntime,
        }
    }
}

impl From<String> for ProviderKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::LocalRuntime => "LOCAL_RUNTIME",
            ProviderKind::OpenaiCompatible => "OPENAI_COMPATIBLE",
            ProviderKind::AnthropicCompatible => "ANTHROPIC_COMPATIBLE",
            ProviderKind::CustomEndpoint => "CUSTOM_ENDPOINT",
        };
        f.write_str(s)
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Everything needed to construct a chat or embedding model handle.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(alias = "provider")]
    pub kind: ProviderKind,
    #[serde(alias = "model")]
    pub model_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("kind", &self.kind)
            .field("model_name", &self.model_name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ProviderSpec {
    pub fn new(kind: ProviderKind, model_name: impl Into<String>) -> Self {
        Self {
            kind,
            model_name: model_name.into(),
            endpoint: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Reject out-of-range sampling parameters before any backend is built.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidRequest(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidRequest("max_tokens must be positive".into()));
        }
        if self.model_name.trim().is_empty() {
            return Err(Error::InvalidRequest("model name must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ChunkingStrategy {
    Fixed,
    Recursive,
    Semantic,
    MarkdownHeaders,
    HtmlHeaders,
    Code,
}

impl FromStr for ChunkingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED" => Ok(Self::Fixed),
            "RECURSIVE" => Ok(Self::Recursive),
            "SEMANTIC" => Ok(Self::Semantic),
            "MARKDOWN" | "MARKDOWN_HEADERS" => Ok(Self::MarkdownHeaders),
            "HTML" | "HTML_HEADERS" => Ok(Self::HtmlHeaders),
            "CODE" => Ok(Self::Code),
            other => Err(Error::ChunkingConfig(format!(
                "unsupported chunking strategy: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ChunkingStrategy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Source language for syntax-aware code splitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    #[default]
    Python,
    Rust,
    Javascript,
    Go,
    Java,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingSpec {
    pub strategy: ChunkingStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub separators: Option<Vec<String>>,
    #[serde(default)]
    pub language: Option<CodeLanguage>,
}

impl ChunkingSpec {
    pub fn new(strategy: ChunkingStrategy, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            strategy,
            chunk_size,
            chunk_overlap,
            separators: None,
            language: None,
        }
    }

    pub fn with_separators<S: Into<String>>(mut self, separators: impl IntoIterator<Item = S>) -> Self {
        self.separators = Some(separators.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_language(mut self, language: CodeLanguage) -> Self {
        self.language = Some(language);
        self
    }
}

// ---------------------------------------------------------------
// Documents and chunks
// ---------------------------------------------------------------

/// A raw document handed to the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "page_content")]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stable reference carried by every chunk cut from this document.
    pub fn reference(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| content_hash(&self.content))
    }
}

/// A bounded fragment of a document; the unit stored and retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub source_document_ref: String,
    /// Byte offset of the first character within the source content.
    pub offset: usize,
}

// ---------------------------------------------------------------
// Vector stores
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum VectorStoreKind {
    ChromaLocal,
    Pgvector,
    Qdrant,
    FaissInmemory,
}

impl VectorStoreKind {
    /// Parse a wire identifier. Unrecognized identifiers select the local
    /// durable store.
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_uppercase().as_str() {
            "PGVECTOR" => VectorStoreKind::Pgvector,
            "QDRANT" => VectorStoreKind::Qdrant,
            "FAISS" | "FAISS_INMEMORY" => VectorStoreKind::FaissInmemory,
            _ => VectorStoreKind::ChromaLocal,
        }
    }
}

impl fmt::Display for VectorStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VectorStoreKind::ChromaLocal => "CHROMA_LOCAL",
            VectorStoreKind::Pgvector => "PGVECTOR",
            VectorStoreKind::Qdrant => "QDRANT",
            VectorStoreKind::FaissInmemory => "FAISS_INMEMORY",
        })
    }
}

impl From<String> for VectorStoreKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

fn default_collection() -> String {
    "default".into()
}

/// Identifies one logical collection on one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreSpec {
    pub kind: VectorStoreKind,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl VectorStoreSpec {
    pub fn new(kind: VectorStoreKind, collection_name: impl Into<String>) -> Self {
        Self {
            kind,
            collection_name: collection_name.into(),
            connection: None,
            local_path: None,
        }
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

/// A retrieved chunk with its normalized similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// Compute SHA-256 content hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
