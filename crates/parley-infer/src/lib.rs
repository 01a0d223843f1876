//! Parley Infer: embedding model clients.
//!
//! Provides the `EmbeddingModel` trait used by vector stores to turn chunk
//! contents and queries into vectors. Handles are constructed by the
//! provider resolver in `parley-runtime`.

pub mod embedder;

pub use embedder::{http_client, EmbedderConfig, EmbeddingModel, OllamaEmbedder, OpenAiEmbedder};
