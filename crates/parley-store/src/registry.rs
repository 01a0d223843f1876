//! Opens store handles and keeps process-wide collection state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use parley_core::{Error, Result, VectorStoreKind, VectorStoreSpec};
use parley_infer::EmbeddingModel;
use reqwest::Client;
use sqlx::postgres::PgPool;
use tracing::{debug, info};

use crate::backend::VectorBackend;
use crate::handle::StoreHandle;
use crate::memory::MemoryBackend;
use crate::pgvector::{self, PgVectorBackend};
use crate::qdrant::QdrantBackend;
use crate::sqlite::SqliteCollection;

/// Directory used for CHROMA_LOCAL when no `local_path` is given.
pub const DEFAULT_LOCAL_PATH: &str = "./chroma_db";

/// Shared state behind every opened store.
///
/// In-memory collections live here for the process lifetime, SQLite
/// collections keep their matrix cache between requests, and PostgreSQL
/// pools are reused per connection string.
pub struct StoreRegistry {
    http: Client,
    memory: RwLock<HashMap<(VectorStoreKind, String), Arc<MemoryBackend>>>,
    sqlite: RwLock<HashMap<(PathBuf, String), Arc<SqliteCollection>>>,
    pg_pools: RwLock<HashMap<String, PgPool>>,
}

impl StoreRegistry {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            memory: RwLock::new(HashMap::new()),
            sqlite: RwLock::new(HashMap::new()),
            pg_pools: RwLock::new(HashMap::new()),
        }
    }

    /// Open the collection named by `spec`. Existing contents are reused;
    /// nothing is re-indexed.
    pub async fn open(
        &self,
        spec: &VectorStoreSpec,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<StoreHandle> {
        let backend: Arc<dyn VectorBackend> = match spec.kind {
            VectorStoreKind::ChromaLocal => self.sqlite_collection(spec)?,
            VectorStoreKind::FaissInmemory => self.memory_collection(spec),
            VectorStoreKind::Qdrant => match spec.connection.as_deref() {
                Some(url) => Arc::new(QdrantBackend::new(
                    self.http.clone(),
                    url,
                    spec.collection_name.clone(),
                )),
                None => {
                    debug!("No Qdrant connection given, using in-memory collection");
                    self.memory_collection(spec)
                }
            },
            VectorStoreKind::Pgvector => {
                let connection = spec.connection.as_deref().ok_or_else(|| {
                    Error::StoreUnavailable("PGVECTOR requires a connection string".into())
                })?;
                let pool = self.pg_pool(connection).await?;
                Arc::new(PgVectorBackend::new(pool, spec.collection_name.clone()))
            }
        };

        debug!("Opened {} collection '{}'", spec.kind, spec.collection_name);
        Ok(StoreHandle::new(spec.clone(), backend, embedder))
    }

    fn memory_collection(&self, spec: &VectorStoreSpec) -> Arc<MemoryBackend> {
        let key = (spec.kind, spec.collection_name.clone());
        if let Some(existing) = self.memory.read().get(&key) {
            return existing.clone();
        }
        self.memory
            .write()
            .entry(key)
            .or_insert_with(|| {
                info!("Created in-memory collection '{}'", spec.collection_name);
                Arc::new(MemoryBackend::new(spec.kind, spec.collection_name.clone()))
            })
            .clone()
    }

    fn sqlite_collection(&self, spec: &VectorStoreSpec) -> Result<Arc<SqliteCollection>> {
        let dir = spec
            .local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH));
        let key = (dir.clone(), spec.collection_name.clone());
        if let Some(existing) = self.sqlite.read().get(&key) {
            return Ok(existing.clone());
        }

        let collection = Arc::new(SqliteCollection::open(&dir, spec.collection_name.clone())?);
        Ok(self
            .sqlite
            .write()
            .entry(key)
            .or_insert(collection)
            .clone())
    }

    async fn pg_pool(&self, connection: &str) -> Result<PgPool> {
        let cached = self.pg_pools.read().get(connection).cloned();
        if let Some(pool) = cached {
            return Ok(pool);
        }
        let pool = pgvector::connect(connection).await?;
        self.pg_pools
            .write()
            .insert(connection.to_string(), pool.clone());
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::{Chunk, Metadata, ProviderKind};
    use parley_infer::EmbedderConfig;
    use tempfile::TempDir;

    /// Embeds by keyword presence so scores are predictable.
    struct KeywordEmbedder {
        config: EmbedderConfig,
    }

    impl KeywordEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                config: EmbedderConfig {
                    backend: ProviderKind::LocalRuntime,
                    model: "keywords".into(),
                    base_url: "http://localhost:11434".into(),
                },
            })
        }
    }

    #[async_trait]
    impl EmbeddingModel for KeywordEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    ["rust", "python", "go"]
                        .iter()
                        .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }

        fn config(&self) -> &EmbedderConfig {
            &self.config
        }
    }

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.into(),
            metadata: Metadata::new(),
            source_document_ref: "doc".into(),
            offset: 0,
        }
    }

    fn registry() -> StoreRegistry {
        StoreRegistry::new(Client::new())
    }

    #[tokio::test]
    async fn test_search_after_zero_adds_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        for spec in [
            VectorStoreSpec::new(VectorStoreKind::FaissInmemory, "empty"),
            VectorStoreSpec::new(VectorStoreKind::Qdrant, "empty"),
            VectorStoreSpec::new(VectorStoreKind::ChromaLocal, "empty").with_local_path(dir.path()),
        ] {
            let store = registry.open(&spec, KeywordEmbedder::new()).await.unwrap();
            assert!(store.search("rust", 4, 0.0).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_results_sorted_and_thresholded() {
        let registry = registry();
        let spec = VectorStoreSpec::new(VectorStoreKind::FaissInmemory, "langs");
        let store = registry.open(&spec, KeywordEmbedder::new()).await.unwrap();
        store
            .add(vec![
                chunk("go only"),
                chunk("rust and python"),
                chunk("rust only"),
                chunk("python only"),
            ])
            .await
            .unwrap();

        let results = store.search("rust", 10, 0.5).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["rust only", "rust and python"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| r.score >= 0.5 && r.score <= 1.0));

        let top1 = store.search("rust", 1, 0.0).await.unwrap();
        assert_eq!(top1.len(), 1);
        assert!((top1[0].score - 1.0).abs() < 1e-6);

        assert!(store.search("rust", 0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_collections_shared_across_opens() {
        let registry = registry();
        let spec = VectorStoreSpec::new(VectorStoreKind::FaissInmemory, "shared");
        let first = registry.open(&spec, KeywordEmbedder::new()).await.unwrap();
        first.add(vec![chunk("rust")]).await.unwrap();

        let second = registry.open(&spec, KeywordEmbedder::new()).await.unwrap();
        assert_eq!(second.search("rust", 5, 0.0).await.unwrap().len(), 1);

        let other = VectorStoreSpec::new(VectorStoreKind::FaissInmemory, "other");
        let third = registry.open(&other, KeywordEmbedder::new()).await.unwrap();
        assert!(third.search("rust", 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_adds_scored_independently() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        let spec = VectorStoreSpec::new(VectorStoreKind::ChromaLocal, "dups").with_local_path(dir.path());
        let store = registry.open(&spec, KeywordEmbedder::new()).await.unwrap();
        store.add(vec![chunk("python")]).await.unwrap();
        store.add(vec![chunk("python")]).await.unwrap();

        let results = store.search("python", 5, 0.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, results[1].score);
    }

    #[tokio::test]
    async fn test_pgvector_requires_connection() {
        let spec = VectorStoreSpec::new(VectorStoreKind::Pgvector, "pg");
        let err = registry().open(&spec, KeywordEmbedder::new()).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
