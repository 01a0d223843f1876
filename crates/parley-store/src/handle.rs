//! Store handle: embeds text, delegates to a backend, normalizes scores.

use std::sync::Arc;

use parley_core::{Chunk, Error, Result, RetrievalResult, VectorStoreSpec};
use parley_infer::EmbeddingModel;
use tracing::{debug, info};

use crate::backend::VectorBackend;

#[derive(Clone)]
pub struct StoreHandle {
    spec: VectorStoreSpec,
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("spec", &self.spec)
            .field("backend", &self.backend.kind())
            .field("embedder", self.embedder.config())
            .finish()
    }
}

impl StoreHandle {
    pub fn new(
        spec: VectorStoreSpec,
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Self {
        Self {
            spec,
            backend,
            embedder,
        }
    }

    pub fn spec(&self) -> &VectorStoreSpec {
        &self.spec
    }

    /// Embed and store chunks. Repeated adds append; nothing is deduplicated.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::Backend(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let added = self.backend.add(chunks, embeddings).await?;
        info!(
            "Stored {} chunks in {} collection '{}'",
            added, self.spec.kind, self.spec.collection_name
        );
        Ok(added)
    }

    /// Up to `k` results scoring at least `threshold`, best first.
    ///
    /// A collection that has never been written to yields no results.
    pub async fn search(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_query(query).await?;

        let hits = match self.backend.search(&embedding, k).await {
            Ok(hits) => hits,
            Err(Error::EmptyCollection(name)) => {
                debug!("Collection '{}' is empty, no results", name);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|(chunk, raw)| RetrievalResult {
                chunk,
                score: raw.normalized(),
            })
            .filter(|r| r.score >= threshold)
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        debug!(
            "Retrieved {} chunks from '{}' (k={}, threshold={})",
            results.len(),
            self.spec.collection_name,
            k,
            threshold
        );
        Ok(results)
    }
}
