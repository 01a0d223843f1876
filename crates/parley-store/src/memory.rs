//! Exact in-memory index: L2-normalized rows in an ndarray matrix, scored by
//! inner product.

use async_trait::async_trait;
use ndarray::{Array1, Array2, ArrayView1};
use parking_lot::RwLock;
use parley_core::{Chunk, Error, Result, VectorStoreKind};

use crate::backend::{l2_normalize, Hit, RawScore, VectorBackend};

/// Flat inner-product index over normalized embeddings.
#[derive(Debug)]
pub struct FlatIndex {
    /// Shape (N, dim); rows are unit length (or zero).
    matrix: Array2<f32>,
    chunks: Vec<Chunk>,
}

impl Default for FlatIndex {
    fn default() -> Self {
        Self {
            matrix: Array2::zeros((0, 0)),
            chunks: Vec::new(),
        }
    }
}

impl FlatIndex {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.matrix.ncols())
    }

    pub fn insert(&mut self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(Error::Internal(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        let Some(dim) = self.dimension().or_else(|| embeddings.first().map(Vec::len)) else {
            return Ok(0);
        };
        if self.is_empty() {
            self.matrix = Array2::zeros((0, dim));
        }

        for embedding in &embeddings {
            if embedding.len() != dim {
                return Err(Error::Backend(format!(
                    "embedding dimension {} does not match collection dimension {}",
                    embedding.len(),
                    dim
                )));
            }
        }
        for embedding in &embeddings {
            let row = Array1::from(l2_normalize(embedding));
            self.matrix
                .push_row(row.view())
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        let added = chunks.len();
        self.chunks.extend(chunks);
        Ok(added)
    }

    /// Top `k` rows by cosine similarity to `query`.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() {
            return Err(Error::EmptyCollection("in-memory index".into()));
        }
        if query.len() != self.matrix.ncols() {
            return Err(Error::Backend(format!(
                "query dimension {} does not match collection dimension {}",
                query.len(),
                self.matrix.ncols()
            )));
        }

        let q = l2_normalize(query);
        let similarities = self.matrix.dot(&ArrayView1::from(&q[..]));

        let mut indexed: Vec<(usize, f32)> = similarities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(k.min(indexed.len()));
        Ok(indexed)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        Ok(self
            .top_k(query, k)?
            .into_iter()
            .map(|(i, score)| (self.chunks[i].clone(), RawScore::Similarity(score)))
            .collect())
    }
}

/// Process-lifetime collection backed by a [`FlatIndex`].
pub struct MemoryBackend {
    kind: VectorStoreKind,
    collection: String,
    index: RwLock<FlatIndex>,
}

impl MemoryBackend {
    pub fn new(kind: VectorStoreKind, collection: impl Into<String>) -> Self {
        Self {
            kind,
            collection: collection.into(),
            index: RwLock::new(FlatIndex::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn kind(&self) -> VectorStoreKind {
        self.kind
    }

    async fn add(&self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        self.index.write().insert(chunks, embeddings)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.index.read().search(query, k).map_err(|e| match e {
            Error::EmptyCollection(_) => Error::EmptyCollection(self.collection.clone()),
            other => other,
        })
    }
}
