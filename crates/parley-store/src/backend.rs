//! Backend trait shared by all vector store adapters.

use async_trait::async_trait;
use parley_core::{Chunk, Result, VectorStoreKind};

/// Score as reported by a backend, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawScore {
    /// Cosine similarity in [-1, 1].
    Similarity(f32),
    /// Cosine distance in [0, 2].
    Distance(f32),
}

impl RawScore {
    /// Map onto [0, 1], higher is more relevant.
    pub fn normalized(self) -> f32 {
        let score = match self {
            RawScore::Similarity(s) => s,
            RawScore::Distance(d) => 1.0 - d,
        };
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }
}

/// A scored hit returned by a backend.
pub type Hit = (Chunk, RawScore);

/// Storage engine behind a [`crate::StoreHandle`].
///
/// Implementations store pre-computed embeddings; embedding the text is the
/// handle's job. `search` on a collection that has never been written to
/// returns `Error::EmptyCollection`.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn kind(&self) -> VectorStoreKind;

    /// Append chunks with their embeddings; returns the number stored.
    async fn add(&self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize>;

    /// Up to `k` nearest chunks, best first.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>>;
}

pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-9 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / norm).collect()
}
