//! Document indexing: split → embed → store.

use parley_core::{Chunk, Document, Result};
use parley_store::StoreHandle;
use tracing::{debug, info};

use crate::chunking::Splitter;

/// Split every document in order and add all chunks to `store` in one call.
///
/// Returns the number of chunks stored. A failed `add` fails the whole call.
pub async fn index(documents: &[Document], splitter: &Splitter, store: &StoreHandle) -> Result<usize> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for document in documents {
        let pieces = splitter.split(document);
        debug!(
            "Document {} split into {} chunks",
            document.reference(),
            pieces.len()
        );
        chunks.extend(pieces);
    }

    let total = chunks.len();
    let stored = store.add(chunks).await?;
    info!(
        "Indexed {} documents ({} chunks) into '{}'",
        documents.len(),
        total,
        store.spec().collection_name
    );
    Ok(stored)
}
