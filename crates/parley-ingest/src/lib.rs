//! Parley Ingest: chunking strategies and document indexing.

pub mod chunking;
pub mod indexer;

pub use chunking::{select_splitter, RecursiveChunker, SeparatorPlacement, Splitter};
pub use indexer::index;
