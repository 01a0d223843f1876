//! Parley Store: vector store adapters.
//!
//! Backends: durable SQLite collections (CHROMA_LOCAL), exact in-memory
//! flat index (FAISS_INMEMORY, and QDRANT without a connection), Qdrant REST
//! and PostgreSQL/pgvector. `StoreRegistry::open` turns a `VectorStoreSpec`
//! into a `StoreHandle`.

pub mod backend;
pub mod handle;
pub mod memory;
pub mod pgvector;
pub mod qdrant;
pub mod registry;
pub mod sqlite;

pub use backend::{Hit, RawScore, VectorBackend};
pub use handle::StoreHandle;
pub use memory::{FlatIndex, MemoryBackend};
pub use registry::{StoreRegistry, DEFAULT_LOCAL_PATH};
pub use sqlite::SqliteCollection;
