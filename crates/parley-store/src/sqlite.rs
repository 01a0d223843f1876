//! Durable local collections in a SQLite file.
//!
//! All collections under one `local_path` share `collections.sqlite3`.
//! Embeddings are stored as little-endian f32 blobs; searches run against a
//! normalized matrix cached in memory and reloaded after writes. Database
//! work runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{Chunk, Error, Metadata, Result, VectorStoreKind};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::backend::{Hit, VectorBackend};
use crate::memory::FlatIndex;

/// File name of the database inside a store's `local_path`.
pub const DB_FILE: &str = "collections.sqlite3";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    content TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    byte_offset INTEGER NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);
"#;

fn db_err(e: rusqlite::Error) -> Error {
    Error::StoreUnavailable(format!("SQLite: {}", e))
}

pub(crate) fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// In-memory matrix tagged with the write generation it was loaded at.
///
/// `generation` is bumped under the connection lock after every commit, so a
/// snapshot read under that lock knows exactly which writes it contains.
#[derive(Default)]
struct MatrixCache {
    index: FlatIndex,
    generation: u64,
    loaded: Option<u64>,
}

pub struct SqliteCollection {
    inner: Arc<Collection>,
}

struct Collection {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    collection: String,
    cache: Mutex<MatrixCache>,
}

impl SqliteCollection {
    /// Open (or create) `collection` in the database under `dir`.
    pub fn open(dir: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", dir.display(), e)))?;
        let db_path = dir.join(DB_FILE);

        let conn = Connection::open(&db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;

        let store = Collection {
            conn: Mutex::new(conn),
            db_path,
            collection: collection.into(),
            cache: Mutex::new(MatrixCache::default()),
        };
        info!(
            "SQLite collection '{}' opened: {} chunks, path={}",
            store.collection,
            store.count()?,
            store.db_path.display()
        );
        Ok(Self {
            inner: Arc::new(store),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    /// Run `f` against the collection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Collection) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(inner.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("SQLite task failed: {}", e)))?
    }
}

impl Collection {
    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![self.collection],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        let Some(dim) = embeddings.first().map(Vec::len) else {
            return Ok(0);
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![self.collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match existing {
            Some(d) if d as usize != dim => {
                return Err(Error::Backend(format!(
                    "embedding dimension {} does not match collection '{}' dimension {}",
                    dim, self.collection, d
                )));
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3)",
                    params![self.collection, dim as i64, chrono::Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            }
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO chunks (collection, content, metadata_json, source_ref, byte_offset, embedding) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;
            for (chunk, embedding) in chunks.iter().zip(embeddings) {
                if embedding.len() != dim {
                    return Err(Error::Backend(format!(
                        "embedding dimension {} does not match batch dimension {}",
                        embedding.len(),
                        dim
                    )));
                }
                stmt.execute(params![
                    self.collection,
                    chunk.content,
                    serde_json::to_string(&chunk.metadata)?,
                    chunk.source_document_ref,
                    chunk.offset as i64,
                    encode_embedding(embedding),
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;

        self.cache.lock().generation += 1;
        Ok(chunks.len())
    }

    /// Read every row into a fresh index, returning it with the generation
    /// it reflects.
    fn load_matrix(&self) -> Result<(u64, FlatIndex)> {
        let conn = self.conn.lock();
        let generation = self.cache.lock().generation;
        let mut stmt = conn
            .prepare(
                "SELECT content, metadata_json, source_ref, byte_offset, embedding \
                 FROM chunks WHERE collection = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![self.collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut chunks = Vec::new();
        let mut embeddings = Vec::new();
        for row in rows {
            let (content, metadata_json, source_ref, offset, blob) = row.map_err(db_err)?;
            let metadata: Metadata = serde_json::from_str(&metadata_json)?;
            chunks.push(Chunk {
                content,
                metadata,
                source_document_ref: source_ref,
                offset: offset as usize,
            });
            embeddings.push(decode_embedding(&blob));
        }

        let mut index = FlatIndex::default();
        index.insert(chunks, embeddings)?;
        debug!("Loaded {} embeddings for '{}'", index.len(), self.collection);
        Ok((generation, index))
    }

    /// Keep `index` unless the cache already holds a same-or-newer load.
    fn install(&self, generation: u64, index: FlatIndex) {
        let mut cache = self.cache.lock();
        if cache.loaded.map_or(true, |loaded| loaded < generation) {
            cache.index = index;
            cache.loaded = Some(generation);
        }
    }

    fn is_current(&self) -> bool {
        let cache = self.cache.lock();
        cache.loaded == Some(cache.generation)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if !self.is_current() {
            let (generation, index) = self.load_matrix()?;
            self.install(generation, index);
        }
        let cache = self.cache.lock();
        cache.index.search(query, k).map_err(|e| match e {
            Error::EmptyCollection(_) => Error::EmptyCollection(self.collection.clone()),
            other => other,
        })
    }
}

#[async_trait]
impl VectorBackend for SqliteCollection {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::ChromaLocal
    }

    async fn add(&self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        self.blocking(move |c| c.insert(&chunks, &embeddings)).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let query = query.to_vec();
        self.blocking(move |c| c.search(&query, k)).await
    }
}
