//! PostgreSQL collections using the `vector` extension.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{Chunk, Error, Metadata, Result, VectorStoreKind};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Hit, RawScore, VectorBackend};

const SCHEMA_SQL: [&str; 3] = [
    "CREATE EXTENSION IF NOT EXISTS vector",
    "CREATE TABLE IF NOT EXISTS rag_chunks (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata_json TEXT NOT NULL,
        source_ref TEXT NOT NULL,
        byte_offset BIGINT NOT NULL,
        embedding vector NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_rag_chunks_collection ON rag_chunks(collection)",
];

fn unavailable(e: sqlx::Error) -> Error {
    Error::StoreUnavailable(format!("PostgreSQL: {}", e))
}

/// Text form accepted by a `::vector` cast, e.g. `[0.1,0.2]`.
pub(crate) fn vector_literal(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Connect and make sure the chunk table exists.
pub async fn connect(connection: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(connection)
        .await
        .map_err(unavailable)?;
    for statement in SCHEMA_SQL {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .map_err(unavailable)?;
    }
    info!("Connected to PostgreSQL vector store");
    Ok(pool)
}

pub struct PgVectorBackend {
    pool: PgPool,
    collection: String,
}

impl PgVectorBackend {
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    async fn has_rows(&self) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM rag_chunks WHERE collection = $1)")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        row.try_get::<bool, _>(0).map_err(unavailable)
    }
}

#[async_trait]
impl VectorBackend for PgVectorBackend {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::Pgvector
    }

    async fn add(&self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for (chunk, embedding) in chunks.iter().zip(&embeddings) {
            sqlx::query(
                "INSERT INTO rag_chunks (id, collection, content, metadata_json, source_ref, byte_offset, embedding) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7::vector)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&self.collection)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(&chunk.source_document_ref)
            .bind(chunk.offset as i64)
            .bind(vector_literal(embedding))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Backend(format!("pgvector insert: {}", e)))?;
        }
        tx.commit().await.map_err(unavailable)?;
        debug!("Inserted {} rows into '{}'", chunks.len(), self.collection);
        Ok(chunks.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let rows = sqlx::query(
            "SELECT content, metadata_json, source_ref, byte_offset, \
                    (embedding <=> $1::vector)::float8 AS distance \
             FROM rag_chunks WHERE collection = $2 \
             ORDER BY embedding <=> $1::vector LIMIT $3",
        )
        .bind(vector_literal(query))
        .bind(&self.collection)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Backend(format!("pgvector search: {}", e)))?;

        if rows.is_empty() && !self.has_rows().await? {
            return Err(Error::EmptyCollection(self.collection.clone()));
        }

        rows.into_iter()
            .map(|row| {
                let metadata_json: String = row.try_get("metadata_json").map_err(unavailable)?;
                let metadata: Metadata = serde_json::from_str(&metadata_json)?;
                let offset: i64 = row.try_get("byte_offset").map_err(unavailable)?;
                let distance: f64 = row.try_get("distance").map_err(unavailable)?;
                let chunk = Chunk {
                    content: row.try_get("content").map_err(unavailable)?,
                    metadata,
                    source_document_ref: row.try_get("source_ref").map_err(unavailable)?,
                    offset: offset as usize,
                };
                Ok((chunk, RawScore::Distance(distance as f32)))
            })
            .collect()
    }
}
