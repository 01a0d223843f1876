//! Qdrant collections over the REST API.

use async_trait::async_trait;
use parley_core::{join_url, Chunk, Error, Metadata, Result, VectorStoreKind};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Hit, RawScore, VectorBackend};

pub struct QdrantBackend {
    client: Client,
    base_url: String,
    collection: String,
    /// Dimension of the collection once it is known to exist.
    dimension: RwLock<Option<usize>>,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Value,
}

fn unavailable(e: reqwest::Error) -> Error {
    Error::StoreUnavailable(format!("Qdrant request failed: {}", e))
}

async fn error_body(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Backend(format!("Qdrant error {}: {}", status, body))
}

impl QdrantBackend {
    pub fn new(client: Client, base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            collection: collection.into(),
            dimension: RwLock::new(None),
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        join_url(
            &self.base_url,
            &format!("collections/{}{}", self.collection, suffix),
        )
    }

    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        if self.dimension.read().is_some() {
            return Ok(());
        }

        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .map_err(unavailable)?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                let created = self
                    .client
                    .put(self.collection_url(""))
                    .json(&json!({ "vectors": { "size": dim, "distance": "Cosine" } }))
                    .send()
                    .await
                    .map_err(unavailable)?;
                if !created.status().is_success() {
                    return Err(error_body(created).await);
                }
                info!("Created Qdrant collection '{}' (dim={})", self.collection, dim);
            }
            _ => return Err(error_body(response).await),
        }

        *self.dimension.write() = Some(dim);
        Ok(())
    }

    fn point_to_chunk(payload: &Value) -> Chunk {
        let metadata: Metadata = payload
            .get("metadata")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default();
        Chunk {
            content: payload["content"].as_str().unwrap_or_default().to_string(),
            metadata,
            source_document_ref: payload["source_document_ref"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            offset: payload["offset"].as_u64().unwrap_or(0) as usize,
        }
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::Qdrant
    }

    async fn add(&self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        let Some(dim) = embeddings.first().map(Vec::len) else {
            return Ok(0);
        };
        self.ensure_collection(dim).await?;

        let points: Vec<Value> = chunks
            .iter()
            .zip(&embeddings)
            .map(|(chunk, vector)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": {
                        "content": chunk.content,
                        "metadata": chunk.metadata,
                        "source_document_ref": chunk.source_document_ref,
                        "offset": chunk.offset,
                    },
                })
            })
            .collect();

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        debug!("Upserted {} points into '{}'", points.len(), self.collection);
        Ok(points.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&json!({ "vector": query, "limit": k, "with_payload": true }))
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::EmptyCollection(self.collection.clone()));
        }
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Malformed Qdrant response: {}", e)))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| (Self::point_to_chunk(&p.payload), RawScore::Similarity(p.score)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeQdrant {
        created: parking_lot::Mutex<Option<Value>>,
        points: parking_lot::Mutex<Vec<Value>>,
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fake_router(state: Arc<FakeQdrant>) -> Router {
        Router::new()
            .route(
                "/collections/{name}",
                get(|State(s): State<Arc<FakeQdrant>>, Path(_): Path<String>| async move {
                    if s.created.lock().is_some() {
                        (HttpStatus::OK, Json(json!({ "result": {} })))
                    } else {
                        (HttpStatus::NOT_FOUND, Json(json!({ "status": "not found" })))
                    }
                })
                .put(
                    |State(s): State<Arc<FakeQdrant>>, Json(body): Json<Value>| async move {
                        *s.created.lock() = Some(body);
                        Json(json!({ "result": true }))
                    },
                ),
            )
            .route(
                "/collections/{name}/points",
                put(|State(s): State<Arc<FakeQdrant>>, Json(body): Json<Value>| async move {
                    s.points
                        .lock()
                        .extend(body["points"].as_array().cloned().unwrap_or_default());
                    Json(json!({ "result": { "status": "completed" } }))
                }),
            )
            .route(
                "/collections/{name}/points/search",
                post(|State(s): State<Arc<FakeQdrant>>, Json(body): Json<Value>| async move {
                    if s.created.lock().is_none() {
                        return (HttpStatus::NOT_FOUND, Json(json!({ "status": "not found" })));
                    }
                    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
                    let result: Vec<Value> = s
                        .points
                        .lock()
                        .iter()
                        .take(limit)
                        .map(|p| json!({ "id": p["id"], "score": 0.42, "payload": p["payload"] }))
                        .collect();
                    (HttpStatus::OK, Json(json!({ "result": result })))
                }),
            )
            .with_state(state)
    }

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.into(),
            metadata: Metadata::new(),
            source_document_ref: "doc".into(),
            offset: 3,
        }
    }

    #[tokio::test]
    async fn test_search_before_add_is_empty_collection() {
        let fake = Arc::new(FakeQdrant::default());
        let base = spawn(fake_router(fake)).await;
        let backend = QdrantBackend::new(Client::new(), base, "fresh");
        let err = backend.search(&[1.0, 0.0], 3).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCollection(name) if name == "fresh"));
    }

    #[tokio::test]
    async fn test_add_creates_cosine_collection_and_searches() {
        let fake = Arc::new(FakeQdrant::default());
        let base = spawn(fake_router(fake.clone())).await;
        let backend = QdrantBackend::new(Client::new(), base, "docs");

        let added = backend
            .add(vec![chunk("hello"), chunk("world")], vec![vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let created = fake.created.lock().clone().unwrap();
        assert_eq!(created["vectors"]["size"], 2);
        assert_eq!(created["vectors"]["distance"], "Cosine");

        let hits = backend.search(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "hello");
        assert_eq!(hits[0].0.offset, 3);
        assert_eq!(hits[0].1, RawScore::Similarity(0.42));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_store_unavailable() {
        let backend = QdrantBackend::new(Client::new(), "http://127.0.0.1:9", "x");
        let err = backend.search(&[1.0], 1).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
