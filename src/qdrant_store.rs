use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::models::{Chunk, RetrievedChunk};

#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    known_vector_size: Arc<RwLock<Option<usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            known_vector_size: Arc::new(RwLock::new(None)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    pub async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .context("failed to contact qdrant while checking collection")?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => anyhow::bail!("qdrant collection lookup returned {status}"),
        }
    }

    /// Reuses an existing collection; only creates it when missing.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        if self.known_vector_size.read().await.is_some() {
            return Ok(());
        }

        if self.collection_exists().await? {
            *self.known_vector_size.write().await = Some(vector_size);
            return Ok(());
        }

        self.create_collection(vector_size).await
    }

    async fn create_collection(&self, vector_size: usize) -> Result<()> {
        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        self.client
            .put(self.collection_url())
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?
            .error_for_status()
            .context("qdrant failed to create collection")?;

        self.client
            .put(format!("{}/index?wait=true", self.collection_url()))
            .json(&json!({ "field_name": "owner", "field_schema": "keyword" }))
            .send()
            .await
            .context("failed to contact qdrant while indexing owner field")?
            .error_for_status()
            .context("qdrant failed to create owner payload index")?;

        *self.known_vector_size.write().await = Some(vector_size);
        tracing::info!(
            "created qdrant collection {} (dim={})",
            self.collection,
            vector_size
        );
        Ok(())
    }

    /// Removes every point uploaded under `owner`, leaving other owners untouched.
    pub async fn delete_owner_points(&self, owner: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());

        self.client
            .post(url)
            .json(&json!({ "filter": owner_filter(owner) }))
            .send()
            .await
            .context("failed to contact qdrant during delete")?
            .error_for_status()
            .context("qdrant delete returned non-success status")?;

        tracing::info!("cleared points owned by {} in {}", owner, self.collection);
        Ok(())
    }

    pub async fn upsert_points(&self, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let upsert_url = format!("{}/points?wait=true", self.collection_url());
        let body = json!({ "points": points });

        self.client
            .put(upsert_url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during upsert")?
            .error_for_status()
            .context("qdrant upsert returned non-success status")?;

        Ok(())
    }

    /// Vector search restricted to points uploaded under `owner`.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        owner: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!("{}/points/search", self.collection_url());
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "filter": owner_filter(owner),
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during search")?
            .error_for_status()
            .context("qdrant search returned non-success status")?
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(RetrievedChunk {
                    chunk: Chunk {
                        id: payload.chunk_id,
                        owner: payload.owner,
                        document: payload.document,
                        page: payload.page,
                        content: payload.content,
                    },
                    score: point.score,
                })
            })
            .collect())
    }
}

fn owner_filter(owner: &str) -> serde_json::Value {
    json!({
        "must": [
            { "key": "owner", "match": { "value": owner } }
        ]
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

impl QdrantPoint {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            vector,
            payload: QdrantPayload {
                chunk_id: chunk.id.clone(),
                owner: chunk.owner.clone(),
                document: chunk.document.clone(),
                page: chunk.page,
                content: chunk.content.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub chunk_id: String,
    #[serde(default)]
    pub owner: String,
    pub document: String,
    pub page: Option<i64>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}
