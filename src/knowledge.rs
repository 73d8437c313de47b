use anyhow::Result;

use crate::models::RetrievedChunk;
use crate::ollama::OllamaClient;
use crate::qdrant_store::QdrantStore;

/// Handle to an indexed document living in the Qdrant collection.
///
/// Searches only see points stored under `owner`, so agents in different scopes never
/// read each other's uploads even though they share one collection.
#[derive(Clone)]
pub struct KnowledgeBase {
    ollama: OllamaClient,
    qdrant: QdrantStore,
    embedding_model: String,
    owner: String,
    document: String,
    chunk_count: usize,
}

impl KnowledgeBase {
    pub fn new(
        ollama: OllamaClient,
        qdrant: QdrantStore,
        embedding_model: impl Into<String>,
        owner: impl Into<String>,
        document: impl Into<String>,
        chunk_count: usize,
    ) -> Self {
        Self {
            ollama,
            qdrant,
            embedding_model: embedding_model.into(),
            owner: owner.into(),
            document: document.into(),
            chunk_count,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }

        let embedding = self.ollama.embed(&self.embedding_model, query).await?;
        let hits = self.qdrant.search(&embedding, limit, &self.owner).await?;
        tracing::debug!("knowledge search {:?} returned {} hit(s)", query, hits.len());
        Ok(hits)
    }
}

/// Renders hits as numbered reference blocks for the model.
pub fn format_references(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return "No relevant passages were found in the uploaded document.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(idx, hit)| {
            let location = match hit.chunk.page {
                Some(page) => format!("{}, page {}", hit.chunk.document, page),
                None => hit.chunk.document.clone(),
            };
            format!("[{}] ({})\n{}", idx + 1, location, hit.chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
