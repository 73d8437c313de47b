pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{AppConfig, KnowledgeConfig};
use crate::knowledge::KnowledgeBase;
use crate::models::{Chunk, PageText};
use crate::ollama::OllamaClient;
use crate::qdrant_store::{QdrantPoint, QdrantStore};

const UPSERT_BATCH: usize = 64;

/// Turns PDFs into points in the shared collection and hands back a searchable handle.
///
/// Every point is tagged with the uploading scope's `owner`; the returned handle only
/// searches that owner's points.
#[derive(Clone)]
pub struct Ingestor {
    ollama: OllamaClient,
    qdrant: QdrantStore,
    embedding_model: String,
    config: KnowledgeConfig,
}

impl Ingestor {
    pub fn new(
        ollama: OllamaClient,
        qdrant: QdrantStore,
        embedding_model: impl Into<String>,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            ollama,
            qdrant,
            embedding_model: embedding_model.into(),
            config,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            OllamaClient::new(config.ollama_base_url.clone()),
            QdrantStore::new(
                config.qdrant_base_url.clone(),
                config.qdrant_collection.clone(),
            ),
            config.models.embedding_model.clone(),
            config.knowledge.clone(),
        )
    }

    /// Spools the upload to a temporary `.pdf` and indexes it.
    pub async fn ingest(
        &self,
        owner: &str,
        document: &str,
        pdf_bytes: &[u8],
    ) -> Result<KnowledgeBase> {
        if pdf_bytes.is_empty() {
            anyhow::bail!("uploaded file is empty");
        }

        let temp = tempfile::Builder::new()
            .prefix("pdfchat-")
            .suffix(".pdf")
            .tempfile()
            .context("failed to create temporary file for upload")?;
        tokio::fs::write(temp.path(), pdf_bytes)
            .await
            .context("failed to write upload to temporary file")?;

        self.ingest_path(owner, document, temp.path()).await
    }

    pub async fn ingest_path(
        &self,
        owner: &str,
        document: &str,
        path: &Path,
    ) -> Result<KnowledgeBase> {
        let pages = pdf::read_pdf_pages(path).await?;
        tracing::info!("read {} page(s) from {}", pages.len(), document);
        self.ingest_pages(owner, document, &pages).await
    }

    pub async fn ingest_pages(
        &self,
        owner: &str,
        document: &str,
        pages: &[PageText],
    ) -> Result<KnowledgeBase> {
        let chunks = build_chunks(
            owner,
            document,
            pages,
            self.config.chunk_target_tokens,
            self.config.chunk_overlap_tokens,
        );

        if chunks.is_empty() {
            anyhow::bail!("no chunks generated from {}", document);
        }

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let embedding = self
                .ollama
                .embed(&self.embedding_model, &chunk.content)
                .await
                .with_context(|| format!("failed embedding for chunk {}", chunk.id))?;
            points.push(QdrantPoint::from_chunk(chunk, embedding));
        }

        let vector_size = points[0].vector.len();
        self.qdrant.ensure_collection(vector_size).await?;
        if self.config.recreate_collection {
            self.qdrant.delete_owner_points(owner).await?;
        }

        for batch in points.chunks(UPSERT_BATCH) {
            self.qdrant.upsert_points(batch).await?;
        }

        tracing::info!(
            "indexed {} chunk(s) from {} into collection {} for {}",
            chunks.len(),
            document,
            self.qdrant.collection(),
            owner
        );

        Ok(KnowledgeBase::new(
            self.ollama.clone(),
            self.qdrant.clone(),
            self.embedding_model.clone(),
            owner,
            document,
            chunks.len(),
        ))
    }
}

/// Splits every page into word windows of `target_tokens` with `overlap_tokens` carried over.
pub fn build_chunks(
    owner: &str,
    document: &str,
    pages: &[PageText],
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let target_tokens = target_tokens.max(1);
    let step = target_tokens.saturating_sub(overlap_tokens).max(1);
    let mut chunks = Vec::new();

    for page in pages {
        let normalized = normalize_text(&page.content);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let mut start = 0;
        while start < tokens.len() {
            let end = (start + target_tokens).min(tokens.len());
            let content = tokens[start..end].join(" ");

            chunks.push(Chunk {
                id: chunk_id(owner, page.page, &content),
                owner: owner.to_string(),
                document: document.to_string(),
                page: page.page,
                content,
            });

            if end == tokens.len() {
                break;
            }
            start += step;
        }
    }

    chunks
}

/// Content-addressed point id, so re-uploading the same text overwrites instead of duplicating.
/// The owner is hashed in too: two scopes uploading the same page get separate points.
pub fn chunk_id(owner: &str, page: Option<i64>, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update([0u8]);
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

pub fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: i64, words: usize) -> PageText {
        PageText {
            page: Some(n),
            content: (1..=words)
                .map(|w| format!("word{w}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    #[test]
    fn chunking_splits_long_pages_with_overlap() {
        let chunks = build_chunks("shared", "manual.pdf", &[page(1, 120)], 50, 10);

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("word1 "));
        assert!(chunks[1].content.starts_with("word41 "));
        assert!(chunks[2].content.ends_with("word120"));
        assert!(chunks.iter().all(|c| c.page == Some(1)));
        assert!(chunks.iter().all(|c| c.document == "manual.pdf"));
        assert!(chunks.iter().all(|c| c.owner == "shared"));
    }

    #[test]
    fn short_pages_stay_single_chunk_and_empty_pages_vanish() {
        let pages = vec![
            page(1, 5),
            PageText {
                page: Some(2),
                content: "   \n\t ".to_string(),
            },
            page(3, 7),
        ];

        let chunks = build_chunks("shared", "doc", &pages, 50, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(3));
    }

    #[test]
    fn chunk_ids_are_stable_and_page_sensitive() {
        let a = chunk_id("shared", Some(1), "same text");
        assert_eq!(a, chunk_id("shared", Some(1), "same text"));
        assert_ne!(a, chunk_id("shared", Some(2), "same text"));
        assert_ne!(a, chunk_id("client:alice", Some(1), "same text"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn normalization_flattens_whitespace_and_quotes() {
        assert_eq!(
            normalize_text("\u{201C}Hello\u{201D}\u{00A0} it\u{2019}s\n\n  me"),
            "\"Hello\" it's me"
        );
    }
}
