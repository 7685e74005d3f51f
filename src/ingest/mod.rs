#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunking::{ChunkingConfig, chunk_document};
use crate::confluence::ConfluenceClient;
use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord, VectorStore};
use crate::enrich::KeywordEnricher;
use crate::extract::extract_document;
use crate::llm::LlmClient;

/// A fetched document ready for the extraction pipeline
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub html: String,
    pub link: String,
}

/// One batch of documents from a paged listing
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub documents: Vec<SourceDocument>,
    /// Number of results the source reported for this batch. A batch
    /// smaller than the requested limit means the listing is exhausted.
    pub size: u32,
}

/// A paged supply of documents to ingest
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_by_id(&self, document_id: &str) -> Result<SourceDocument>;
    async fn fetch_batch(&self, start: u32, limit: u32) -> Result<SourceBatch>;
}

/// Confluence space as a document source
pub struct ConfluenceSource {
    client: ConfluenceClient,
    base_url: String,
    space_key: String,
}

impl ConfluenceSource {
    #[inline]
    pub fn new(client: ConfluenceClient, base_url: String, space_key: String) -> Self {
        Self {
            client,
            base_url,
            space_key,
        }
    }
}

#[async_trait]
impl DocumentSource for ConfluenceSource {
    async fn fetch_by_id(&self, document_id: &str) -> Result<SourceDocument> {
        let page = self.client.get_page(document_id).await?;
        let link = page.web_link(&self.base_url);
        Ok(SourceDocument {
            id: page.id,
            title: page.title,
            html: page.body.view.value,
            link,
        })
    }

    async fn fetch_batch(&self, start: u32, limit: u32) -> Result<SourceBatch> {
        let listing = self
            .client
            .get_pages_in_space(&self.space_key, start, limit)
            .await?;

        let documents = listing
            .results
            .into_iter()
            .map(|page| {
                let link = page.web_link(&self.base_url);
                SourceDocument {
                    id: page.id,
                    title: page.title,
                    html: page.body.view.value,
                    link,
                }
            })
            .collect();

        Ok(SourceBatch {
            documents,
            size: listing.size,
        })
    }
}

/// Outcome of a full-space ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: u32,
    pub chunks: u32,
    pub failures: u32,
}

/// Drives the ingestion pipeline: fetch, extract, chunk, enrich, embed,
/// store
pub struct Ingestor<S> {
    source: S,
    llm: LlmClient,
    enricher: Option<KeywordEnricher>,
    chunking: ChunkingConfig,
    page_size: u32,
}

impl<S: DocumentSource> Ingestor<S> {
    #[inline]
    pub fn new(
        source: S,
        llm: LlmClient,
        enricher: Option<KeywordEnricher>,
        chunking: ChunkingConfig,
        page_size: u32,
    ) -> Self {
        Self {
            source,
            llm,
            enricher,
            chunking,
            page_size,
        }
    }

    /// Ingest a single document by id, replacing any embeddings stored
    /// for it previously. Returns the number of chunks stored.
    #[inline]
    pub async fn ingest_document(
        &self,
        store: &mut VectorStore,
        document_id: &str,
    ) -> Result<u32> {
        let document = self
            .source
            .fetch_by_id(document_id)
            .await
            .with_context(|| format!("Failed to fetch document {document_id}"))?;

        self.ingest_fetched(store, document).await
    }

    /// Ingest every document the source lists, skipping documents that
    /// fail rather than aborting the run
    #[inline]
    pub async fn ingest_all(&self, store: &mut VectorStore) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut start = 0;

        loop {
            let batch = self
                .source
                .fetch_batch(start, self.page_size)
                .await
                .with_context(|| format!("Failed to list documents at offset {start}"))?;
            let batch_size = batch.size;

            for document in batch.documents {
                let document_id = document.id.clone();
                match self.ingest_fetched(store, document).await {
                    Ok(chunks) => {
                        report.documents += 1;
                        report.chunks += chunks;
                    }
                    Err(e) => {
                        warn!(
                            document_id,
                            error = ?e,
                            "Skipping document that failed to ingest"
                        );
                        report.failures += 1;
                    }
                }
            }

            if batch_size < self.page_size {
                break;
            }
            start += self.page_size;
        }

        info!(
            documents = report.documents,
            chunks = report.chunks,
            failures = report.failures,
            "Ingestion run finished"
        );
        Ok(report)
    }

    async fn ingest_fetched(
        &self,
        store: &mut VectorStore,
        document: SourceDocument,
    ) -> Result<u32> {
        info!(document_id = %document.id, title = %document.title, "Ingesting document");

        let extracted = extract_document(&document.title, &document.html)
            .with_context(|| format!("Failed to extract document {}", document.id))?;
        let chunks = chunk_document(&extracted, &self.chunking)
            .with_context(|| format!("Failed to chunk document {}", document.id))?;

        if chunks.is_empty() {
            info!(document_id = %document.id, "Document produced no chunks, removing stale embeddings");
            store.delete_document_embeddings(&document.id).await?;
            return Ok(0);
        }

        let mut keywords_per_chunk = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let keywords = match &self.enricher {
                Some(enricher) => enricher.extract_keywords(&chunk.content).await,
                None => Vec::new(),
            };
            keywords_per_chunk.push(keywords);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .llm
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed document {}", document.id))?;

        let created_at = Utc::now().to_rfc3339();
        let records = chunks
            .into_iter()
            .zip(embeddings)
            .zip(keywords_per_chunk)
            .map(|((chunk, vector), keywords)| EmbeddingRecord {
                id: Uuid::new_v4().to_string(),
                vector,
                metadata: ChunkMetadata {
                    doc_id: document.id.clone(),
                    doc_title: document.title.clone(),
                    link: document.link.clone(),
                    heading_path: if chunk.heading_path.is_empty() {
                        None
                    } else {
                        Some(chunk.heading_path.clone())
                    },
                    keywords,
                    content: chunk.content,
                    token_count: chunk.token_count as u32,
                    chunk_index: chunk.chunk_index as u32,
                    created_at: created_at.clone(),
                },
            })
            .collect::<Vec<_>>();
        let stored = records.len() as u32;

        // Replace rather than accumulate on re-ingestion
        store.delete_document_embeddings(&document.id).await?;
        store.store_embeddings(records).await?;

        info!(document_id = %document.id, chunks = stored, "Document ingested");
        Ok(stored)
    }
}
