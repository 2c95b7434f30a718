use crate::chunker::{Chunker, RawChunk};
use crate::embedder::EmbeddingProvider;
use crate::store::{EmbeddedChunk, KnowledgeStore};
use async_trait::async_trait;
use sitechat_common::{IngestionReport, Result, SiteChatError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; SiteChatBot/1.0; +https://sitechat.dev/bot)";

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Chunks per embedding request.
    pub embed_batch_size: usize,
    /// Pause between embedding batches, respecting provider rate limits.
    pub batch_delay: Duration,
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 20,
            batch_delay: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(15),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Retrieves the raw HTML of a page.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP fetcher with a bounded timeout and an identifying user agent.
/// Non-2xx statuses and network errors are reported identically.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(config: &IngestionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SiteChatError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SiteChatError::Fetch(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteChatError::Fetch(format!(
                "request to {url} returned status {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SiteChatError::Fetch(format!("failed to read body from {url}: {e}")))
    }
}

/// Converts one URL into stored, searchable chunks for a tenant.
///
/// Re-running for the same (tenant, url) is the update path: existing chunks
/// are deleted up front, so search never sees a mix of old and new content.
pub struct IngestionPipeline {
    fetcher: Arc<dyn PageFetcher>,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KnowledgeStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            fetcher,
            chunker,
            embedder,
            store,
            config,
        }
    }

    pub async fn ingest(&self, tenant_id: Uuid, url: &str) -> Result<IngestionReport> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SiteChatError::InvalidInput(format!(
                "not an ingestable URL: {url}"
            )));
        }

        info!(%tenant_id, url, "starting ingestion");

        // Stale chunks go first; a failure here (nothing ingested yet, store
        // hiccup) must not block a fresh ingest.
        if let Err(e) = self.store.delete_by_source(tenant_id, url).await {
            warn!(error = %e, url, "failed to delete previous chunks, continuing");
        }

        let html = self.fetcher.fetch(url).await?;
        info!(bytes = html.len(), url, "page fetched");

        let chunks = self.chunker.chunk(&html, url);
        let discovered = chunks.len();
        if chunks.is_empty() {
            info!(url, "no extractable content, nothing to store");
            return Ok(IngestionReport {
                tenant_id,
                source_url: url.to_string(),
                chunks_discovered: 0,
                chunks_embedded: 0,
                chunks_stored: 0,
                message: "page processed, no relevant content extracted".to_string(),
            });
        }

        let embedded = self.embed_chunks(chunks).await;
        if embedded.is_empty() {
            return Err(SiteChatError::EmbeddingFailed(format!(
                "extracted {discovered} chunks but none could be embedded"
            )));
        }
        let embedded_count = embedded.len();

        let stored = self.store.upsert_chunks(tenant_id, embedded).await?;
        let message = if stored < embedded_count {
            format!("ingestion partially complete: {stored} of {embedded_count} chunks stored")
        } else {
            format!("ingestion complete: {stored} chunks stored")
        };
        info!(%tenant_id, url, discovered, embedded_count, stored, "ingestion finished");

        Ok(IngestionReport {
            tenant_id,
            source_url: url.to_string(),
            chunks_discovered: discovered,
            chunks_embedded: embedded_count,
            chunks_stored: stored,
            message,
        })
    }

    /// Embeds chunks batch by batch. A failed batch skips its chunks rather
    /// than aborting siblings; chunks without an embedding are excluded from
    /// storage so every stored chunk has a matching vector.
    async fn embed_chunks(&self, chunks: Vec<RawChunk>) -> Vec<EmbeddedChunk> {
        let mut embedded = Vec::with_capacity(chunks.len());
        let total_batches = chunks.len().div_ceil(self.config.embed_batch_size);

        for (batch_idx, batch) in chunks.chunks(self.config.embed_batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        match vector {
                            Some(embedding) => embedded.push(EmbeddedChunk {
                                text: chunk.text.clone(),
                                embedding,
                                metadata: chunk.metadata.clone(),
                            }),
                            None => {
                                warn!("chunk produced no embedding, excluding from storage");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        batch = batch_idx + 1,
                        total_batches,
                        error = %e,
                        "embedding batch failed, skipping its chunks"
                    );
                }
            }

            if batch_idx + 1 < total_batches && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
        embedded
    }
}
