//! Knowledge base: content ingestion, hybrid retrieval, and the response cache.
//!
//! The pipeline turns a website URL into validated, embedded chunks stored
//! per tenant; the search engine later merges vector similarity and lexical
//! full-text rankings into one result list for the chat layer.

pub mod cache;
pub mod chunker;
pub mod db;
pub mod embedder;
pub mod ingestion;
pub mod jobs;
pub mod search;
pub mod store;

pub use cache::{CacheConfig, CacheKey, InMemoryResponseCache, ResponseCache};
pub use chunker::{Chunker, ChunkerConfig, RawChunk};
pub use db::DatabaseConfig;
pub use embedder::{EmbedderConfig, EmbeddingProvider, OpenAiEmbedder};
pub use ingestion::{HttpPageFetcher, IngestionConfig, IngestionPipeline, PageFetcher};
pub use jobs::{IngestionQueue, JobStatus};
pub use search::{HybridSearchEngine, RetrievalConfig, Retriever};
pub use store::{ChunkHit, EmbeddedChunk, HybridChunkStore, KnowledgeStore, StoreConfig};
