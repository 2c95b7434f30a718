use async_trait::async_trait;
use qdrant_client::prelude::*;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
    r#match::MatchValue, value::Kind, vectors_config::Config, with_payload_selector::SelectorOptions,
    Condition, CreateCollection, Distance, FieldCondition, Filter, ListValue, Match, PointId,
    PointStruct, PointsSelector, SearchPoints, Value, Vector, VectorParams, Vectors, VectorsConfig,
    WithPayloadSelector,
};
use sitechat_common::{ChunkMetadata, Result, SiteChatError};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub collection_name: String,
    /// Vector dimension the collection is created with; must match the
    /// embedding model for comparisons to be valid.
    pub vector_dimension: u64,
    /// Rows written per round-trip; bounds transaction and payload size.
    pub insert_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection_name: "sitechat_chunks".to_string(),
            vector_dimension: 1536,
            insert_batch_size: 100,
        }
    }
}

/// A validated chunk carrying its embedding, ready for storage.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A stored chunk returned by one search channel with that channel's raw
/// score (cosine similarity for vectors, negated bm25 rank for lexical).
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: Uuid,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// Tenant-scoped persistence and retrieval for knowledge chunks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Inserts chunks in batches; returns how many were stored. Batches that
    /// fail are skipped and logged, earlier batches are not rolled back.
    async fn upsert_chunks(&self, tenant_id: Uuid, chunks: Vec<EmbeddedChunk>) -> Result<usize>;

    /// Removes every chunk previously ingested for this tenant + URL.
    async fn delete_by_source(&self, tenant_id: Uuid, source_url: &str) -> Result<()>;

    /// Similarity search over stored vectors, computed server-side, restricted
    /// to hits at or above `threshold`, descending.
    async fn vector_search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    /// Ranked full-text search, descending raw rank (higher is better).
    async fn lexical_search(
        &self,
        tenant_id: Uuid,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;
}

/// Production store: qdrant holds the vectors, SQLite FTS5 holds the
/// full-text index. Both sides are written and deleted in tandem so
/// re-ingestion replaces a URL's chunks in every representation.
pub struct HybridChunkStore {
    vector: VectorIndex,
    lexical: LexicalIndex,
    config: StoreConfig,
}

impl HybridChunkStore {
    pub async fn new(qdrant: QdrantClient, pool: SqlitePool, config: StoreConfig) -> Result<Self> {
        let vector = VectorIndex::new(qdrant, &config).await?;
        let lexical = LexicalIndex::new(pool).await?;
        Ok(Self {
            vector,
            lexical,
            config,
        })
    }
}

#[async_trait]
impl KnowledgeStore for HybridChunkStore {
    async fn upsert_chunks(&self, tenant_id: Uuid, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut stored = 0usize;
        let total = chunks.len();
        for batch in chunks.chunks(self.config.insert_batch_size) {
            let rows: Vec<(Uuid, &EmbeddedChunk)> =
                batch.iter().map(|chunk| (Uuid::new_v4(), chunk)).collect();

            if let Err(e) = self.vector.upsert(tenant_id, &rows).await {
                warn!(batch = rows.len(), error = %e, "vector upsert failed for batch, skipping");
                continue;
            }
            if let Err(e) = self.lexical.insert(tenant_id, &rows).await {
                // Vectors for this batch are already live; the chunks stay
                // searchable semantically but miss the lexical channel.
                error!(batch = rows.len(), error = %e, "lexical insert failed after vector upsert");
            }
            stored += rows.len();
        }

        info!(stored, total, %tenant_id, "chunk upsert completed");
        Ok(stored)
    }

    async fn delete_by_source(&self, tenant_id: Uuid, source_url: &str) -> Result<()> {
        self.vector.delete_by_source(tenant_id, source_url).await?;
        self.lexical.delete_by_source(tenant_id, source_url).await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        self.vector
            .search(tenant_id, query_vector, threshold, limit)
            .await
    }

    async fn lexical_search(
        &self,
        tenant_id: Uuid,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        self.lexical.search(tenant_id, query_text, limit).await
    }
}

// Vector side (qdrant)

struct VectorIndex {
    client: QdrantClient,
    collection_name: String,
}

impl VectorIndex {
    async fn new(client: QdrantClient, config: &StoreConfig) -> Result<Self> {
        let index = Self {
            client,
            collection_name: config.collection_name.clone(),
        };
        index.ensure_collection(config.vector_dimension).await?;
        Ok(index)
    }

    async fn ensure_collection(&self, dimension: u64) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to list collections: {e}")))?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection_name);

        if !exists {
            info!(collection = %self.collection_name, "creating qdrant collection");
            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.collection_name.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(Config::Params(VectorParams {
                            size: dimension,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| SiteChatError::Storage(format!("failed to create collection: {e}")))?;
        }
        Ok(())
    }

    async fn upsert(&self, tenant_id: Uuid, rows: &[(Uuid, &EmbeddedChunk)]) -> Result<()> {
        let points: Vec<PointStruct> = rows
            .iter()
            .map(|(id, chunk)| PointStruct {
                id: Some(point_id(*id)),
                payload: chunk_payload(tenant_id, chunk),
                vectors: Some(Vectors {
                    vectors_options: Some(
                        qdrant_client::qdrant::vectors::VectorsOptions::Vector(Vector {
                            data: chunk.embedding.clone(),
                            ..Default::default()
                        }),
                    ),
                }),
            })
            .collect();

        self.client
            .upsert_points_blocking(&self.collection_name, None, points, None)
            .await
            .map_err(|e| SiteChatError::Storage(format!("vector upsert failed: {e}")))?;
        Ok(())
    }

    async fn delete_by_source(&self, tenant_id: Uuid, source_url: &str) -> Result<()> {
        let selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Filter(source_filter(
                tenant_id, source_url,
            ))),
        };
        self.client
            .delete_points(&self.collection_name, None, &selector, None)
            .await
            .map_err(|e| SiteChatError::Storage(format!("vector delete failed: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection_name.clone(),
                vector: query_vector.to_vec(),
                filter: Some(tenant_filter(tenant_id)),
                limit: limit as u64,
                score_threshold: Some(threshold),
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                ..Default::default()
            })
            .await
            .map_err(|e| SiteChatError::Storage(format!("vector search failed: {e}")))?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let Some(id) = scored_point_id(&point.id) else {
                warn!("dropping vector hit without a parsable point id");
                continue;
            };
            let Some(text) = payload_str(&point.payload, "content") else {
                warn!(%id, "dropping vector hit without content payload");
                continue;
            };
            hits.push(ChunkHit {
                id,
                text,
                metadata: ChunkMetadata::new(
                    payload_str(&point.payload, "source_url").unwrap_or_default(),
                    payload_str_list(&point.payload, "hierarchy"),
                ),
                score: point.score,
            });
        }
        debug!(hits = hits.len(), %tenant_id, "vector search completed");
        Ok(hits)
    }
}

fn point_id(id: Uuid) -> PointId {
    PointId {
        point_id_options: Some(PointIdOptions::Uuid(id.to_string())),
    }
}

fn scored_point_id(id: &Option<PointId>) -> Option<Uuid> {
    match id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(raw) => Uuid::parse_str(raw).ok(),
        PointIdOptions::Num(_) => None,
    }
}

fn str_value(s: impl Into<String>) -> Value {
    Value {
        kind: Some(Kind::StringValue(s.into())),
    }
}

fn chunk_payload(tenant_id: Uuid, chunk: &EmbeddedChunk) -> HashMap<String, Value> {
    let hierarchy = Value {
        kind: Some(Kind::ListValue(ListValue {
            values: chunk
                .metadata
                .hierarchy
                .iter()
                .map(|h| str_value(h.clone()))
                .collect(),
        })),
    };
    HashMap::from([
        ("tenant_id".to_string(), str_value(tenant_id.to_string())),
        ("content".to_string(), str_value(chunk.text.clone())),
        (
            "source_url".to_string(),
            str_value(chunk.metadata.source_url.clone()),
        ),
        ("hierarchy".to_string(), hierarchy),
    ])
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

fn payload_str_list(payload: &HashMap<String, Value>, key: &str) -> Vec<String> {
    let Some(Kind::ListValue(list)) = payload.get(key).and_then(|v| v.kind.as_ref()) else {
        return Vec::new();
    };
    list.values
        .iter()
        .filter_map(|v| match v.kind.as_ref() {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn keyword_condition(key: &str, value: String) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keyword(value)),
            }),
            ..Default::default()
        })),
    }
}

fn tenant_filter(tenant_id: Uuid) -> Filter {
    Filter {
        must: vec![keyword_condition("tenant_id", tenant_id.to_string())],
        ..Default::default()
    }
}

fn source_filter(tenant_id: Uuid, source_url: &str) -> Filter {
    Filter {
        must: vec![
            keyword_condition("tenant_id", tenant_id.to_string()),
            keyword_condition("source_url", source_url.to_string()),
        ],
        ..Default::default()
    }
}

// Lexical side (SQLite FTS5)

struct LexicalIndex {
    pool: SqlitePool,
}

impl LexicalIndex {
    async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
                content,
                chunk_id UNINDEXED,
                tenant_id UNINDEXED,
                source_url UNINDEXED,
                hierarchy UNINDEXED
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to create lexical index: {e}")))?;
        Ok(Self { pool })
    }

    async fn insert(&self, tenant_id: Uuid, rows: &[(Uuid, &EmbeddedChunk)]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to begin transaction: {e}")))?;

        for (id, chunk) in rows {
            let hierarchy = serde_json::to_string(&chunk.metadata.hierarchy)
                .map_err(|e| SiteChatError::Internal(format!("hierarchy serialization: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO chunk_fts (content, chunk_id, tenant_id, source_url, hierarchy)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.text)
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .bind(&chunk.metadata.source_url)
            .bind(hierarchy)
            .execute(&mut *tx)
            .await
            .map_err(|e| SiteChatError::Storage(format!("lexical insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to commit lexical batch: {e}")))
    }

    async fn delete_by_source(&self, tenant_id: Uuid, source_url: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_fts WHERE tenant_id = ? AND source_url = ?")
            .bind(tenant_id.to_string())
            .bind(source_url)
            .execute(&self.pool)
            .await
            .map_err(|e| SiteChatError::Storage(format!("lexical delete failed: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: Uuid,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let Some(match_query) = build_match_query(query_text) else {
            return Ok(Vec::new());
        };

        // bm25() assigns numerically lower values to better matches; negate
        // so higher is better like the vector channel.
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, content, source_url, hierarchy, -bm25(chunk_fts) AS rank
            FROM chunk_fts
            WHERE chunk_fts MATCH ? AND tenant_id = ?
            ORDER BY rank DESC
            LIMIT ?
            "#,
        )
        .bind(&match_query)
        .bind(tenant_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("lexical search failed: {e}")))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_id: String = row
                .try_get("chunk_id")
                .map_err(|e| SiteChatError::Storage(format!("bad chunk_id column: {e}")))?;
            let Ok(id) = Uuid::parse_str(&raw_id) else {
                warn!(raw_id, "dropping lexical hit with unparsable chunk id");
                continue;
            };
            let text: String = row
                .try_get("content")
                .map_err(|e| SiteChatError::Storage(format!("bad content column: {e}")))?;
            let source_url: String = row
                .try_get("source_url")
                .map_err(|e| SiteChatError::Storage(format!("bad source_url column: {e}")))?;
            let hierarchy_raw: String = row
                .try_get("hierarchy")
                .map_err(|e| SiteChatError::Storage(format!("bad hierarchy column: {e}")))?;
            let hierarchy: Vec<String> = serde_json::from_str(&hierarchy_raw).unwrap_or_default();
            let rank: f64 = row
                .try_get("rank")
                .map_err(|e| SiteChatError::Storage(format!("bad rank column: {e}")))?;

            hits.push(ChunkHit {
                id,
                text,
                metadata: ChunkMetadata::new(source_url, hierarchy),
                score: rank as f32,
            });
        }
        debug!(hits = hits.len(), %tenant_id, "lexical search completed");
        Ok(hits)
    }
}

/// Quotes each query term so user text can never inject FTS5 operators.
/// Terms are OR-ed: any overlap should surface a candidate for ranking.
fn build_match_query(query_text: &str) -> Option<String> {
    let terms: Vec<String> = query_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
