use crate::embedder::EmbeddingProvider;
use crate::store::{ChunkHit, KnowledgeStore};
use async_trait::async_trait;
use sitechat_common::{RankedChunk, Result, SiteChatError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a vector hit to be considered.
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Maximum number of merged results returned to the caller.
    pub result_limit: usize,
    /// How many hits each channel contributes before merging.
    pub candidate_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            vector_weight: 0.5,
            lexical_weight: 0.5,
            result_limit: 5,
            candidate_limit: 10,
        }
    }
}

/// Query-time retrieval interface consumed by the chat orchestration layer.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, tenant_id: Uuid, query_text: &str) -> Result<Vec<RankedChunk>>;
}

/// Combines vector similarity and lexical full-text rankings into one
/// ranked result list.
pub struct HybridSearchEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    config: RetrievalConfig,
}

impl HybridSearchEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KnowledgeStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }
}

#[async_trait]
impl Retriever for HybridSearchEngine {
    async fn search(&self, tenant_id: Uuid, query_text: &str) -> Result<Vec<RankedChunk>> {
        let query = query_text.trim();
        if query.is_empty() {
            return Err(SiteChatError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }

        // Retrieval degraded beats retrieval absent: an embedding failure
        // drops the vector channel instead of failing the query.
        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "query embedding failed, degrading to lexical-only search");
                None
            }
        };

        let vector_leg = async {
            match &query_vector {
                Some(vector) => self
                    .store
                    .vector_search(
                        tenant_id,
                        vector,
                        self.config.similarity_threshold,
                        self.config.candidate_limit,
                    )
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let lexical_leg = self
            .store
            .lexical_search(tenant_id, query, self.config.candidate_limit);

        let (vector_result, lexical_result) = tokio::join!(vector_leg, lexical_leg);

        let vector_hits = match vector_result {
            Ok(Some(hits)) => Some(hits),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "vector search failed, continuing with lexical results");
                None
            }
        };
        let lexical_hits = match lexical_result {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "lexical search failed, continuing with vector results");
                None
            }
        };

        if vector_hits.is_none() && lexical_hits.is_none() {
            return Err(SiteChatError::Storage(
                "both search channels failed".to_string(),
            ));
        }

        let merged = merge_results(
            vector_hits.unwrap_or_default(),
            lexical_hits.unwrap_or_default(),
            &self.config,
        );
        debug!(
            results = merged.len(),
            %tenant_id,
            "hybrid search completed"
        );
        Ok(merged)
    }
}

/// Merges the two channels into one ranked list.
///
/// Results are keyed by chunk id; vector hits are inserted first so a true
/// score tie resolves in favor of the semantic match. Duplicate ids within
/// one channel keep the maximum score seen. A chunk absent from a channel
/// contributes zero from that channel.
fn merge_results(
    vector_hits: Vec<ChunkHit>,
    lexical_hits: Vec<ChunkHit>,
    config: &RetrievalConfig,
) -> Vec<RankedChunk> {
    let mut results: Vec<RankedChunk> = Vec::new();
    let mut positions: HashMap<Uuid, usize> = HashMap::new();

    for hit in vector_hits {
        if hit.text.is_empty() {
            continue;
        }
        match positions.get(&hit.id) {
            Some(&pos) => {
                results[pos].vector_score = results[pos].vector_score.max(hit.score);
            }
            None => {
                positions.insert(hit.id, results.len());
                results.push(RankedChunk {
                    id: hit.id,
                    text: hit.text,
                    metadata: hit.metadata,
                    vector_score: hit.score,
                    lexical_score: 0.0,
                    hybrid_score: 0.0,
                });
            }
        }
    }

    // Lexical ranks are engine-specific and unbounded; bring them onto the
    // same [0, 1] scale as cosine similarity before weighting.
    let max_rank = lexical_hits
        .iter()
        .map(|hit| hit.score)
        .fold(0.0f32, f32::max);

    for (pos, hit) in lexical_hits.into_iter().enumerate() {
        if hit.text.is_empty() {
            continue;
        }
        let normalized = if max_rank > 0.0 {
            (hit.score / max_rank).clamp(0.0, 1.0)
        } else {
            // Degenerate ranks: fall back to positional decay.
            1.0 / (1.0 + pos as f32)
        };
        match positions.get(&hit.id) {
            Some(&idx) => {
                results[idx].lexical_score = results[idx].lexical_score.max(normalized);
            }
            None => {
                positions.insert(hit.id, results.len());
                results.push(RankedChunk {
                    id: hit.id,
                    text: hit.text,
                    metadata: hit.metadata,
                    vector_score: 0.0,
                    lexical_score: normalized,
                    hybrid_score: 0.0,
                });
            }
        }
    }

    for result in &mut results {
        result.hybrid_score = config.vector_weight * result.vector_score
            + config.lexical_weight * result.lexical_score;
    }

    // Stable sort: insertion order breaks ties, favoring vector hits.
    results.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(config.result_limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::MockEmbeddingProvider;
    use crate::store::MockKnowledgeStore;
    use sitechat_common::ChunkMetadata;

    fn hit(id: Uuid, text: &str, score: f32) -> ChunkHit {
        ChunkHit {
            id,
            text: text.to_string(),
            metadata: ChunkMetadata::new("https://example.com", vec![]),
            score,
        }
    }

    #[test]
    fn test_vector_only_hit_scores_with_vector_weight() {
        let config = RetrievalConfig::default();
        let id = Uuid::new_v4();
        let merged = merge_results(vec![hit(id, "text", 0.9)], vec![], &config);

        assert_eq!(merged.len(), 1);
        assert!((merged[0].hybrid_score - 0.5 * 0.9).abs() < f32::EPSILON);
        assert_eq!(merged[0].lexical_score, 0.0);
    }

    #[test]
    fn test_chunk_in_both_channels_combines_scores() {
        let config = RetrievalConfig::default();
        let shared = Uuid::new_v4();
        let other = Uuid::new_v4();
        // Raw lexical ranks normalize against the max: 1.5 / 2.5 = 0.6.
        let merged = merge_results(
            vec![hit(shared, "shared", 0.8)],
            vec![hit(other, "other", 2.5), hit(shared, "shared", 1.5)],
            &config,
        );

        let combined = merged.iter().find(|r| r.id == shared).unwrap();
        assert!((combined.lexical_score - 0.6).abs() < 1e-6);
        assert!((combined.hybrid_score - 0.7).abs() < 1e-6);

        let lexical_only = merged.iter().find(|r| r.id == other).unwrap();
        assert_eq!(lexical_only.vector_score, 0.0);
        assert!((lexical_only.hybrid_score - 0.5).abs() < 1e-6);

        // 0.7 beats 0.5.
        assert_eq!(merged[0].id, shared);
    }

    #[test]
    fn test_duplicate_rows_keep_max_score_not_sum() {
        let config = RetrievalConfig::default();
        let id = Uuid::new_v4();
        let merged = merge_results(
            vec![hit(id, "text", 0.4), hit(id, "text", 0.9), hit(id, "text", 0.6)],
            vec![],
            &config,
        );

        assert_eq!(merged.len(), 1);
        assert!((merged[0].vector_score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_tie_breaks_favor_vector_hits() {
        let config = RetrievalConfig {
            vector_weight: 0.5,
            lexical_weight: 0.5,
            ..RetrievalConfig::default()
        };
        let vector_id = Uuid::new_v4();
        let lexical_id = Uuid::new_v4();
        let merged = merge_results(
            vec![hit(vector_id, "semantic", 1.0)],
            vec![hit(lexical_id, "keyword", 3.0)],
            &config,
        );

        // Both end up at hybrid 0.5; the vector hit was inserted first and
        // the stable sort keeps it ahead.
        assert_eq!(merged[0].id, vector_id);
        assert_eq!(merged[1].id, lexical_id);
        assert!((merged[0].hybrid_score - merged[1].hybrid_score).abs() < f32::EPSILON);
    }

    #[test]
    fn test_results_truncate_to_limit() {
        let config = RetrievalConfig {
            result_limit: 2,
            ..RetrievalConfig::default()
        };
        let hits: Vec<ChunkHit> = (0..6)
            .map(|i| hit(Uuid::new_v4(), "text", 0.9 - 0.1 * i as f32))
            .collect();
        let merged = merge_results(hits, vec![], &config);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].hybrid_score >= merged[1].hybrid_score);
    }

    #[test]
    fn test_empty_text_hits_are_dropped() {
        let config = RetrievalConfig::default();
        let merged = merge_results(vec![hit(Uuid::new_v4(), "", 0.9)], vec![], &config);
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_lexical_only() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(SiteChatError::Provider("embedding down".to_string())));

        let mut store = MockKnowledgeStore::new();
        let id = Uuid::new_v4();
        store.expect_lexical_search().returning(move |_, _, _| {
            Ok(vec![ChunkHit {
                id,
                text: "lexical result".to_string(),
                metadata: ChunkMetadata::new("https://example.com", vec![]),
                score: 2.0,
            }])
        });
        store.expect_vector_search().never();

        let engine = HybridSearchEngine::new(
            Arc::new(embedder),
            Arc::new(store),
            RetrievalConfig::default(),
        );
        let results = engine.search(Uuid::new_v4(), "question").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vector_score, 0.0);
        assert!(results[0].hybrid_score > 0.0);
    }

    #[tokio::test]
    async fn test_failed_vector_leg_degrades_to_lexical() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2]));

        let mut store = MockKnowledgeStore::new();
        store
            .expect_vector_search()
            .returning(|_, _, _, _| Err(SiteChatError::Storage("qdrant down".to_string())));
        let id = Uuid::new_v4();
        store.expect_lexical_search().returning(move |_, _, _| {
            Ok(vec![ChunkHit {
                id,
                text: "still here".to_string(),
                metadata: ChunkMetadata::new("https://example.com", vec![]),
                score: 1.0,
            }])
        });

        let engine = HybridSearchEngine::new(
            Arc::new(embedder),
            Arc::new(store),
            RetrievalConfig::default(),
        );
        let results = engine.search(Uuid::new_v4(), "question").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_both_channels_failing_is_an_error() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(SiteChatError::Provider("down".to_string())));

        let mut store = MockKnowledgeStore::new();
        store
            .expect_lexical_search()
            .returning(|_, _, _| Err(SiteChatError::Storage("down".to_string())));

        let engine = HybridSearchEngine::new(
            Arc::new(embedder),
            Arc::new(store),
            RetrievalConfig::default(),
        );
        assert!(engine.search(Uuid::new_v4(), "question").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_before_io() {
        let embedder = MockEmbeddingProvider::new();
        let store = MockKnowledgeStore::new();
        let engine = HybridSearchEngine::new(
            Arc::new(embedder),
            Arc::new(store),
            RetrievalConfig::default(),
        );

        let result = engine.search(Uuid::new_v4(), "   ").await;
        assert!(matches!(result, Err(SiteChatError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_no_matches_is_an_empty_list_not_an_error() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2]));

        let mut store = MockKnowledgeStore::new();
        store.expect_vector_search().returning(|_, _, _, _| Ok(vec![]));
        store.expect_lexical_search().returning(|_, _, _| Ok(vec![]));

        let engine = HybridSearchEngine::new(
            Arc::new(embedder),
            Arc::new(store),
            RetrievalConfig::default(),
        );
        let results = engine.search(Uuid::new_v4(), "nothing here").await.unwrap();
        assert!(results.is_empty());
    }
}
