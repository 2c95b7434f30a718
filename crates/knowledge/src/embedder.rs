use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::CreateEmbeddingRequestArgs,
    Client,
};
use async_trait::async_trait;
use sitechat_common::{Result, SiteChatError};
use std::time::Duration;
use tracing::{debug, warn};

const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub model: String,
    /// Expected vector dimension for the configured model.
    pub dimension: usize,
    /// Attempts per provider call, including the first.
    pub max_attempts: usize,
    /// Base delay for exponential backoff, doubled per retry.
    pub retry_base: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: EMBEDDING_MODEL.to_string(),
            dimension: EMBEDDING_DIMENSION,
            max_attempts: 3,
            retry_base: Duration::from_secs(1),
        }
    }
}

/// Converts text into fixed-length vectors.
///
/// `embed_batch` preserves positional correspondence with its input; entries
/// that cannot be embedded come back as `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;
}

/// Hosted embedding client backed by the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    config: EmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(api_key: Option<String>, config: EmbedderConfig) -> Self {
        let openai_config = if let Some(key) = api_key {
            OpenAIConfig::new().with_api_key(key)
        } else {
            // Falls back to the OPENAI_API_KEY environment variable.
            OpenAIConfig::new()
        };

        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    async fn request_with_retry(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = inputs.len();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.config.model)
                .input(inputs.clone())
                .build()
                .map_err(|e| SiteChatError::Provider(format!("invalid embedding request: {e}")))?;

            match self.client.embeddings().create(request).await {
                Ok(response) => {
                    // A count mismatch means alignment is unknowable; failing
                    // the whole batch beats mis-assigning vectors to chunks.
                    if response.data.len() != expected {
                        return Err(SiteChatError::EmbeddingFailed(format!(
                            "provider returned {} embeddings for {} inputs",
                            response.data.len(),
                            expected
                        )));
                    }
                    let mut data = response.data;
                    data.sort_by_key(|entry| entry.index);
                    for entry in &data {
                        if entry.embedding.len() != self.config.dimension {
                            warn!(
                                got = entry.embedding.len(),
                                expected = self.config.dimension,
                                "embedding dimension differs from configured model dimension"
                            );
                        }
                    }
                    return Ok(data.into_iter().map(|entry| entry.embedding).collect());
                }
                Err(err) => {
                    let classified = classify_error(err);
                    if classified.is_transient() && attempt < self.config.max_attempts {
                        let delay = self.config.retry_base * 2u32.pow((attempt - 1) as u32);
                        warn!(
                            attempt,
                            max_attempts = self.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "embedding call rate limited, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(classified);
                }
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = normalize(text);
        if input.is_empty() {
            return Err(SiteChatError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        debug!(chars = input.len(), "requesting single embedding");
        let mut vectors = self.request_with_retry(vec![input]).await?;
        vectors
            .pop()
            .ok_or_else(|| SiteChatError::EmbeddingFailed("provider returned no data".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Entries that normalize to nothing are local failures; they are
        // never sent to the provider.
        let inputs: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter_map(|(idx, text)| {
                let normalized = normalize(text);
                (!normalized.is_empty()).then_some((idx, normalized))
            })
            .collect();

        if inputs.is_empty() {
            return Ok(results);
        }

        let payload: Vec<String> = inputs.iter().map(|(_, text)| text.clone()).collect();
        debug!(batch = payload.len(), "requesting embedding batch");
        let vectors = self.request_with_retry(payload).await?;

        for ((idx, _), vector) in inputs.into_iter().zip(vectors) {
            results[idx] = Some(vector);
        }
        Ok(results)
    }
}

/// Collapses whitespace and strips newlines before the provider call.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify_error(err: OpenAIError) -> SiteChatError {
    match err {
        OpenAIError::ApiError(api_err) => {
            let message = api_err.message.to_lowercase();
            let is_rate_limit =
                message.contains("rate limit") || message.contains("too many requests");
            if is_rate_limit {
                SiteChatError::RateLimited(api_err.message)
            } else {
                SiteChatError::Provider(api_err.message)
            }
        }
        // Transport-level failures are worth one more try.
        OpenAIError::Reqwest(e) => SiteChatError::RateLimited(format!("transport error: {e}")),
        other => SiteChatError::Provider(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  hello \n\n  world \t"), "hello world");
        assert_eq!(normalize("\n\n"), "");
        assert_eq!(normalize("single"), "single");
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_input_locally() {
        // No API key and no network needed: the empty input is rejected
        // before any provider call.
        let embedder = OpenAiEmbedder::new(Some("test-key".to_string()), EmbedderConfig::default());
        let result = embedder.embed("   \n  ").await;
        assert!(matches!(result, Err(SiteChatError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_embed_batch_skips_empty_entries_locally() {
        let embedder = OpenAiEmbedder::new(Some("test-key".to_string()), EmbedderConfig::default());
        let texts = vec!["".to_string(), "  \n ".to_string()];
        let results = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(results, vec![None, None]);
    }

    #[test]
    fn test_default_config_matches_model() {
        let config = EmbedderConfig::default();
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.dimension, 1536);
        assert_eq!(config.max_attempts, 3);
    }
}
