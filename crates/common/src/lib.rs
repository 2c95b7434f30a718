use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Knowledge base types

/// Positional context of a chunk inside its source document: the source URL
/// plus the ordered list of ancestor heading titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_url: String,
    pub hierarchy: Vec<String>,
}

impl ChunkMetadata {
    pub fn new(source_url: impl Into<String>, hierarchy: Vec<String>) -> Self {
        Self {
            source_url: source_url.into(),
            hierarchy,
        }
    }

    /// Human-readable section path, e.g. `Pricing > Plans`.
    pub fn section_path(&self) -> String {
        self.hierarchy.join(" > ")
    }
}

/// A chunk as returned by hybrid search, carrying both channel scores and
/// the combined score used for ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedChunk {
    pub id: Uuid,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub hybrid_score: f32,
}

/// Outcome summary of one ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub tenant_id: Uuid,
    pub source_url: String,
    pub chunks_discovered: usize,
    pub chunks_embedded: usize,
    pub chunks_stored: usize,
    pub message: String,
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum SiteChatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SiteChatError {
    /// Whether a retry with backoff can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SiteChatError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, SiteChatError>;

// API response types
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

// Conversation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = SiteChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" | "bot" => Ok(MessageRole::Assistant),
            other => Err(SiteChatError::Internal(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_path() {
        let metadata = ChunkMetadata::new(
            "https://example.com/docs",
            vec!["Pricing".to_string(), "Plans".to_string()],
        );
        assert_eq!(metadata.section_path(), "Pricing > Plans");

        let empty = ChunkMetadata::new("https://example.com", vec![]);
        assert_eq!(empty.section_path(), "");
    }

    #[test]
    fn test_api_response() {
        let response = ApiResponse::success("data");
        assert!(response.success);
        assert_eq!(response.data, Some("data"));

        let error_response: ApiResponse<String> = ApiResponse::error("error".to_string());
        assert!(!error_response.success);
        assert_eq!(error_response.error, Some("error".to_string()));
    }

    #[test]
    fn test_error_transience() {
        assert!(SiteChatError::RateLimited("429".to_string()).is_transient());
        assert!(!SiteChatError::Provider("auth".to_string()).is_transient());
        assert!(!SiteChatError::InvalidInput("empty".to_string()).is_transient());
    }

    #[test]
    fn test_message_role_round_trip() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        // Legacy rows written by earlier widget versions use "bot".
        assert_eq!(
            "bot".parse::<MessageRole>().unwrap(),
            MessageRole::Assistant
        );
        assert!("system".parse::<MessageRole>().is_err());
    }
}
