use chrono::Utc;
use sitechat_common::{ChatMessage, MessageRole, Result, SiteChatError};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Tenant-scoped conversation and message persistence.
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                last_message_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to create conversations: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(conversation_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to create messages: {e}")))?;

        Ok(Self { pool })
    }

    /// Returns a conversation id valid for this tenant: the given one if it
    /// exists and belongs to the tenant, otherwise a freshly created one.
    pub async fn get_or_create(
        &self,
        tenant_id: Uuid,
        conversation_id: Option<Uuid>,
    ) -> Result<Uuid> {
        if let Some(id) = conversation_id {
            if self.exists(tenant_id, id).await? {
                debug!(%id, %tenant_id, "existing conversation validated");
                return Ok(id);
            }
            debug!(%id, %tenant_id, "conversation unknown for tenant, creating a new one");
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, tenant_id, created_at, last_message_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to create conversation: {e}")))?;

        info!(%id, %tenant_id, "conversation created");
        Ok(id)
    }

    /// Whether the conversation exists and belongs to the tenant.
    pub async fn exists(&self, tenant_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT conversation_id FROM conversations WHERE conversation_id = ? AND tenant_id = ?",
        )
        .bind(conversation_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("conversation lookup failed: {e}")))?;
        Ok(row.is_some())
    }

    /// Persists one message and bumps the conversation's activity timestamp
    /// in a single transaction.
    pub async fn save_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to begin transaction: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id.to_string())
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to save message: {e}")))?;

        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE conversation_id = ?")
            .bind(now)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to touch conversation: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SiteChatError::Storage(format!("failed to commit message: {e}")))
    }

    /// Last `limit` messages in chronological order, formatted for prompt
    /// assembly.
    pub async fn history(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("history lookup failed: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row
                .try_get("role")
                .map_err(|e| SiteChatError::Storage(format!("bad role column: {e}")))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| SiteChatError::Storage(format!("bad content column: {e}")))?;
            let created_at = row
                .try_get("created_at")
                .map_err(|e| SiteChatError::Storage(format!("bad created_at column: {e}")))?;
            messages.push(ChatMessage {
                role: role.parse()?,
                content,
                timestamp: created_at,
            });
        }
        // Fetched newest-first; prompts want chronological order.
        messages.reverse();
        Ok(messages)
    }
}
