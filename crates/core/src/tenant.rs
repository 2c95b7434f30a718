use chrono::Utc;
use serde::{Deserialize, Serialize};
use sitechat_common::{Result, SiteChatError};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// Per-tenant configuration consumed by chat orchestration and the
/// ingestion trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: Uuid,
    pub name: String,
    /// Tenant-authored system prompt; a default is used when absent.
    pub base_prompt: Option<String>,
    /// Website configured for ingestion.
    pub site_url: Option<String>,
}

pub struct TenantRegistry {
    pool: SqlitePool,
}

impl TenantRegistry {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                tenant_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_prompt TEXT,
                site_url TEXT,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to create tenants: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantConfig>> {
        let row = sqlx::query(
            "SELECT tenant_id, name, base_prompt, site_url FROM tenants WHERE tenant_id = ?",
        )
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("tenant lookup failed: {e}")))?;

        let Some(row) = row else {
            debug!(%tenant_id, "no configuration for tenant");
            return Ok(None);
        };

        let name: String = row
            .try_get("name")
            .map_err(|e| SiteChatError::Storage(format!("bad name column: {e}")))?;
        let base_prompt: Option<String> = row
            .try_get("base_prompt")
            .map_err(|e| SiteChatError::Storage(format!("bad base_prompt column: {e}")))?;
        let site_url: Option<String> = row
            .try_get("site_url")
            .map_err(|e| SiteChatError::Storage(format!("bad site_url column: {e}")))?;

        Ok(Some(TenantConfig {
            tenant_id,
            name,
            base_prompt,
            site_url,
        }))
    }

    pub async fn upsert(&self, config: &TenantConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, name, base_prompt, site_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                name = excluded.name,
                base_prompt = excluded.base_prompt,
                site_url = excluded.site_url
            "#,
        )
        .bind(config.tenant_id.to_string())
        .bind(&config.name)
        .bind(&config.base_prompt)
        .bind(&config.site_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| SiteChatError::Storage(format!("tenant upsert failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_registry() -> TenantRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database");
        TenantRegistry::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_none() {
        let registry = test_registry().await;
        assert!(registry.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let registry = test_registry().await;
        let config = TenantConfig {
            tenant_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            base_prompt: Some("You are Acme's assistant.".to_string()),
            site_url: Some("https://acme.example".to_string()),
        };

        registry.upsert(&config).await.unwrap();
        let loaded = registry.get(config.tenant_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert_eq!(loaded.base_prompt.as_deref(), Some("You are Acme's assistant."));

        // Updating overwrites in place.
        let updated = TenantConfig {
            base_prompt: None,
            ..config.clone()
        };
        registry.upsert(&updated).await.unwrap();
        let reloaded = registry.get(config.tenant_id).await.unwrap().unwrap();
        assert!(reloaded.base_prompt.is_none());
        assert_eq!(reloaded.site_url.as_deref(), Some("https://acme.example"));
    }
}
