use sitechat_common::{Result, SiteChatError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite connection settings shared by the lexical index and the
/// conversation tables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub enable_wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./data/sitechat.db".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            enable_wal_mode: true,
        }
    }
}

/// Opens the shared connection pool, creating the database file on first run.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let path = config.database_url.replace("sqlite:", "");
    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SiteChatError::Storage(format!("failed to create database directory: {e}"))
            })?;
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| SiteChatError::Storage(format!("invalid database URL: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    if config.enable_wal_mode {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(|e| SiteChatError::Storage(format!("failed to connect to database: {e}")))?;

    info!(url = %config.database_url, "database connection pool initialized");
    Ok(pool)
}

#[cfg(test)]
pub async fn connect_in_memory() -> SqlitePool {
    // One connection so every test statement sees the same in-memory database.
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.db");
        let config = DatabaseConfig {
            database_url: format!("sqlite:{}", db_path.display()),
            max_connections: 2,
            ..DatabaseConfig::default()
        };

        let pool = connect(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let config = DatabaseConfig {
            database_url: "not-a-url://".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(connect(&config).await.is_err());
    }
}
