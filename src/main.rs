use anyhow::{Context, Result};
use qdrant_client::prelude::QdrantClient;
use sitechat_api::{ApiConfig, ApiServer, AppState, AuthConfig, AuthService};
use sitechat_core::{
    ChatConfig, ChatCore, ChatService, ConversationStore, OpenAiChatModel, TenantRegistry,
};
use sitechat_knowledge::cache::{spawn_expiry_task, CacheConfig, InMemoryResponseCache, ResponseCache};
use sitechat_knowledge::db::{self, DatabaseConfig};
use sitechat_knowledge::search::Retriever;
use sitechat_knowledge::{
    Chunker, EmbedderConfig, HttpPageFetcher, HybridChunkStore, HybridSearchEngine,
    IngestionConfig, IngestionPipeline, IngestionQueue, OpenAiEmbedder, RetrievalConfig,
    StoreConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INGESTION_QUEUE_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitechat=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SiteChat API...");

    // Load environment variables
    dotenv::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:./data/sitechat.db".to_string());
    let pool = db::connect(&DatabaseConfig {
        database_url,
        ..DatabaseConfig::default()
    })
    .await?;

    let qdrant_url =
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6333".to_string());
    let qdrant = QdrantClient::from_url(&qdrant_url)
        .build()
        .context("failed to create qdrant client")?;

    // Provider clients; OPENAI_API_KEY is read from the environment when not
    // set explicitly.
    let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
    let embedder = Arc::new(OpenAiEmbedder::new(
        openai_api_key.clone(),
        EmbedderConfig::default(),
    ));

    let store = Arc::new(
        HybridChunkStore::new(qdrant, pool.clone(), StoreConfig::default())
            .await
            .context("failed to initialize knowledge store")?,
    );

    let retriever: Arc<dyn Retriever> = Arc::new(HybridSearchEngine::new(
        embedder.clone(),
        store.clone(),
        RetrievalConfig::default(),
    ));

    // Background ingestion worker
    let ingestion_config = IngestionConfig::default();
    let fetcher = Arc::new(HttpPageFetcher::new(&ingestion_config)?);
    let pipeline = Arc::new(IngestionPipeline::new(
        fetcher,
        Chunker::default(),
        embedder.clone(),
        store,
        ingestion_config,
    ));
    let ingestion_queue = Arc::new(IngestionQueue::start(pipeline, INGESTION_QUEUE_CAPACITY));

    // Response cache with periodic expiry sweep
    let cache_config = CacheConfig::default();
    let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryResponseCache::new(cache_config.ttl));
    spawn_expiry_task(cache.clone(), cache_config.sweep_interval);

    // Conversation layer
    let conversations = Arc::new(ConversationStore::new(pool.clone()).await?);
    let tenants = Arc::new(TenantRegistry::new(pool).await?);
    let chat_config = ChatConfig::default();
    let chat_model = Arc::new(OpenAiChatModel::new(openai_api_key, chat_config.clone()));
    let chat = Arc::new(ChatService::new(
        retriever.clone(),
        chat_model,
        cache,
        conversations.clone(),
        tenants.clone(),
        chat_config,
    ));

    let core = Arc::new(ChatCore::new(
        chat,
        conversations,
        tenants,
        retriever,
        ingestion_queue,
    ));

    let auth = Arc::new(AuthService::new(AuthConfig {
        jwt_secret: std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| AuthConfig::default().jwt_secret),
        ..AuthConfig::default()
    }));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(8080);
    let api_config = ApiConfig {
        port,
        ..ApiConfig::default()
    };

    let state = Arc::new(AppState { core, auth });
    let server = ApiServer::new(api_config, state);
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
