use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Cache identity for a generated answer: the same question inside the same
/// conversation of the same tenant resolves to the same reply while fresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub question: String,
}

/// Best-effort memoization of generated answers. A miss is always safe to
/// recompute; implementations must never be a correctness dependency.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<String>;
    async fn set(&self, key: CacheKey, value: String);
    /// Drops entries past their time-to-live.
    async fn expire(&self);
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

/// Process-local TTL cache. No cross-instance coherence.
pub struct InMemoryResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    async fn set(&self, key: CacheKey, value: String) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    async fn expire(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, remaining = entries.len(), "expired cache entries");
        }
    }
}

/// Periodic expiry sweep; spawned once at server startup.
pub fn spawn_expiry_task(
    cache: Arc<dyn ResponseCache>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            cache.expire().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(question: &str) -> CacheKey {
        CacheKey {
            tenant_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            question: question.to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let cache = InMemoryResponseCache::new(Duration::from_secs(60));
        let k = key("what are your prices?");

        assert!(cache.get(&k).await.is_none());
        cache.set(k.clone(), "see the pricing page".to_string()).await;
        assert_eq!(
            cache.get(&k).await.as_deref(),
            Some("see the pricing page")
        );
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_share_entries() {
        let cache = InMemoryResponseCache::new(Duration::from_secs(60));
        let tenant = Uuid::new_v4();
        let a = CacheKey {
            tenant_id: tenant,
            conversation_id: Uuid::new_v4(),
            question: "hello".to_string(),
        };
        let b = CacheKey {
            tenant_id: tenant,
            conversation_id: Uuid::new_v4(),
            question: "hello".to_string(),
        };

        cache.set(a.clone(), "answer a".to_string()).await;
        assert!(cache.get(&b).await.is_none());
        assert!(cache.get(&a).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryResponseCache::new(Duration::from_secs(10));
        let k = key("stale?");
        cache.set(k.clone(), "fresh".to_string()).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get(&k).await.is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&k).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_sweeps_stale_entries() {
        let cache = InMemoryResponseCache::new(Duration::from_secs(10));
        cache.set(key("one"), "1".to_string()).await;
        cache.set(key("two"), "2".to_string()).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.expire().await;

        let entries = cache.entries.read().await;
        assert!(entries.is_empty());
    }
}
