use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key-value store mapping token ids to member uuids.
///
/// Presence of a token id is what makes a signed token usable; deleting it
/// revokes the token before its natural expiry.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisTokenCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisTokenCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set token id: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get token id: {}", e))
    }

    async fn del(&self, key: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete token id: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process cache with TTL expiry, for tests and local runs.
pub struct MockTokenCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    fail_writes: AtomicBool,
}

impl Default for MockTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|(_, exp)| *exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenCache for MockTokenCache {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock cache write failure"));
        }
        let expires = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?;
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<u64, anyhow::Error> {
        let removed = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .remove(key);
        Ok(match removed {
            Some((_, expires)) if expires > Instant::now() => 1,
            _ => 0,
        })
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn del_reports_removed_count() {
        let cache = MockTokenCache::new();
        cache.set("abc", "member", 60).await.unwrap();
        assert_eq!(cache.get("abc").await.unwrap().as_deref(), Some("member"));
        assert_eq!(cache.del("abc").await.unwrap(), 1);
        assert_eq!(cache.del("abc").await.unwrap(), 0);
        assert_eq!(cache.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_never_visible() {
        let cache = MockTokenCache::new();
        cache.set("abc", "member", 0).await.unwrap();
        assert_eq!(cache.get("abc").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn forced_write_failure() {
        let cache = MockTokenCache::new();
        cache.fail_writes(true);
        assert!(cache.set("abc", "member", 60).await.is_err());
        cache.fail_writes(false);
        assert!(cache.set("abc", "member", 60).await.is_ok());
    }
}
