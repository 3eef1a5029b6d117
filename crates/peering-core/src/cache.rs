//! IdentityCache trait abstraction for node name → multiaddress storage.
//!
//! Implementations:
//! - `InMemoryCache` - Process-local, for tests and single-run setups
//! - `JsonFileCache` (in peering-daemon) - Durable across controller restarts
//!
//! A miss and an empty value mean the same thing: "not resolved yet".

use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Lifetime of a cached identity (identities are stable for a pod's lifetime).
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(1000 * 3600);

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key/value store for resolved identities. Must be safe for concurrent use.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    /// Get a value; expired or empty entries read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with an expiration
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// All live entries
    async fn list_all(&self) -> Result<HashMap<String, String>>;
}

/// Look up a key, degrading cache failures to a miss.
pub async fn lookup(cache: &dyn IdentityCache, key: &str) -> Option<String> {
    match cache.get(key).await {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Cache lookup for {} failed, treating as miss: {}", key, e);
            None
        }
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory identity cache with per-entry expiry.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a cache from existing records with the default TTL.
    pub fn with_entries<I, K, V>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let expires_at = Instant::now() + DEFAULT_IDENTITY_TTL;
        let entries = records
            .into_iter()
            .map(|(k, v)| {
                (
                    k.into(),
                    Entry {
                        value: v.into(),
                        expires_at,
                    },
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now() && !e.value.is_empty())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn list_all(&self) -> Result<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|(_, e)| e.expires_at > now && !e.value.is_empty())
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}

// Lets a test keep a handle on the cache it hands to the engine
#[async_trait]
impl<T: IdentityCache + ?Sized> IdentityCache for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn list_all(&self) -> Result<HashMap<String, String>> {
        (**self).list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownCache;

    #[async_trait]
    impl IdentityCache for DownCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn list_all(&self) -> Result<HashMap<String, String>> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = InMemoryCache::new();

        cache.set("da-bridge-1", "/ip4/x", DEFAULT_IDENTITY_TTL).await.unwrap();

        assert_eq!(cache.get("da-bridge-1").await.unwrap().as_deref(), Some("/ip4/x"));
        assert_eq!(cache.get("da-bridge-2").await.unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_value_is_a_miss() {
        let cache = InMemoryCache::new();
        cache.set("da-bridge-1", "", DEFAULT_IDENTITY_TTL).await.unwrap();

        assert_eq!(cache.get("da-bridge-1").await.unwrap(), None);
        assert!(cache.list_all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("short", "a", Duration::from_secs(10)).await.unwrap();
        cache.set("long", "b", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        let all = cache.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("long").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let cache = InMemoryCache::with_entries([("n", "old")]);
        cache.set("n", "new", DEFAULT_IDENTITY_TTL).await.unwrap();
        assert_eq!(cache.get("n").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_lookup_degrades_to_miss() {
        assert_eq!(lookup(&DownCache, "da-bridge-1").await, None);

        let cache = InMemoryCache::with_entries([("da-bridge-1", "/dns/x")]);
        assert_eq!(lookup(&cache, "da-bridge-1").await.as_deref(), Some("/dns/x"));
    }
}
