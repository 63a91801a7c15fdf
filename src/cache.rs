//! Key/value store shared by forwarding resolvers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// A cache backend. Implementations must tolerate concurrent access from
/// in-flight requests; no ordering is guaranteed across keys.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored value, or `None` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Option<Value>;

    async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }

    /// Stores `value`. With a `ttl`, the entry expires that long after the write.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    async fn clear_all(&self);
}

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Process-local [`Cache`] backed by a hash map.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn clear_all(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stores_and_clears_values() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get_or("a", json!(0)).await, json!(0));

        cache.set("a", json!({"id": 1}), None).await;
        assert_eq!(cache.get("a").await, Some(json!({"id": 1})));

        cache.clear_all().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_evicted() {
        let cache = InMemoryCache::new();
        cache.set("gone", json!(1), Some(Duration::ZERO)).await;
        cache.set("kept", json!(2), Some(Duration::from_secs(60))).await;

        assert_eq!(cache.get("gone").await, None);
        assert_eq!(cache.get("kept").await, Some(json!(2)));
        assert_eq!(cache.len().await, 1);
    }
}
