//! Pluggable response cache (spec §4.4.5): a plain keyed TTL store, adapted
//! from `tower-resilience-cache::store::CacheStore`'s `CacheEntry<V>`/TTL
//! shape but stripped of its eviction-policy dispatch — the executor's
//! cache has no capacity bound in the spec, only a TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
struct CacheEntry {
    value: serde_json::Value,
    status: u16,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Keyed by method+url+params+data so distinct request bodies never
/// collide. Streaming responses and hedge launches with `k>0` never reach
/// this store (spec §4.4.5) — the dispatch loop only consults it for the
/// primary, non-streaming attempt.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(method: &str, url: &str, params: &serde_json::Value, data: &serde_json::Value) -> String {
        format!("{method}:{url}:{params}:{data}")
    }

    pub async fn get(&self, key: &str) -> Option<(serde_json::Value, u16)> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => Some((entry.value.clone(), entry.status)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: String, value: serde_json::Value, status: u16) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                status,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves_a_value() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = ResponseCache::key("POST", "https://x.invalid", &serde_json::Value::Null, &serde_json::json!({"a":1}));
        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), serde_json::json!({"ok": true}), 200).await;
        let (value, status) = cache.get(&key).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn expires_past_ttl() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        let key = "k".to_string();
        cache.put(key.clone(), serde_json::json!(1), 200).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&key).await.is_none());
    }
}
