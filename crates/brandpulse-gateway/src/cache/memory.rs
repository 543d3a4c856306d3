use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{BackendFuture, CacheBackend};

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Smallest map size that triggers a sweep of expired entries on write.
const MIN_SWEEP_LEN: usize = 64;

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    /// Map size at which the next write sweeps expired entries.
    sweep_at: usize,
}

impl Entries {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP_LEN);
        before - self.map.len()
    }
}

/// Thread-safe in-process cache store.
///
/// Expired entries are invisible to reads. A read that finds one removes it,
/// and writes sweep the whole map each time it doubles, so keys that are never
/// read again do not accumulate. [`purge_expired`](Self::purge_expired) sweeps
/// on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.map.clear();
    }

    /// Drops expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.entries.write().await.purge(Instant::now())
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move {
            let now = Instant::now();
            {
                let entries = self.entries.read().await;
                match entries.map.get(key) {
                    None => return Ok(None),
                    Some(entry) if entry.is_live(now) => return Ok(Some(entry.body.clone())),
                    Some(_) => {}
                }
            }

            let mut entries = self.entries.write().await;
            if entries.map.get(key).is_some_and(|entry| !entry.is_live(now)) {
                entries.map.remove(key);
            }
            Ok(None)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let entry = CacheEntry {
                body: value,
                expires_at: Instant::now() + ttl,
            };
            let mut entries = self.entries.write().await;
            if entries.map.len() >= entries.sweep_at {
                entries.purge(Instant::now());
            }
            entries.map.insert(key.to_owned(), entry);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let now = Instant::now();
            let removed = self.entries.write().await.map.remove(key);
            Ok(removed.is_some_and(|entry| entry.is_live(now)))
        })
    }

    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move {
            let now = Instant::now();
            let entries = self.entries.read().await;
            let mut keys = entries
                .map
                .iter()
                .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>();
            keys.sort();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_operations() {
        let store = MemoryCacheBackend::new();

        assert_eq!(store.get("key1").await, Ok(None));

        store
            .set("key1", String::from("value1"), Duration::from_secs(1))
            .await
            .expect("set");
        assert_eq!(store.get("key1").await, Ok(Some(String::from("value1"))));

        assert_eq!(store.delete("key1").await, Ok(true));
        assert_eq!(store.delete("key1").await, Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_hidden_then_purged() {
        let store = MemoryCacheBackend::new();
        store
            .set("short", String::from("a"), Duration::from_millis(100))
            .await
            .expect("set");
        store
            .set("long", String::from("b"), Duration::from_secs(60))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(store.scan_prefix("").await, Ok(vec![String::from("long")]));
        assert_eq!(store.len().await, 2);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_an_expired_key_removes_it() {
        let store = MemoryCacheBackend::new();
        store
            .set("short", String::from("a"), Duration::from_millis(100))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(store.get("short").await, Ok(None));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_keys_that_are_never_read_again() {
        let store = MemoryCacheBackend::new();
        for index in 0..MIN_SWEEP_LEN {
            store
                .set(&format!("sentiment?text={index}"), String::from("null"), Duration::from_secs(1))
                .await
                .expect("set");
        }
        assert_eq!(store.len().await, MIN_SWEEP_LEN);

        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .set("fresh", String::from("{}"), Duration::from_secs(60))
            .await
            .expect("set");

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("fresh").await, Ok(Some(String::from("{}"))));
    }

    #[tokio::test]
    async fn scan_matches_prefix_only() {
        let store = MemoryCacheBackend::new();
        for key in ["brand:4:traffic", "brand:42:traffic", "brand:42:seo", "other"] {
            store
                .set(key, String::from("{}"), Duration::from_secs(60))
                .await
                .expect("set");
        }

        assert_eq!(
            store.scan_prefix("brand:42:").await,
            Ok(vec![String::from("brand:42:seo"), String::from("brand:42:traffic")])
        );

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
