//! Response cache with per-entry expiry, prefix invalidation and
//! single-flight computation on miss.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{CacheError, GatewayError};

pub use memory::MemoryCacheBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheBackend;

/// Future returned by [`CacheBackend`] operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Key-value store with TTL support. The cache depends on nothing else.
pub trait CacheBackend: Send + Sync {
    /// Returns the value unless it is absent or expired.
    fn get<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>>;

    /// Stores `value`, replacing any previous entry.
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BackendFuture<'a, ()>;

    /// Removes one entry; reports whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool>;

    /// Lists live keys starting with `prefix`.
    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<String>>;
}

/// Deterministic cache key: optional scope, endpoint, then parameters in
/// sorted order, so equivalent requests collide regardless of argument order.
///
/// Rendered as `scope:endpoint?name=value&...` with percent-encoded
/// parameter names and values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: Option<String>,
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            scope: None,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn from_params<'a, I>(endpoint: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        params
            .into_iter()
            .fold(Self::new(endpoint), |key, (name, value)| key.param(name, value))
    }

    /// Prefixes the key, e.g. with `brand:42`, so that a whole scope can be
    /// dropped through [`ResponseCache::invalidate_prefix`].
    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn render(&self) -> String {
        let mut key = String::new();
        if let Some(scope) = &self.scope {
            key.push_str(scope);
            key.push(':');
        }
        key.push_str(&self.endpoint);

        for (index, (name, value)) in self.params.iter().enumerate() {
            key.push(if index == 0 { '?' } else { '&' });
            key.push_str(&urlencoding::encode(name));
            key.push('=');
            key.push_str(&urlencoding::encode(value));
        }
        key
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that waited on another caller's computation.
    pub joins: u64,
    /// Computations started.
    pub computes: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    computes: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
        }
    }
}

type FlightOutcome = Option<Result<Value, CacheError>>;

struct CacheShared {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    inflight: Mutex<HashMap<String, watch::Receiver<FlightOutcome>>>,
    stats: StatsCounters,
}

impl CacheShared {
    fn end_flight(&self, key: &str) {
        self.inflight
            .lock()
            .expect("inflight map should not be poisoned")
            .remove(key);
    }
}

/// Removes the in-flight entry even when the computation panics.
struct FlightGuard {
    shared: Arc<CacheShared>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.shared.end_flight(&self.key);
    }
}

/// Shared response cache. Clones share the same store and in-flight table.
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<CacheShared>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                backend,
                default_ttl,
                inflight: Mutex::new(HashMap::new()),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// In-process cache with a one hour default TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), Duration::from_secs(60 * 60))
    }

    pub fn default_ttl(&self) -> Duration {
        self.shared.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot()
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.shared.backend
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.shared.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` for `ttl`, overwriting unconditionally. A zero TTL
    /// stores nothing.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        let raw = serde_json::to_string(value)?;
        self.shared.backend.set(key, raw, ttl).await
    }

    /// Returns the cached value, or runs `compute` and caches its result.
    ///
    /// Concurrent callers that miss on the same key share one run of
    /// `compute`. It runs on its own task: a caller that stops waiting does
    /// not cancel it for the others. Failures are returned to every waiter
    /// and are not cached. Backend failures degrade to a plain computation.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        if let Some(value) = self.lookup::<T>(key).await {
            StatsCounters::bump(&self.shared.stats.hits);
            tracing::debug!(key, "cache hit");
            return Ok(value);
        }
        StatsCounters::bump(&self.shared.stats.misses);

        let mut receiver = {
            let mut inflight = self
                .shared
                .inflight
                .lock()
                .expect("inflight map should not be poisoned");

            match inflight.get(key) {
                Some(receiver) => {
                    StatsCounters::bump(&self.shared.stats.joins);
                    tracing::debug!(key, "joining in-flight computation");
                    receiver.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    inflight.insert(key.to_owned(), receiver.clone());
                    StatsCounters::bump(&self.shared.stats.computes);
                    tracing::debug!(key, "cache miss; computing");
                    self.spawn_flight(key.to_owned(), ttl, compute, sender);
                    receiver
                }
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(value)) => Ok(serde_json::from_value(value)?),
            Some(Err(error)) => Err(error),
            None => Err(CacheError::ComputeAborted { key: key.to_owned() }),
        }
    }

    fn spawn_flight<T, F, Fut>(&self, key: String, ttl: Duration, compute: F, sender: watch::Sender<FlightOutcome>)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let guard = FlightGuard {
                shared: Arc::clone(&shared),
                key,
            };

            // A flight that ended between this caller's miss and the start of
            // this one may already have stored the entry.
            if let Some(json) = stored(&shared, &guard.key).await {
                StatsCounters::bump(&shared.stats.hits);
                tracing::debug!(key = %guard.key, "entry stored by a previous flight");
                drop(guard);
                let _ = sender.send(Some(Ok(json)));
                return;
            }

            let outcome = match compute().await {
                Ok(value) => match serde_json::to_value(&value) {
                    Ok(json) => {
                        store(&shared, &guard.key, &json, ttl).await;
                        Ok(json)
                    }
                    Err(error) => Err(CacheError::from(error)),
                },
                Err(error) => Err(CacheError::Compute(error)),
            };

            // The entry is stored before the flight ends, so a caller arriving
            // in between hits the store instead of starting a second compute.
            drop(guard);
            let _ = sender.send(Some(outcome));
        });
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.shared.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    tracing::warn!(key, %error, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(key, %error, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// Removes one entry; reports whether it existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.shared.backend.delete(key).await?;
        tracing::debug!(key, removed, "cache entry invalidated");
        Ok(removed)
    }

    /// Removes every entry whose key starts with `prefix`; returns how many.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let keys = self.shared.backend.scan_prefix(prefix).await?;
        let mut removed = 0;
        for key in &keys {
            if self.shared.backend.delete(key).await? {
                removed += 1;
            }
        }
        tracing::debug!(prefix, removed, "cache prefix invalidated");
        Ok(removed)
    }
}

impl Debug for ResponseCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("default_ttl", &self.shared.default_ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn stored(shared: &CacheShared, key: &str) -> Option<Value> {
    let raw = shared.backend.get(key).await.ok()??;
    serde_json::from_str(&raw).ok()
}

async fn store(shared: &CacheShared, key: &str, value: &Value, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }
    if let Err(error) = shared.backend.set(key, value.to_string(), ttl).await {
        tracing::warn!(key, %error, "cache write failed; result returned uncached");
    }
}
