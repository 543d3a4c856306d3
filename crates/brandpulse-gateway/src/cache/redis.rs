use std::fmt::{Debug, Formatter};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{BackendFuture, CacheBackend};
use crate::error::CacheError;

/// Redis-backed cache store. Keys are stored under an optional namespace.
#[derive(Clone)]
pub struct RedisCacheBackend {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisCacheBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        tracing::info!(redis_url, "connecting redis cache backend");
        let client = redis::Client::open(redis_url).map_err(backend_error)?;
        let connection = ConnectionManager::new(client).await.map_err(backend_error)?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            namespace: String::new(),
        }
    }

    /// Prepends `namespace` to every key, e.g. `brandpulse:`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }
}

impl Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("namespace", &self.namespace)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl CacheBackend for RedisCacheBackend {
    fn get<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .get::<_, Option<String>>(self.full_key(key))
                .await
                .map_err(backend_error)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            connection
                .pset_ex::<_, _, ()>(self.full_key(key), value, millis)
                .await
                .map_err(backend_error)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let removed = connection
                .del::<_, i64>(self.full_key(key))
                .await
                .map_err(backend_error)?;
            Ok(removed > 0)
        })
    }

    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));

            let mut keys = Vec::new();
            {
                let mut iter = connection
                    .scan_match::<_, String>(pattern)
                    .await
                    .map_err(backend_error)?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
            }

            Ok(keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&self.namespace).map(str::to_owned))
                .collect())
        })
    }
}

fn backend_error(error: redis::RedisError) -> CacheError {
    CacheError::Backend(error.to_string())
}

/// Escapes redis glob metacharacters so the prefix matches literally.
fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
