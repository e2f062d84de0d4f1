//! Key-value cache with TTL and namespace-level invalidation
//!
//! Values are stored serialized so any backend (in-process, shared) can
//! hold them. Expiry is measured against an injected [`Clock`] so tests can
//! move time forward deterministically.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to (de)serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Source of monotonic time for expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Storage behind a cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Drop every entry in a namespace
    async fn invalidate_namespace(&self, namespace: &str) -> Result<(), CacheError>;
}

/// Read a typed value from a backend
pub async fn get_json<T: DeserializeOwned>(
    backend: &dyn CacheBackend,
    namespace: &str,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match backend.get(namespace, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Write a typed value to a backend
pub async fn put_json<T: Serialize>(
    backend: &dyn CacheBackend,
    namespace: &str,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value)?;
    backend.put(namespace, key, bytes, ttl).await
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache backend
pub struct MemoryCache {
    namespaces: RwLock<HashMap<String, HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Live entries in a namespace
    pub fn len(&self, namespace: &str) -> usize {
        let now = self.clock.now();
        self.namespaces
            .read()
            .get(namespace)
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        {
            let namespaces = self.namespaces.read();
            match namespaces.get(namespace).and_then(|entries| entries.get(key)) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // expired
        if let Some(entries) = self.namespaces.write().get_mut(namespace) {
            if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = self.clock.now() + ttl;
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn invalidate_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }
}
