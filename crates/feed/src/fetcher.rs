//! Cache-aside reads over a `KvStore`.

use std::future::Future;
use std::sync::Arc;

use common::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{CacheEntry, KvStore};

/// A decoded cache hit and its age at lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub age_ms: i64,
}

#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Fresh, decodable entry for `key`, if any.
    ///
    /// Read failures and undecodable payloads are reported as misses.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str, max_age_ms: i64) -> Option<Cached<T>> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let age_ms = entry.age_ms(self.clock.now_ms());
        if age_ms > max_age_ms {
            debug!("Cache stale for {} (age {}ms > {}ms)", key, age_ms, max_age_ms);
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(Cached { value, age_ms }),
            Err(e) => {
                warn!("Cache entry for {} could not be decoded: {}", key, e);
                None
            }
        }
    }

    /// Store `value` stamped with the current time. Failures are logged.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, metadata: serde_json::Value) -> bool {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cache encode failed for {}: {}", key, e);
                return false;
            }
        };
        let entry = CacheEntry::new(key, payload, self.clock.now_ms()).with_metadata(metadata);
        match self.store.set(entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Serve a fresh entry, or run `producer`, store its value and return it.
    ///
    /// Producer errors propagate; store errors never do.
    pub async fn fetch_with_cache<T, F, Fut>(&self, key: &str, max_age_ms: i64, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.lookup::<T>(key, max_age_ms).await {
            debug!("Cache hit for {} (age {}ms)", key, hit.age_ms);
            return Ok(hit.value);
        }

        debug!("Cache miss for {}", key);
        let value = producer().await?;
        self.put(key, &value, serde_json::Value::Null).await;
        Ok(value)
    }

    /// Produce and store a new value; failures are logged and swallowed.
    pub async fn refresh<T, F, Fut>(&self, key: &str, producer: F) -> Option<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match producer().await {
            Ok(value) => {
                self.put(key, &value, serde_json::Value::Null).await;
                Some(value)
            }
            Err(e) => {
                warn!("Background refresh of {} failed: {}", key, e);
                None
            }
        }
    }

    /// Like `fetch_with_cache`, but a hit older than `refresh_after_ms` also
    /// schedules a background refresh. The refresh outlives the caller.
    pub async fn fetch_with_revalidate<T, F, Fut>(
        &self,
        key: &str,
        max_age_ms: i64,
        refresh_after_ms: i64,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(hit) = self.lookup::<T>(key, max_age_ms).await {
            if hit.age_ms > refresh_after_ms {
                debug!("Revalidating {} in background (age {}ms)", key, hit.age_ms);
                let this = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    this.refresh(&key, producer).await;
                });
            } else {
                debug!("Cache hit for {} (age {}ms)", key, hit.age_ms);
            }
            return Ok(hit.value);
        }

        debug!("Cache miss for {}", key);
        let value = producer().await?;
        self.put(key, &value, serde_json::Value::Null).await;
        Ok(value)
    }
}
