//! Two-tier cache: process-local LRU in front of a shared KV tier.
//!
//! Read order is local → shared → miss. Writes land in both tiers with the
//! TTL implied by the key class. If the shared tier is unreachable the
//! cache degrades silently to local-only and bumps a telemetry counter;
//! it never fails the caller.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::collab::SharedKv;
use crate::config::CacheConfig;

/// `H(class ‖ canonical(params))`. `params` must already be in a
/// deterministic order (callers build it via [`CacheKey::build`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub class: String,
    pub hash: String,
}

impl CacheKey {
    pub fn build(class: &str, params: &[(&str, &str)]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(class.as_bytes());
        for (name, value) in params {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        CacheKey { class: class.to_string(), hash: hex::encode(hasher.finalize()) }
    }

    fn storage_key(&self) -> String {
        format!("{}:{}", self.class, self.hash)
    }
}

#[derive(Default)]
pub struct CacheMetrics {
    pub local_hits: AtomicU64,
    pub shared_hits: AtomicU64,
    pub misses: AtomicU64,
    pub shared_degradations: AtomicU64,
}

pub struct CacheLayer {
    local: Mutex<LruCache<String, (Vec<u8>, std::time::Instant)>>,
    shared: Arc<dyn SharedKv>,
    class_ttls: std::collections::HashMap<String, u64>,
    default_ttl: Duration,
    pub metrics: CacheMetrics,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig, shared: Arc<dyn SharedKv>) -> Self {
        let capacity = NonZeroUsize::new(config.local_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            shared,
            class_ttls: config.class_ttls.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            metrics: CacheMetrics::default(),
        }
    }

    fn ttl_for(&self, class: &str) -> Duration {
        self.class_ttls
            .get(class)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(self.default_ttl)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let storage_key = key.storage_key();

        if let Some((value, expires_at)) = self.local.lock().get(&storage_key).cloned() {
            if expires_at > std::time::Instant::now() {
                self.metrics.local_hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            self.local.lock().pop(&storage_key);
        }

        match self.shared.get(&storage_key).await {
            Ok(Some(value)) => {
                self.metrics.shared_hits.fetch_add(1, Ordering::Relaxed);
                let ttl = self.ttl_for(&key.class);
                self.local
                    .lock()
                    .put(storage_key, (value.clone(), std::time::Instant::now() + ttl));
                Some(value)
            }
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, class = %key.class, "shared cache tier unreachable, degrading to local-only");
                self.metrics.shared_degradations.fetch_add(1, Ordering::Relaxed);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: &CacheKey, value: Vec<u8>) {
        let ttl = self.ttl_for(&key.class);
        let storage_key = key.storage_key();
        self.local
            .lock()
            .put(storage_key.clone(), (value.clone(), std::time::Instant::now() + ttl));
        if let Err(err) = self.shared.put(&storage_key, value, ttl).await {
            tracing::warn!(error = %err, class = %key.class, "shared cache tier unreachable on write, local tier still updated");
            self.metrics.shared_degradations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes entries from both tiers whose key starts with `class:`.
    pub async fn invalidate_class(&self, class: &str) {
        let prefix = format!("{}:", class);
        let stale: Vec<String> = self
            .local
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        {
            let mut local = self.local.lock();
            for key in stale {
                local.pop(&key);
            }
        }
        if let Err(err) = self.shared.invalidate_prefix(&prefix).await {
            tracing::warn!(error = %err, class, "failed to invalidate shared cache tier prefix");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemorySharedKv;

    fn layer() -> CacheLayer {
        let mut config = CacheConfig::default();
        config.local_size = 4;
        CacheLayer::new(&config, Arc::new(InMemorySharedKv::default()))
    }

    #[tokio::test]
    async fn miss_then_hit_after_put() {
        let cache = layer();
        let key = CacheKey::build("balance", &[("account", "1")]);
        assert!(cache.get(&key).await.is_none());
        cache.put(&key, b"42".to_vec()).await;
        assert_eq!(cache.get(&key).await, Some(b"42".to_vec()));
    }

    #[tokio::test]
    async fn invalidate_class_removes_entries() {
        let cache = layer();
        let key = CacheKey::build("rates", &[("pair", "eurusd")]);
        cache.put(&key, b"1.08".to_vec()).await;
        cache.invalidate_class("rates").await;
        assert!(cache.get(&key).await.is_none());
    }
}
