//! Cache collaborator implementations
//!
//! The engine does not cache anything itself. After a store mutation it
//! tells the cache collaborator which prefix went stale and which key to
//! reload; these types carry that notification to Redis or drop it.

use crate::RedisCache;
use apolo_core::error::AppError;
use apolo_core::traits::CacheNotifier;
use async_trait::async_trait;
use tracing::{debug, info};

/// Notifier used when no cache is deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheNotifier;

#[async_trait]
impl CacheNotifier for NoopCacheNotifier {
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), AppError> {
        debug!("Cache disabled, skipping invalidation of {}", prefix);
        Ok(())
    }

    async fn reload_key(&self, key: &str) -> Result<(), AppError> {
        debug!("Cache disabled, skipping reload of {}", key);
        Ok(())
    }
}

/// Redis-backed notifier
///
/// Invalidation deletes every cached copy under `cache:{prefix}`; reloads
/// are published on a pub/sub channel for cache holders to act on.
#[derive(Clone)]
pub struct RedisCacheNotifier {
    cache: RedisCache,
    channel: String,
}

/// Namespace of cached copies, kept apart from the persisted records
pub const CACHE_NAMESPACE: &str = "cache:";

impl RedisCacheNotifier {
    pub fn new(cache: RedisCache, channel: impl Into<String>) -> Self {
        Self {
            cache,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl CacheNotifier for RedisCacheNotifier {
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let namespaced = format!("{}{}", CACHE_NAMESPACE, prefix);
        let keys = self.cache.keys_with_prefix(&namespaced).await?;
        for key in &keys {
            self.cache.delete(key).await?;
        }
        info!("Invalidated {} cached entries under {}", keys.len(), prefix);
        Ok(())
    }

    async fn reload_key(&self, key: &str) -> Result<(), AppError> {
        let receivers = self.cache.publish(&self.channel, key).await?;
        debug!("Reload of {} published to {} receivers", key, receivers);
        Ok(())
    }
}
