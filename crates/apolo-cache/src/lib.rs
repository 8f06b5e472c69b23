//! Redis layer for the Apolo charging engine
//!
//! Provides the Redis client shared by the persistent stores, the key
//! layout of persisted state, and the cache collaborator implementations
//! notified after every store mutation.
//!
//! # Features
//!
//! - Connection pooling via Redis ConnectionManager
//! - Automatic serialization/deserialization using serde_json
//! - Prefix scans and set operations for store indexes
//! - Pub/sub reload notifications
//! - Comprehensive error handling with conversion to AppError
//!
//! # Example
//!
//! ```no_run
//! use apolo_cache::RedisCache;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
//!
//!     cache.set_json("timing:T1", &"value").await?;
//!     let value: Option<String> = cache.get_json("timing:T1").await?;
//!     assert_eq!(value, Some("value".to_string()));
//!
//!     Ok(())
//! }
//! ```

pub mod keys;
pub mod notifier;

pub use notifier::{NoopCacheNotifier, RedisCacheNotifier};

use apolo_core::error::AppError;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 500;

/// Redis client with connection pooling
///
/// Wraps a Redis ConnectionManager to provide efficient, multiplexed access
/// to Redis. All operations are async and return Results with AppError.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Create a new Redis client
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self { manager })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ping failed: {}", e);
                AppError::Cache(format!("Ping failed: {}", e))
            })?;
        Ok(())
    }

    /// Get a JSON value and deserialize it
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        debug!("GET {}", key);
        let mut conn = self.manager.clone();

        let result: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;

        match result {
            Some(json) => {
                let value = serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize a value to JSON and store it without expiry
    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), AppError> {
        debug!("SET {}", key);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for key {}: {}", key, e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        let _: () = conn.set(key, json).await.map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool, AppError> {
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();

        let deleted: i32 = conn.del(key).await.map_err(Self::map_redis_error)?;
        Ok(deleted > 0)
    }

    /// All keys starting with `prefix`, via cursor-based SCAN
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        debug!("SCAN {}*", prefix);
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_redis_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Members of a set
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        debug!("SMEMBERS {}", key);
        let mut conn = self.manager.clone();

        let mut members: Vec<String> = conn.smembers(key).await.map_err(Self::map_redis_error)?;
        members.sort();
        Ok(members)
    }

    /// Add a member to a set
    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool, AppError> {
        debug!("SADD {} {}", key, member);
        let mut conn = self.manager.clone();

        let added: i32 = conn
            .sadd(key, member)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(added > 0)
    }

    /// Remove a member from a set
    pub async fn srem(&self, key: &str, member: &str) -> Result<bool, AppError> {
        debug!("SREM {} {}", key, member);
        let mut conn = self.manager.clone();

        let removed: i32 = conn
            .srem(key, member)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(removed > 0)
    }

    /// Publish a message, returning the number of receivers
    pub async fn publish(&self, channel: &str, message: &str) -> Result<i64, AppError> {
        debug!("PUBLISH {} {}", channel, message);
        let mut conn = self.manager.clone();

        let receivers: i64 = conn
            .publish(channel, message)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(receivers)
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}
