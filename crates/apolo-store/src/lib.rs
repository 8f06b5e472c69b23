//! Apolo Charging Store Layer
//!
//! This crate provides the account and rating store backends used by the
//! engine. It includes:
//!
//! - In-memory stores for single-node deployments and tests
//! - Redis JSON stores sharing the key layout of `apolo_cache::keys`

pub mod memory;
pub mod redis;

pub use memory::{InMemoryAccountStore, InMemoryRatingStore};
pub use redis::{RedisAccountStore, RedisRatingStore};

// Re-export commonly used types
pub use apolo_core::{AppError, AppResult};
