//! Guardian named-lock
//!
//! Serializes critical sections on string keys (account keys in practice).
//! Keys are sorted and deduplicated before acquisition so that sections
//! spanning several accounts always lock in the same order and cannot
//! deadlock each other.
//!
//! # Release
//!
//! Held locks live in a [`HeldLocks`] value whose `Drop` releases them, so
//! every exit path of the critical section (success, error, panic, or the
//! caller dropping the future while waiting) gives the keys back.
//!
//! # Example
//!
//! ```no_run
//! # use apolo_services::Guardian;
//! # async fn example() -> apolo_core::AppResult<()> {
//! let guardian = Guardian::new();
//! let keys = vec!["cgrates.org:1001".to_string()];
//! let value = guardian.guard(&keys, None, || async { Ok(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use apolo_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Named-lock manager
///
/// Explicitly constructed and shared (`Arc<Guardian>`) by every component
/// that mutates account state.
#[derive(Default)]
pub struct Guardian {
    locks: Mutex<HashMap<String, Arc<KeyMutex<()>>>>,
}

/// Locks held for one critical section
pub struct HeldLocks<'a> {
    guardian: &'a Guardian,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks<'_> {
    fn drop(&mut self) {
        // release in reverse acquisition order, then forget idle entries
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
        let mut locks = self.guardian.locks.lock();
        for key in &self.keys {
            if locks.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(key);
            }
        }
    }
}

impl Guardian {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<KeyMutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyMutex::new(())))
            .clone()
    }

    /// Acquire every key, in sorted order, within `timeout` (`None` = unbounded)
    pub async fn acquire(&self, keys: &[String], timeout: Option<Duration>) -> AppResult<HeldLocks<'_>> {
        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut held = HeldLocks {
            guardian: self,
            keys: Vec::with_capacity(sorted.len()),
            guards: Vec::with_capacity(sorted.len()),
        };

        for key in sorted {
            let mutex = self.entry(&key);
            held.keys.push(key.clone());
            let guard = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                        Ok(guard) => guard,
                        Err(_) => {
                            warn!("Lock timeout acquiring {}", key);
                            return Err(AppError::LockTimeout(key));
                        }
                    }
                }
                None => mutex.lock_owned().await,
            };
            held.guards.push(guard);
        }

        debug!("Acquired locks {:?}", held.keys);
        Ok(held)
    }

    /// Run `critical` while holding every key
    ///
    /// Fails with `LockTimeout` without running `critical` when the keys
    /// cannot be acquired in time.
    pub async fn guard<T, F, Fut>(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
        critical: F,
    ) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let _held = self.acquire(keys, timeout).await?;
        critical().await
    }

    /// Keys currently locked or awaited
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }
}
