//! Notification de-duplication
//!
//! Providers deliver notifications at least once. The service marks each
//! state-changing notification under its dedup key before dispatching it, so
//! side effects run once per key even across redeliveries.

use crate::payments::error::PaymentResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a delivered notification is remembered
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[async_trait]
pub trait NotifyDeduplicator: Send + Sync {
    /// Atomically place a mark; `true` if the key had not been seen.
    async fn mark_if_new(&self, key: &str, ttl: Duration) -> PaymentResult<bool>;

    /// Remove a mark so the next delivery is processed again.
    async fn release(&self, key: &str) -> PaymentResult<()>;
}

/// Process-local store, suitable for a single instance or tests.
#[derive(Debug, Default)]
pub struct InMemoryDeduplicator {
    seen: Mutex<HashMap<String, Instant>>,
}

impl InMemoryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[async_trait]
impl NotifyDeduplicator for InMemoryDeduplicator {
    async fn mark_if_new(&self, key: &str, ttl: Duration) -> PaymentResult<bool> {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, expires_at| *expires_at > now);
        if seen.contains_key(key) {
            debug!("Duplicate notification key {}", key);
            return Ok(false);
        }
        seen.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> PaymentResult<()> {
        self.seen.lock().remove(key);
        Ok(())
    }
}

#[cfg(feature = "cache")]
pub use redis_store::RedisDeduplicator;

#[cfg(feature = "cache")]
mod redis_store {
    use super::NotifyDeduplicator;
    use crate::cache::{CacheError, RedisPool};
    use crate::payments::error::PaymentResult;
    use async_trait::async_trait;
    use std::time::Duration;
    use tracing::{debug, warn};

    /// Shared store for multi-instance deployments, `SET NX EX` based.
    pub struct RedisDeduplicator {
        pool: RedisPool,
    }

    impl RedisDeduplicator {
        pub fn new(pool: RedisPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl NotifyDeduplicator for RedisDeduplicator {
        async fn mark_if_new(&self, key: &str, ttl: Duration) -> PaymentResult<bool> {
            let mut conn = self.pool.get().await.map_err(|e| {
                warn!("Failed to get Redis connection: {}", e);
                CacheError::from(e)
            })?;

            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut *conn)
                .await
                .map_err(|e| {
                    warn!("Redis SET NX failed for key '{}': {}", key, e);
                    CacheError::from(e)
                })?;

            let fresh = reply.is_some();
            if !fresh {
                debug!("Duplicate notification key {}", key);
            }
            Ok(fresh)
        }

        async fn release(&self, key: &str) -> PaymentResult<()> {
            let mut conn = self.pool.get().await.map_err(CacheError::from)?;
            let _: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut *conn)
                .await
                .map_err(|e| {
                    warn!("Redis DEL failed for key '{}': {}", key, e);
                    CacheError::from(e)
                })?;
            Ok(())
        }
    }
}
