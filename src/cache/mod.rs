//! Conversation session storage.
//!
//! Sessions live in Redis when `REDIS_URL` is set (feature `cache`), and in
//! process memory otherwise. Both expire a chat's step after the configured
//! TTL.

pub mod error;
pub mod session;

pub use error::{CacheError, CacheResult};
pub use session::{InMemorySessionStore, SessionStore};

#[cfg(feature = "cache")]
pub use session::RedisSessionStore;

use std::sync::Arc;
use tracing::warn;

use crate::config::CacheConfig;

#[cfg(feature = "cache")]
mod pool {
    use super::error::CacheError;
    use bb8::Pool;
    use bb8_redis::RedisConnectionManager;
    use std::time::Duration;
    use tracing::{error, info, warn};

    /// Redis connection pool type alias
    pub type RedisPool = Pool<RedisConnectionManager>;

    /// Initialize the Redis pool. A failed PING is logged, not fatal.
    pub async fn init_cache_pool(
        redis_url: &str,
        max_connections: u32,
    ) -> Result<RedisPool, CacheError> {
        info!(max_connections, "Initializing Redis session pool");

        let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
            error!("Failed to create Redis connection manager: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(60)))
            .build(manager)
            .await
            .map_err(|e| {
                error!("Failed to build Redis connection pool: {}", e);
                CacheError::ConnectionError(e.to_string())
            })?;

        if let Err(e) = health_check(&pool).await {
            warn!("Initial Redis connection test failed, but continuing: {}", e);
        }

        info!("Redis session pool initialized");
        Ok(pool)
    }

    pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(feature = "cache")]
pub use pool::{health_check, init_cache_pool, RedisPool};

/// Redis-backed sessions when configured and compiled in, otherwise memory.
pub async fn build_session_store(config: &CacheConfig) -> CacheResult<Arc<dyn SessionStore>> {
    match &config.redis_url {
        #[cfg(feature = "cache")]
        Some(url) => {
            let pool = init_cache_pool(url, config.max_connections).await?;
            Ok(Arc::new(RedisSessionStore::new(pool, config.session_ttl)))
        }
        #[cfg(not(feature = "cache"))]
        Some(_) => {
            warn!("REDIS_URL is set but the cache feature is disabled; using in-memory sessions");
            Ok(Arc::new(InMemorySessionStore::new(config.session_ttl)))
        }
        None => {
            warn!("REDIS_URL not set; conversation sessions are kept in memory");
            Ok(Arc::new(InMemorySessionStore::new(config.session_ttl)))
        }
    }
}
