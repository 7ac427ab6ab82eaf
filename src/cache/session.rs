use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::CacheResult;
use crate::bot::state::ConversationStep;

/// Where each chat's current conversation step is kept.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, chat_id: i64) -> CacheResult<Option<ConversationStep>>;

    async fn set(&self, chat_id: i64, step: &ConversationStep) -> CacheResult<()>;

    async fn clear(&self, chat_id: i64) -> CacheResult<()>;

    async fn health_check(&self) -> CacheResult<()>;
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

pub struct InMemorySessionStore {
    ttl: Duration,
    entries: RwLock<HashMap<i64, (ConversationStep, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, chat_id: i64) -> CacheResult<Option<ConversationStep>> {
        {
            let entries = self.entries.read().await;
            match entries.get(&chat_id) {
                None => return Ok(None),
                Some((step, stored_at)) if stored_at.elapsed() < self.ttl => {
                    return Ok(Some(step.clone()))
                }
                Some(_) => {}
            }
        }
        // expired
        self.entries.write().await.remove(&chat_id);
        Ok(None)
    }

    async fn set(&self, chat_id: i64, step: &ConversationStep) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .insert(chat_id, (step.clone(), Instant::now()));
        Ok(())
    }

    async fn clear(&self, chat_id: i64) -> CacheResult<()> {
        self.entries.write().await.remove(&chat_id);
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Redis
// ----------------------------------------------------------------------------

#[cfg(feature = "cache")]
pub use redis_store::RedisSessionStore;

#[cfg(feature = "cache")]
mod redis_store {
    use super::*;
    use crate::cache::RedisPool;
    use tracing::debug;

    /// JSON-encoded steps under `session:<chat id>` with `SET .. EX`.
    pub struct RedisSessionStore {
        pool: RedisPool,
        ttl: Duration,
    }

    impl RedisSessionStore {
        pub fn new(pool: RedisPool, ttl: Duration) -> Self {
            Self { pool, ttl }
        }

        fn key(chat_id: i64) -> String {
            format!("session:{}", chat_id)
        }
    }

    #[async_trait]
    impl SessionStore for RedisSessionStore {
        async fn get(&self, chat_id: i64) -> CacheResult<Option<ConversationStep>> {
            let mut conn = self.pool.get().await?;
            let raw: Option<String> = redis::cmd("GET")
                .arg(Self::key(chat_id))
                .query_async(&mut *conn)
                .await?;
            match raw {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        }

        async fn set(&self, chat_id: i64, step: &ConversationStep) -> CacheResult<()> {
            let json = serde_json::to_string(step)?;
            let mut conn = self.pool.get().await?;
            let _: () = redis::cmd("SET")
                .arg(Self::key(chat_id))
                .arg(json)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .query_async(&mut *conn)
                .await?;
            debug!(chat_id, step = step.name(), "session stored");
            Ok(())
        }

        async fn clear(&self, chat_id: i64) -> CacheResult<()> {
            let mut conn = self.pool.get().await?;
            let _: i64 = redis::cmd("DEL")
                .arg(Self::key(chat_id))
                .query_async(&mut *conn)
                .await?;
            Ok(())
        }

        async fn health_check(&self) -> CacheResult<()> {
            crate::cache::health_check(&self.pool).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_clear() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        assert!(store.get(1).await.unwrap().is_none());

        store
            .set(1, &ConversationStep::AwaitingDepositAmount)
            .await
            .unwrap();
        assert_eq!(
            store.get(1).await.unwrap(),
            Some(ConversationStep::AwaitingDepositAmount)
        );
        assert!(store.get(2).await.unwrap().is_none());

        store.clear(1).await.unwrap();
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn steps_expire_after_ttl() {
        let store = InMemorySessionStore::new(Duration::from_millis(20));
        store
            .set(9, &ConversationStep::AwaitingAccountNumber)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(9).await.unwrap().is_none());
    }
}
