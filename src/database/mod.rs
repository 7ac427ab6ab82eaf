pub mod error;
pub mod ledger_store;
pub mod memory_store;
pub mod models;
#[cfg(feature = "database")]
pub mod postgres_store;

use std::sync::Arc;

use tracing::{info, warn};

use self::error::StoreError;
use self::ledger_store::LedgerStore;
use self::memory_store::InMemoryLedgerStore;
use crate::config::DatabaseConfig;

#[cfg(feature = "database")]
pub use self::pool::{health_check, init_pool, init_pool_from_config, PoolConfig};

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use super::error::StoreError;
    use crate::config::DatabaseConfig;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 20,
                min_connections: 5,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    /// Initialize the database connection pool and apply pending migrations
    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, StoreError> {
        let config = config.unwrap_or_default();

        info!(
            "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
            config.max_connections, config.min_connections, config.connection_timeout
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!("Failed to initialize database pool: {}", e);
                StoreError::from_sqlx(e)
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                log_error!("Failed to apply migrations: {}", e);
                StoreError::Database {
                    message: e.to_string(),
                    retryable: false,
                }
            })?;

        info!("Database pool initialized successfully");
        Ok(pool)
    }

    /// Connection pool health check
    pub async fn health_check(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
            warn!("Health check failed: {}", e);
            StoreError::from_sqlx(e)
        })?;

        Ok(())
    }

    pub async fn init_pool_from_config(
        url: &str,
        config: &DatabaseConfig,
    ) -> Result<PgPool, StoreError> {
        let pool_config = PoolConfig {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            max_lifetime: Duration::from_secs(1800),
        };

        init_pool(url, Some(pool_config)).await
    }
}

/// Pick the ledger backend: Postgres when a URL is configured, otherwise a
/// process-local store that loses its data on restart.
pub async fn build_ledger_store(
    config: &DatabaseConfig,
) -> Result<Arc<dyn LedgerStore>, StoreError> {
    match &config.url {
        #[cfg(feature = "database")]
        Some(url) => {
            let pool = init_pool_from_config(url, config).await?;
            info!("Ledger store: postgres");
            Ok(Arc::new(postgres_store::PostgresLedgerStore::new(pool)))
        }
        #[cfg(not(feature = "database"))]
        Some(_) => {
            warn!("DATABASE_URL set but the `database` feature is disabled; using in-memory ledger");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => {
            warn!("DATABASE_URL not set; ledger is held in memory and lost on restart");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "database")]
    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.connection_timeout, std::time::Duration::from_secs(30));
    }

    #[tokio::test]
    async fn missing_url_falls_back_to_memory() {
        let config = DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
            connection_timeout: 5,
            idle_timeout: None,
        };
        let store = build_ledger_store(&config).await.unwrap();
        assert!(store.health_check().await.is_ok());
        assert!(store.list_user_ids().await.unwrap().is_empty());
    }
}
