//! PostgreSQL connection pool.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tether_common::{Result, TetherError};
use tracing::{info, instrument};

/// Pool sizing for a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long a pipeline run waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Pooled PostgreSQL connection shared by every store handle.
#[derive(Clone)]
pub struct Connection {
    pool: PgPool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

fn connect_options(url: &str) -> Result<PgConnectOptions> {
    if url.is_empty() {
        return Err(TetherError::Connection("Database URL cannot be empty".to_string()));
    }
    PgConnectOptions::from_str(url)
        .map_err(|e| TetherError::Connection(format!("Invalid database URL: {}", e)))
}

impl Connection {
    /// Opens the pool and checks it with one round trip.
    #[instrument(skip(url), fields(
        min_connections = config.min_connections,
        max_connections = config.max_connections
    ))]
    pub async fn new(url: &str, config: PoolConfig) -> Result<Self> {
        let options = connect_options(url)?;
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;
        let conn = Self { pool };
        conn.ping().await?;
        info!("Connection pool ready");
        Ok(conn)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bad_urls_rejected_before_connecting() {
        let err = Connection::new("", PoolConfig::default()).await.unwrap_err();
        assert!(matches!(err, TetherError::Connection(ref msg) if msg == "Database URL cannot be empty"));

        let err = Connection::new("not a url", PoolConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Connection(ref msg) if msg.starts_with("Invalid database URL")));
    }
}
