//! Redis connection pool for command traffic.
//!
//! Pub/sub subscriptions use dedicated connections created from the same
//! client; everything else shares one multiplexed connection.

use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

impl PoolError {
    /// Whether the failure means the connection is gone rather than a bad command.
    pub fn is_connection_error(&self) -> bool {
        match self {
            PoolError::Redis(e) => e.is_connection_dropped() || e.is_io_error() || e.is_timeout(),
        }
    }
}

/// Redis connection pool.
///
/// The multiplexed connection is created on first use and discarded when
/// Redis reports it dropped, so the next call reconnects.
pub struct RedisPool {
    /// Redis client for creating connections
    client: Client,

    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,

    /// Configuration
    config: RedisConfig,
}

impl RedisPool {
    /// Create a new Redis pool. No connection is opened until first use.
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            config,
        })
    }

    /// Get the shared connection, establishing it if needed.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                tracing::info!("Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Open a dedicated pub/sub connection.
    pub async fn pubsub(&self) -> Result<PubSub, PoolError> {
        Ok(self.client.get_async_pubsub().await?)
    }

    /// Run a command against the shared connection, dropping it on connection errors.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Get the Redis URL (for debugging).
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        let _: String = self
            .execute(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_is_lazy() {
        let pool = RedisPool::new(RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        })
        .unwrap();
        assert_eq!(pool.url(), "redis://127.0.0.1:1");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = RedisPool::new(RedisConfig {
            url: "not a url".to_string(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let pool = RedisPool::new(RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        })
        .unwrap();
        let err = pool.ping().await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
