//! Redis access layer for Callmeter
//!
//! Wraps a Redis `ConnectionManager` and implements the `CacheService`
//! trait from callmeter-core. The invite inbox and the Redis-backed wallet
//! ledger are built on top of it.
//!
//! # Example
//!
//! ```no_run
//! use callmeter_cache::RedisCache;
//! use callmeter_core::traits::CacheService;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCache::new("redis://127.0.0.1:6379", "callmeter").await?;
//!
//!     cache.set("greeting", &"hello", 60).await?;
//!     let value: Option<String> = cache.get("greeting").await?;
//!     assert_eq!(value, Some("hello".to_string()));
//!
//!     Ok(())
//! }
//! ```

pub mod keys;

use async_trait::async_trait;
use callmeter_core::error::AppError;
use callmeter_core::traits::CacheService;
use redis::{
    aio::ConnectionManager, AsyncCommands, Client, FromRedisValue, RedisError, Script, ToRedisArgs,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

/// Redis client with a multiplexed connection and a key namespace
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisCache {
    /// Connect to Redis
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `namespace` - Prefix applied by the key builders in [`keys`]
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str, namespace: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established");
        Ok(Self {
            manager,
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Run a Lua script atomically
    ///
    /// Redis executes the whole script without interleaving other commands,
    /// which is what makes multi-key updates atomic.
    pub async fn eval_script<T: FromRedisValue, A: ToRedisArgs>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[A],
    ) -> Result<T, AppError> {
        let mut conn = self.manager.clone();
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)
    }

    /// Read an integer key, `None` if absent
    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>, AppError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(Self::map_redis_error)
    }

    /// Increment an integer key, creating it at zero
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        conn.incr(key, amount).await.map_err(Self::map_redis_error)
    }

    /// Delete all keys in the current database (tests only)
    #[cfg(test)]
    pub async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    ///
    /// I/O and connection failures are transient: callers retry them on the
    /// next attempt instead of giving up.
    pub fn map_redis_error(err: RedisError) -> AppError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            warn!("Redis I/O error: {}", err);
            return AppError::TransientNetwork(format!("Redis unavailable: {}", err));
        }
        match err.kind() {
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

#[async_trait]
impl CacheService for RedisCache {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
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

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError> {
        debug!("SET {} (TTL: {}s)", key, ttl_secs);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(value)?;

        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();

        let deleted: i32 = conn.del(key).await.map_err(Self::map_redis_error)?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(Self::map_redis_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        id: i32,
        name: String,
    }

    async fn setup_cache() -> RedisCache {
        let cache = RedisCache::new("redis://127.0.0.1:6379", "callmeter-test")
            .await
            .expect("Failed to connect to Redis");
        cache.flush_db().await.expect("Failed to flush DB");
        cache
    }

    #[test]
    fn test_io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RedisCache::map_redis_error(RedisError::from(io));
        assert!(matches!(err, AppError::TransientNetwork(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_type_errors_are_not_transient() {
        let err = RedisCache::map_redis_error(RedisError::from((
            redis::ErrorKind::TypeError,
            "bad type",
        )));
        assert!(matches!(err, AppError::Cache(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let cache = setup_cache().await;
        assert!(cache.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_set_get_delete() {
        let cache = setup_cache().await;
        let data = TestData {
            id: 1,
            name: "Test".to_string(),
        };

        cache.set("test_key", &data, 60).await.unwrap();
        let result: Option<TestData> = cache.get("test_key").await.unwrap();
        assert_eq!(result, Some(data));

        assert!(cache.exists("test_key").await.unwrap());
        assert!(cache.delete("test_key").await.unwrap());
        assert!(!cache.delete("test_key").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_incr_by() {
        let cache = setup_cache().await;
        assert_eq!(cache.get_i64("counter").await.unwrap(), None);
        assert_eq!(cache.incr_by("counter", 5).await.unwrap(), 5);
        assert_eq!(cache.get_i64("counter").await.unwrap(), Some(5));
    }
}
