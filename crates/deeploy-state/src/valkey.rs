//! Valkey/Redis adapter for the chainstore.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use crate::error::KvError;
use crate::traits::KvBackend;

/// Valkey/Redis KV backend.
#[derive(Clone)]
pub struct ValkeyKv {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyKv {
    /// Create a new Valkey KV backend and check the connection.
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, KvError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| KvError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        Ok(Self { pool, namespace })
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_owned(),
        }
    }

    async fn conn(&self) -> Result<Connection, KvError> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))
    }
}

fn backend_error(e: redis::RedisError) -> KvError {
    if e.kind() == redis::ErrorKind::TypeError {
        KvError::WrongType(e.to_string())
    } else {
        KvError::Backend(e.to_string())
    }
}

#[async_trait]
impl KvBackend for ValkeyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;
        let result: Option<Vec<u8>> = conn
            .get(self.prefixed_key(key))
            .await
            .map_err(backend_error)?;
        Ok(result)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let prefixed = self.prefixed_key(key);

        match ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(&prefixed, value, seconds)
                    .await
                    .map_err(backend_error)?;
            }
            None => {
                conn.set::<_, _, ()>(&prefixed, value)
                    .await
                    .map_err(backend_error)?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn
            .del(self.prefixed_key(key))
            .await
            .map_err(backend_error)?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let exists: bool = conn
            .exists(self.prefixed_key(key))
            .await
            .map_err(backend_error)?;
        Ok(exists)
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(self.prefixed_key(key), field, value)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;
        let result: Option<Vec<u8>> = conn
            .hget(self.prefixed_key(key), field)
            .await
            .map_err(backend_error)?;
        Ok(result)
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;
        let result: BTreeMap<String, Vec<u8>> = conn
            .hgetall(self.prefixed_key(key))
            .await
            .map_err(backend_error)?;
        Ok(result)
    }
}

impl std::fmt::Debug for ValkeyKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyKv")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
