use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BlobError, KvError};
use crate::types::ContentAddress;

/// Shared key/value store used for cross-node signalling.
///
/// Plain keys hold single values; hash keys hold a field map. Every writer
/// owns distinct keys, so no operation here takes a lock.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<(), KvError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, KvError>;
}

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store `data` and return its address. Storing the same bytes twice is a no-op.
    async fn put(&self, data: &[u8]) -> Result<ContentAddress, BlobError>;

    async fn get(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, BlobError>;
}
