use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{BlobError, KvError};
use crate::traits::{BlobBackend, KvBackend};
use crate::types::ContentAddress;

#[derive(Debug, Clone)]
enum KvEntry {
    Plain {
        value: Vec<u8>,
        expires_at: Option<Instant>,
    },
    Hash(BTreeMap<String, Vec<u8>>),
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            Self::Plain {
                expires_at: Some(exp),
                ..
            } => now < *exp,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<HashMap<String, KvEntry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if !entry.is_live(Instant::now()) => {
                drop(data);
                let mut data = self.data.write().await;
                data.remove(key);
                Ok(None)
            }
            Some(KvEntry::Plain { value, .. }) => Ok(Some(value.clone())),
            Some(KvEntry::Hash(_)) => Err(KvError::WrongType(key.to_owned())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        data.insert(
            key.to_owned(),
            KvEntry::Plain {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_owned())
            .or_insert_with(|| KvEntry::Hash(BTreeMap::new()));
        match entry {
            KvEntry::Hash(fields) => {
                fields.insert(field.to_owned(), value.to_vec());
                Ok(())
            }
            KvEntry::Plain { .. } => Err(KvError::WrongType(key.to_owned())),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(KvEntry::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(KvEntry::Plain { .. }) => Err(KvError::WrongType(key.to_owned())),
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, KvError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(KvEntry::Hash(fields)) => Ok(fields.clone()),
            Some(KvEntry::Plain { .. }) => Err(KvError::WrongType(key.to_owned())),
            None => Ok(BTreeMap::new()),
        }
    }
}

/// In-memory blob store keyed by content address.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlob {
    blobs: Arc<RwLock<HashMap<ContentAddress, Vec<u8>>>>,
}

impl MemoryBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlob {
    async fn put(&self, data: &[u8]) -> Result<ContentAddress, BlobError> {
        let address = ContentAddress::for_bytes(data);
        let mut blobs = self.blobs.write().await;
        blobs
            .entry(address.clone())
            .or_insert_with(|| data.to_vec());
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, BlobError> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(address).cloned())
    }
}
