use std::sync::Arc;

use crate::config::{BlobConfig, KvConfig, StateConfig};
use crate::error::StateError;
use crate::traits::{BlobBackend, KvBackend};

#[cfg(feature = "memory")]
use crate::memory::{MemoryBlob, MemoryKv};

#[cfg(feature = "valkey")]
use crate::valkey::ValkeyKv;

#[cfg(feature = "objectstore")]
use crate::objectstore::ObjectStoreBlob;

#[derive(Clone, Default)]
pub struct StateProvider {
    kv: Option<Arc<dyn KvBackend>>,
    blob: Option<Arc<dyn BlobBackend>>,
}

impl StateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(config: &StateConfig) -> Result<Self, StateError> {
        let kv = match &config.kv {
            Some(c) => Some(Self::create_kv_backend(c).await?),
            None => None,
        };

        let blob = match &config.blob {
            Some(c) => Some(Self::create_blob_backend(c)?),
            None => None,
        };

        Ok(Self { kv, blob })
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvBackend>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_blob(mut self, blob: Arc<dyn BlobBackend>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn kv(&self) -> Result<Arc<dyn KvBackend>, StateError> {
        self.kv
            .clone()
            .ok_or(StateError::NotConfigured("kv".to_owned()))
    }

    pub fn blob(&self) -> Result<Arc<dyn BlobBackend>, StateError> {
        self.blob
            .clone()
            .ok_or(StateError::NotConfigured("blob".to_owned()))
    }

    async fn create_kv_backend(config: &KvConfig) -> Result<Arc<dyn KvBackend>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            KvConfig::Memory => Ok(Arc::new(MemoryKv::new())),

            #[cfg(feature = "valkey")]
            KvConfig::Valkey {
                url,
                namespace,
                pool_size,
            } => {
                let kv = ValkeyKv::new(url, namespace.clone(), *pool_size)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                Ok(Arc::new(kv))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "No suitable KV backend enabled".to_owned(),
            )),
        }
    }

    fn create_blob_backend(config: &BlobConfig) -> Result<Arc<dyn BlobBackend>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            BlobConfig::Memory => Ok(Arc::new(MemoryBlob::new())),

            #[cfg(feature = "objectstore")]
            BlobConfig::Local { path, prefix } => {
                let blob = ObjectStoreBlob::local(path, prefix.clone())
                    .map_err(|e| StateError::Configuration(e.to_string()))?;
                Ok(Arc::new(blob))
            }

            #[cfg(feature = "objectstore")]
            BlobConfig::S3 {
                bucket,
                region,
                endpoint,
                prefix,
            } => {
                let blob = ObjectStoreBlob::s3(
                    bucket,
                    region.as_deref(),
                    endpoint.as_deref(),
                    prefix.clone(),
                )
                .map_err(|e| StateError::Configuration(e.to_string()))?;
                Ok(Arc::new(blob))
            }

            #[allow(unreachable_patterns)]
            _ => Err(StateError::UnsupportedBackend(
                "No suitable blob backend enabled".to_owned(),
            )),
        }
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("kv", &self.kv.is_some())
            .field("blob", &self.blob.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_from_empty_config() {
        let config = StateConfig::default();
        let provider = StateProvider::from_config(&config).await.unwrap();

        assert!(provider.kv().is_err());
        assert!(provider.blob().is_err());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn provider_from_memory_config() {
        let config = StateConfig {
            kv: Some(KvConfig::Memory),
            blob: Some(BlobConfig::Memory),
        };
        let provider = StateProvider::from_config(&config).await.unwrap();

        assert!(provider.kv().is_ok());
        assert!(provider.blob().is_ok());
    }

    #[cfg(feature = "memory")]
    #[test]
    fn provider_builder_pattern() {
        let provider = StateProvider::new()
            .with_kv(Arc::new(MemoryKv::new()))
            .with_blob(Arc::new(MemoryBlob::new()));

        assert!(provider.kv().is_ok());
        assert!(provider.blob().is_ok());
    }
}
