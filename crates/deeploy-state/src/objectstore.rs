//! Blob backend on top of `object_store` (local filesystem, S3, memory).

use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;

use crate::error::BlobError;
use crate::traits::BlobBackend;
use crate::types::ContentAddress;

/// Stores each blob under `<prefix>/<address>`.
pub struct ObjectStoreBlob {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreBlob {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_owned(),
        }
    }

    /// Blob store rooted at a local directory.
    pub fn local(root: &str, prefix: impl Into<String>) -> Result<Self, BlobError> {
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)
            .map_err(|e| BlobError::Connection(format!("failed to create local store: {e}")))?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// Blob store in an S3 (or S3-compatible) bucket.
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        prefix: impl Into<String>,
    ) -> Result<Self, BlobError> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| BlobError::Connection(format!("failed to create S3 store: {e}")))?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    fn object_path(&self, address: &ContentAddress) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(address.as_str())
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, address))
        }
    }
}

#[async_trait]
impl BlobBackend for ObjectStoreBlob {
    async fn put(&self, data: &[u8]) -> Result<ContentAddress, BlobError> {
        let address = ContentAddress::for_bytes(data);
        let path = self.object_path(&address);

        match self.store.head(&path).await {
            Ok(_) => {
                debug!(%address, "blob already stored");
                return Ok(address);
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(BlobError::Backend(format!("failed to check blob: {e}"))),
        }

        self.store
            .put(&path, PutPayload::from(data.to_vec()))
            .await
            .map_err(|e| BlobError::Backend(format!("failed to upload blob: {e}")))?;

        debug!(%address, size = data.len(), "blob stored");
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, BlobError> {
        let result = match self.store.get(&self.object_path(address)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(BlobError::Backend(format!("failed to download blob: {e}"))),
        };

        let data = result
            .bytes()
            .await
            .map_err(|e| BlobError::Backend(format!("failed to read blob: {e}")))?;

        address.verify(&data)?;
        Ok(Some(data.to_vec()))
    }
}

impl std::fmt::Debug for ObjectStoreBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBlob")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let blob = ObjectStoreBlob::new(Arc::new(InMemory::new()), "pipelines");

        let address = blob.put(b"{\"NAME\":\"app\"}").await.unwrap();
        let again = blob.put(b"{\"NAME\":\"app\"}").await.unwrap();
        assert_eq!(address, again);

        let data = blob.get(&address).await.unwrap().unwrap();
        assert_eq!(data, b"{\"NAME\":\"app\"}");
    }

    #[tokio::test]
    async fn missing_blob_is_none() {
        let blob = ObjectStoreBlob::new(Arc::new(InMemory::new()), "");
        let address = ContentAddress::for_bytes(b"never stored");
        assert!(blob.get(&address).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_blob_is_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let address = ContentAddress::for_bytes(b"original");
        store
            .put(
                &ObjectPath::from(format!("p/{address}")),
                PutPayload::from(b"tampered".to_vec()),
            )
            .await
            .unwrap();

        let blob = ObjectStoreBlob::new(store, "p");
        assert!(matches!(
            blob.get(&address).await,
            Err(BlobError::Integrity(_))
        ));
    }
}
