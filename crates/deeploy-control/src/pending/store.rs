//! In-memory pending request store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::PendingId;

use super::{PendingRequest, PendingRequestStore};

/// Process-local pending request store.
///
/// Pending requests are lost when the process exits; callers then poll a
/// request that no longer exists and get a failure.
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    requests: RwLock<HashMap<PendingId, PendingRequest>>,
}

impl MemoryPendingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingRequestStore for MemoryPendingStore {
    async fn insert(&self, request: PendingRequest) -> ControlResult<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if requests.contains_key(&request.pending_id) {
            return Err(ControlError::internal(format!(
                "pending request {} already exists",
                request.pending_id
            )));
        }

        requests.insert(request.pending_id.clone(), request);
        Ok(())
    }

    async fn get(&self, id: &PendingId) -> ControlResult<Option<PendingRequest>> {
        let requests = self
            .requests
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(requests.get(id).cloned())
    }

    async fn update(&self, request: PendingRequest) -> ControlResult<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let slot = requests.get_mut(&request.pending_id).ok_or_else(|| {
            ControlError::internal(format!("pending request {} not found", request.pending_id))
        })?;
        *slot = request;
        Ok(())
    }

    async fn remove(&self, id: &PendingId) -> ControlResult<Option<PendingRequest>> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(requests.remove(id))
    }

    async fn len(&self) -> ControlResult<usize> {
        let requests = self
            .requests
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(requests.len())
    }

    async fn ids(&self) -> ControlResult<Vec<PendingId>> {
        let requests = self
            .requests
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut ids: Vec<PendingId> = requests.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
