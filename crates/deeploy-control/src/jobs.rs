//! Snapshots of deployed pipelines, indexed by job id.
//!
//! Each snapshot is the canonical form of the pipeline template stored in
//! the blob backend; the chainstore hash [`DEPLOYED_JOBS_HKEY`] maps
//! `str(job_id)` to its content address.

use std::collections::BTreeMap;
use std::sync::Arc;

use deeploy_state::{BlobBackend, ContentAddress, KvBackend};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::canonical::normalize_and_sort;
use crate::error::{ControlError, ControlResult};
use crate::specs::PipelineConfig;

/// Chainstore hash holding `job_id -> content address`.
pub const DEPLOYED_JOBS_HKEY: &str = "DEEPLOY_DEPLOYED_JOBS";

/// Audit trail of deployed job pipelines.
#[derive(Clone)]
pub struct JobLedger {
    kv: Arc<dyn KvBackend>,
    blob: Arc<dyn BlobBackend>,
}

impl std::fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLedger").finish_non_exhaustive()
    }
}

/// Canonical snapshot of a pipeline: per-node stamps and volatile keys
/// removed, maps and comparable lists sorted.
pub fn canonical_snapshot(pipeline: &PipelineConfig) -> ControlResult<Value> {
    let value = serde_json::to_value(pipeline.template())?;
    Ok(normalize_and_sort(&value))
}

impl JobLedger {
    #[must_use]
    pub fn new(kv: Arc<dyn KvBackend>, blob: Arc<dyn BlobBackend>) -> Self {
        Self { kv, blob }
    }

    /// Persist a snapshot. Failures are logged, never returned.
    pub async fn save(&self, job_id: u64, pipeline: &PipelineConfig) -> Option<ContentAddress> {
        match self.try_save(job_id, pipeline).await {
            Ok(address) => {
                info!(job_id, %address, "job pipeline saved");
                Some(address)
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to save job pipeline");
                None
            }
        }
    }

    async fn try_save(&self, job_id: u64, pipeline: &PipelineConfig) -> ControlResult<ContentAddress> {
        let snapshot = canonical_snapshot(pipeline)?;
        let bytes = serde_json::to_vec(&snapshot)?;
        let address = self.blob.put(&bytes).await?;
        self.kv
            .hset(DEPLOYED_JOBS_HKEY, &job_id.to_string(), address.as_str().as_bytes())
            .await?;
        Ok(address)
    }

    /// Content address of a job's snapshot.
    pub async fn address(&self, job_id: u64) -> ControlResult<Option<ContentAddress>> {
        let Some(raw) = self.kv.hget(DEPLOYED_JOBS_HKEY, &job_id.to_string()).await? else {
            return Ok(None);
        };
        let raw = String::from_utf8(raw)
            .map_err(|e| ControlError::Serialisation(format!("job {job_id} address: {e}")))?;
        Ok(Some(ContentAddress::parse(&raw)?))
    }

    /// The stored snapshot of a job.
    pub async fn get(&self, job_id: u64) -> ControlResult<Option<Value>> {
        let Some(address) = self.address(job_id).await? else {
            return Ok(None);
        };
        let Some(bytes) = self.blob.get(&address).await? else {
            debug!(job_id, %address, "snapshot indexed but missing from blob store");
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Every indexed job.
    pub async fn list(&self) -> ControlResult<BTreeMap<u64, ContentAddress>> {
        let mut jobs = BTreeMap::new();
        for (field, raw) in self.kv.hgetall(DEPLOYED_JOBS_HKEY).await? {
            let Ok(job_id) = field.parse::<u64>() else {
                debug!(field, "skipping non-numeric job index entry");
                continue;
            };
            let raw = String::from_utf8_lossy(&raw);
            jobs.insert(job_id, ContentAddress::parse(&raw)?);
        }
        Ok(jobs)
    }

    /// Whether the live pipeline differs from the stored snapshot.
    ///
    /// A job with no snapshot counts as drifted.
    pub async fn has_drifted(&self, job_id: u64, live: &PipelineConfig) -> ControlResult<bool> {
        let Some(stored) = self.get(job_id).await? else {
            return Ok(true);
        };
        Ok(stored != canonical_snapshot(live)?)
    }
}
