//! Job payment and ownership checks.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::address::same_eth;
use crate::config::PaymentConfig;
use crate::error::{ControlResult, PaymentError};
use crate::ledger::Ledger;
use crate::plugins::PluginInstanceSpec;
use crate::resources::ContainerPolicy;

/// Checks that a job is paid for by its caller and matches what was paid.
#[derive(Clone)]
pub struct PaymentValidator {
    ledger: Arc<dyn Ledger>,
    policy: ContainerPolicy,
    config: PaymentConfig,
}

impl std::fmt::Debug for PaymentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentValidator")
            .field("allow_unpaid_jobs", &self.config.allow_unpaid_jobs)
            .field("job_types", &self.config.job_types.len())
            .finish_non_exhaustive()
    }
}

impl PaymentValidator {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, policy: ContainerPolicy, config: PaymentConfig) -> Self {
        Self {
            ledger,
            policy,
            config,
        }
    }

    /// Whether `signer` may deploy `plugins` under `job_id`.
    ///
    /// Returns `false` when the job is missing, owned by someone else or,
    /// on create, already started. Unknown job types, unconfigured bundles
    /// and resource mismatches are errors.
    pub async fn validate(
        &self,
        job_id: u64,
        signer: &str,
        is_create: bool,
        plugins: &[PluginInstanceSpec],
    ) -> ControlResult<bool> {
        let Some(job) = self.ledger.job_details(job_id).await? else {
            debug!(job_id, "job not found on ledger");
            return Ok(false);
        };

        if !same_eth(&job.escrow_owner, signer) {
            warn!(job_id, owner = %job.escrow_owner, sender = %signer, "job owned by another wallet");
            return Ok(false);
        }

        if is_create && job.has_started() {
            warn!(job_id, "job already started");
            return Ok(false);
        }

        let job_type = job.job_type.ok_or(PaymentError::MissingJobType(job_id))?;
        let paid = self
            .config
            .job_type(job_type)
            .ok_or(PaymentError::MissingResourceSpec(job_type))?;

        if paid.native {
            // Native bundles have no resource spec yet.
            debug!(job_id, job_type, "native job, resource match skipped");
            return Ok(true);
        }

        let expected = paid
            .resources()?
            .ok_or(PaymentError::MissingResourceSpec(job_type))?;
        let requested = self.policy.aggregate(plugins)?;

        if requested != expected {
            return Err(PaymentError::ResourceMismatch {
                job_type,
                expected: expected.to_string(),
                requested: requested.to_string(),
            }
            .into());
        }

        Ok(true)
    }

    /// [`validate`](Self::validate), turned into an error when not valid.
    ///
    /// A request without a job passes only when unpaid jobs are allowed.
    pub async fn require(
        &self,
        job_id: Option<u64>,
        signer: &str,
        is_create: bool,
        plugins: &[PluginInstanceSpec],
    ) -> ControlResult<()> {
        let Some(job_id) = job_id else {
            if self.config.allow_unpaid_jobs {
                return Ok(());
            }
            return Err(PaymentError::MissingJob.into());
        };

        if self.validate(job_id, signer, is_create, plugins).await? {
            Ok(())
        } else {
            Err(PaymentError::Unpaid { job_id }.into())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::config::{DeploymentConfig, JobTypeSpec};
    use crate::ledger::{JobDetails, MemoryLedger};

    const OWNER: &str = "0x00000000000000000000000000000000000000aa";

    fn job(job_id: u64, job_type: Option<u32>, started: bool) -> JobDetails {
        JobDetails {
            job_id,
            job_type,
            escrow_owner: OWNER.to_owned(),
            start_timestamp: started.then_some(1_700_000_000),
            project_hash: None,
            number_of_nodes_requested: Some(1),
        }
    }

    fn container(memory: &str) -> PluginInstanceSpec {
        let mut config = Map::new();
        config.insert(
            "CONTAINER_RESOURCES".into(),
            json!({"cpu": 1, "memory": memory}),
        );
        PluginInstanceSpec::new("CONTAINER_APP_RUNNER", "CONTAINER_APP_000001", config)
    }

    fn validator(ledger: MemoryLedger) -> PaymentValidator {
        let mut config = PaymentConfig::default();
        config.job_types.insert(
            "3".into(),
            JobTypeSpec {
                native: false,
                cpu: Some(1.0),
                memory: Some(Value::from("512m")),
            },
        );
        config.job_types.insert(
            "9".into(),
            JobTypeSpec {
                native: true,
                ..JobTypeSpec::default()
            },
        );
        PaymentValidator::new(
            Arc::new(ledger),
            DeploymentConfig::default().container_policy(),
            config,
        )
    }

    #[tokio::test]
    async fn exact_resources_pass() {
        let v = validator(MemoryLedger::new().with_job(job(1, Some(3), false)));
        assert!(v.validate(1, OWNER, true, &[container("512m")]).await.unwrap());
        assert!(v.validate(1, OWNER, true, &[container("512m")]).await.unwrap());
    }

    #[tokio::test]
    async fn one_megabyte_over_is_a_mismatch() {
        let v = validator(MemoryLedger::new().with_job(job(1, Some(3), false)));
        let err = v
            .validate(1, OWNER, true, &[container("513m")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PAYMENT4");
    }

    #[tokio::test]
    async fn soft_failures_return_false() {
        let v = validator(MemoryLedger::new().with_job(job(1, Some(3), true)));
        let other = "0x00000000000000000000000000000000000000bb";
        assert!(!v.validate(1, other, false, &[container("512m")]).await.unwrap());
        assert!(!v.validate(1, OWNER, true, &[container("512m")]).await.unwrap());
        assert!(v.validate(1, OWNER, false, &[container("512m")]).await.unwrap());
        assert!(!v.validate(2, OWNER, true, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn hard_failures_are_errors() {
        let v = validator(
            MemoryLedger::new()
                .with_job(job(1, None, false))
                .with_job(job(2, Some(4), false)),
        );
        let err = v.validate(1, OWNER, true, &[]).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT2");
        let err = v.validate(2, OWNER, true, &[]).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT3");
    }

    #[tokio::test]
    async fn native_jobs_skip_resource_matching() {
        let v = validator(MemoryLedger::new().with_job(job(1, Some(9), false)));
        assert!(v.validate(1, OWNER, true, &[container("8g")]).await.unwrap());
    }

    #[tokio::test]
    async fn require_maps_false_to_unpaid() {
        let v = validator(MemoryLedger::new());
        let err = v.require(Some(5), OWNER, true, &[]).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT1");
        let err = v.require(None, OWNER, true, &[]).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT1");
    }
}
