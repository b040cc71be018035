//! Endpoint-level composition of the orchestration engine.
//!
//! Each endpoint method takes the raw request body and never fails: errors
//! are caught here, once, and rendered as `fail` envelopes.

use std::collections::BTreeMap;
use std::sync::Arc;

use deeploy_state::{BlobBackend, KvBackend, MemoryBlob, MemoryKv};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::address::same_eth;
use crate::auth::{Access, RequestVerifier, VerifiedSigner};
use crate::clock::{Clock, SystemClock};
use crate::config::DeeployConfig;
use crate::envelope::Envelope;
use crate::error::{AuthError, ControlError, ControlResult};
use crate::fleet::{FleetView, MemoryFleet};
use crate::ledger::{Ledger, MemoryLedger};
use crate::orchestrator::PipelineOrchestrator;
use crate::pending::{Outcome, PendingRequestStore, PostponedRequestScheduler};
use crate::request::{
    AppCommandRequest, DeleteRequest, EmptyRequest, InstanceCommandRequest, JobRequest,
    PipelineRequest, ScaleUpRequest, SignedRequest,
};
use crate::specs::PipelineConfig;
use crate::types::DeeployStatus;

/// External collaborators the engine is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub fleet: Arc<dyn FleetView>,
    pub ledger: Arc<dyn Ledger>,
    /// Chainstore.
    pub kv: Arc<dyn KvBackend>,
    pub blob: Arc<dyn BlobBackend>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Empty in-memory collaborators on the system clock.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            fleet: Arc::new(MemoryFleet::new()),
            ledger: Arc::new(MemoryLedger::new()),
            kv: Arc::new(MemoryKv::new()),
            blob: Arc::new(MemoryBlob::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
enum PipelineAction {
    Create,
    Update,
}

/// The orchestration engine behind the HTTP surface.
#[derive(Clone)]
pub struct DeeployEngine {
    verifier: RequestVerifier,
    orchestrator: PipelineOrchestrator,
    fleet: Arc<dyn FleetView>,
    ledger: Arc<dyn Ledger>,
    verbose: u8,
}

impl std::fmt::Debug for DeeployEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeeployEngine")
            .field("orchestrator", &self.orchestrator)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl DeeployEngine {
    #[must_use]
    pub fn new(
        parts: &Collaborators,
        pending: Arc<dyn PendingRequestStore>,
        config: &DeeployConfig,
    ) -> Self {
        let scheduler = PostponedRequestScheduler::new(
            pending,
            Arc::clone(&parts.kv),
            Arc::clone(&parts.ledger),
            Arc::clone(&parts.clock),
            config.pending.poll_interval(),
            config.pending.timeout(),
        );
        Self {
            verifier: RequestVerifier::new(
                Arc::clone(&parts.ledger),
                Arc::clone(&parts.clock),
                config.auth.nonce_max_age(),
            ),
            orchestrator: PipelineOrchestrator::new(
                parts,
                scheduler,
                &config.deployment,
                config.payment.clone(),
            ),
            fleet: Arc::clone(&parts.fleet),
            ledger: Arc::clone(&parts.ledger),
            verbose: config.api.verbose,
        }
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PostponedRequestScheduler {
        self.orchestrator.scheduler()
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Apps the signer owns, by node then app id.
    pub async fn get_apps(&self, raw: Value) -> Envelope {
        self.settle(self.try_get_apps(&raw).await, raw)
    }

    pub async fn create_pipeline(&self, raw: Value) -> Outcome {
        self.settle_outcome(self.try_pipeline(&raw, PipelineAction::Create).await, raw)
    }

    pub async fn update_pipeline(&self, raw: Value) -> Outcome {
        self.settle_outcome(self.try_pipeline(&raw, PipelineAction::Update).await, raw)
    }

    pub async fn scale_up_job_workers(&self, raw: Value) -> Outcome {
        self.settle_outcome(self.try_scale_up(&raw).await, raw)
    }

    pub async fn delete_pipeline(&self, raw: Value) -> Envelope {
        self.settle(self.try_delete(&raw).await, raw)
    }

    pub async fn send_instance_command(&self, raw: Value) -> Envelope {
        self.settle(self.try_instance_command(&raw).await, raw)
    }

    pub async fn send_app_command(&self, raw: Value) -> Envelope {
        self.settle(self.try_app_command(&raw).await, raw)
    }

    /// Oracle-only job summary.
    pub async fn get_oracle_job_details(&self, raw: Value) -> Envelope {
        self.settle(self.try_oracle_job_details(&raw).await, raw)
    }

    /// The stored snapshot of a job, for its owner.
    pub async fn get_r1fs_job_pipeline(&self, raw: Value) -> Envelope {
        self.settle(self.try_job_pipeline(&raw).await, raw)
    }

    /// One scheduling step for a postponed request.
    pub async fn solve(&self, pending_id: &crate::types::PendingId) -> Outcome {
        match self.scheduler().solve(pending_id).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Ready(self.failure(&e, Value::Null)),
        }
    }

    fn settle(&self, result: ControlResult<Envelope>, raw: Value) -> Envelope {
        result.unwrap_or_else(|e| self.failure(&e, raw))
    }

    fn settle_outcome(&self, result: ControlResult<Outcome>, raw: Value) -> Outcome {
        result.unwrap_or_else(|e| Outcome::Ready(self.failure(&e, raw)))
    }

    fn failure(&self, error: &ControlError, raw: Value) -> Envelope {
        warn!(code = error.code(), error = %error, "request failed");
        Envelope::failure(error, raw, self.verbose)
    }

    async fn authenticate(
        &self,
        raw: &Value,
        access: Access,
    ) -> ControlResult<(SignedRequest, VerifiedSigner)> {
        let request = SignedRequest::from_value(raw.clone())?;
        let signer = self.verifier.verify(&request, access).await?;
        Ok((request, signer))
    }

    async fn try_get_apps(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let _: EmptyRequest = request.body()?;

        let mut apps: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for app in self.fleet.apps().await? {
            if !app.pipeline.is_owned_by(&signer.address) {
                continue;
            }
            let entry = json!({
                "owner": app.pipeline.owner,
                "is_deeployed": app.pipeline.is_deeployed,
                "last_config": app.last_config,
                "deeploy_specs": app.pipeline.deeploy_specs,
                "plugins": app.pipeline.plugins,
            });
            apps.entry(app.node.clone())
                .or_default()
                .insert(app.app_id().to_owned(), entry);
        }

        debug!(sender = %signer.address, nodes = apps.len(), "apps listed");
        Ok(Envelope::new(DeeployStatus::Success, Value::Null)
            .with_auth(signer.auth_summary())
            .with_extra("apps", serde_json::to_value(apps)?))
    }

    async fn try_pipeline(&self, raw: &Value, action: PipelineAction) -> ControlResult<Outcome> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let body: PipelineRequest = request.body()?;
        let echo = if body.return_request {
            raw.clone()
        } else {
            body.summary(None)
        };
        let base = Envelope::new(DeeployStatus::Pending, echo).with_auth(signer.auth_summary());

        match action {
            PipelineAction::Create => self.orchestrator.create(&signer, &body, base).await,
            PipelineAction::Update => self.orchestrator.update(&signer, &body, base).await,
        }
    }

    async fn try_scale_up(&self, raw: &Value) -> ControlResult<Outcome> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let body: ScaleUpRequest = request.body()?;
        let echo = if body.return_request {
            raw.clone()
        } else {
            json!({
                "job_id": body.job_id,
                "target_nodes": body.target_nodes,
                "target_nodes_count": body.target_nodes_count.unwrap_or(0),
            })
        };
        let base = Envelope::new(DeeployStatus::Pending, echo).with_auth(signer.auth_summary());
        self.orchestrator.scale_up(&signer, &body, base).await
    }

    async fn try_delete(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let body: DeleteRequest = request.body()?;
        let stopped = self.orchestrator.delete(&signer, &body).await?;

        let mut echo = Map::new();
        echo.insert("status".into(), json!(DeeployStatus::Success));
        if let Some(app_id) = &body.app_id {
            echo.insert("app_id".into(), json!(app_id));
        }
        if let Some(job_id) = body.job_id {
            echo.insert("job_id".into(), json!(job_id));
        }
        echo.insert("targets".into(), serde_json::to_value(&stopped)?);

        Ok(Envelope::new(DeeployStatus::Success, Value::Object(echo))
            .with_auth(signer.auth_summary())
            .with_job_id(body.job_id))
    }

    async fn try_instance_command(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let body: InstanceCommandRequest = request.body()?;
        let nodes = self.orchestrator.send_instance_command(&signer, &body).await?;

        let echo = json!({
            "status": DeeployStatus::CommandDelivered,
            "app_id": body.app_id,
            "target_nodes": nodes,
        });
        Ok(Envelope::new(DeeployStatus::CommandDelivered, echo)
            .with_auth(signer.auth_summary())
            .with_app_id(body.app_id))
    }

    async fn try_app_command(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let body: AppCommandRequest = request.body()?;
        let targets = self.orchestrator.send_app_command(&signer, &body).await?;

        let echo = json!({
            "status": DeeployStatus::CommandDelivered,
            "app_id": body.app_id,
            "job_id": body.job_id,
        });
        Ok(Envelope::new(DeeployStatus::CommandDelivered, echo)
            .with_auth(signer.auth_summary())
            .with_job_id(body.job_id)
            .with_extra("targets", serde_json::to_value(targets)?))
    }

    async fn try_oracle_job_details(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::OracleOnly).await?;
        let JobRequest { job_id } = request.body()?;

        let job = self
            .ledger
            .job_details(job_id)
            .await?
            .ok_or_else(|| ControlError::request(format!("job {job_id} not found on the ledger")))?;

        let pipeline = match self.orchestrator.jobs().get(job_id).await? {
            Some(snapshot) => Some(snapshot),
            None => self.live_pipeline(job_id).await?,
        };
        let (project_name, job_name) = pipeline.as_ref().map(job_labels).unwrap_or_default();

        info!(job_id, oracle = %signer.address, "job details served");
        Ok(Envelope::new(DeeployStatus::Success, json!({"job_id": job_id}))
            .with_auth(signer.auth_summary())
            .with_job_id(Some(job_id))
            .with_extra("project_name", project_name)
            .with_extra("job_name", job_name)
            .with_extra("job_type", json!(job.job_type)))
    }

    async fn try_job_pipeline(&self, raw: &Value) -> ControlResult<Envelope> {
        let (request, signer) = self.authenticate(raw, Access::Any).await?;
        let JobRequest { job_id } = request.body()?;

        let snapshot = self
            .orchestrator
            .jobs()
            .get(job_id)
            .await?
            .ok_or_else(|| ControlError::request(format!("no pipeline stored for job {job_id}")))?;

        let snapshot_owner = snapshot
            .get("OWNER")
            .and_then(Value::as_str)
            .is_some_and(|owner| same_eth(owner, &signer.address));
        let owner = if snapshot_owner {
            true
        } else {
            self.ledger
                .job_details(job_id)
                .await?
                .is_some_and(|job| same_eth(&job.escrow_owner, &signer.address))
        };
        if !owner {
            return Err(AuthError::NotOwner {
                sender: signer.address,
                resource: format!("job {job_id}"),
            }
            .into());
        }

        Ok(Envelope::new(DeeployStatus::Success, json!({"job_id": job_id}))
            .with_auth(signer.auth_summary())
            .with_job_id(Some(job_id))
            .with_extra("pipeline", snapshot))
    }

    async fn live_pipeline(&self, job_id: u64) -> ControlResult<Option<Value>> {
        let live: Option<PipelineConfig> = self
            .fleet
            .apps()
            .await?
            .into_iter()
            .find(|app| app.pipeline.job_id() == Some(job_id))
            .map(|app| app.pipeline);
        live.map(|p| serde_json::to_value(p).map_err(ControlError::from))
            .transpose()
    }
}

/// `(project_name, job_name)` of a pipeline document.
fn job_labels(pipeline: &Value) -> (Value, Value) {
    let project_name = pipeline
        .pointer("/DEEPLOY_SPECS/project_name")
        .cloned()
        .unwrap_or(Value::Null);
    let job_name = pipeline.get("APP_ALIAS").cloned().unwrap_or(Value::Null);
    (project_name, job_name)
}
