//! Pipeline lifecycle: create, update, scale-up, delete and commands.
//!
//! Every mutating operation walks the [`Operation`] typestate:
//!
//! ```text
//! Validating ──▶ NodeSelection ──▶ Dispatching ──▶ AwaitingConfirmation ──▶ Confirmed
//!     │               │                │    │                 │
//!     ▼               ▼                ▼    ▼                 ▼
//!   Failed          Failed          Failed Delivered        TimedOut
//! ```
//!
//! Node commands are derived from a [`Plan`] and the dispatched operation is
//! handed to the [`PostponedRequestScheduler`], which owns everything after
//! dispatch.

mod plan;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use deeploy_state::KvBackend;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::to_internal;
use crate::auth::VerifiedSigner;
use crate::clock::{epoch_secs, Clock};
use crate::config::{DeploymentConfig, PaymentConfig};
use crate::engine::Collaborators;
use crate::envelope::Envelope;
use crate::error::{ControlError, ControlResult, NodeError};
use crate::fleet::{FleetView, LiveApp};
use crate::jobs::JobLedger;
use crate::ledger::Ledger;
use crate::payment::PaymentValidator;
use crate::pending::{ConfirmContext, Dispatched, Outcome, PendingKind, PostponedRequestScheduler};
use crate::placement::{NodeSelector, SelectionRequest};
use crate::plugins::{PluginConfigBuilder, PluginInstanceSpec};
use crate::request::{
    AppCommandRequest, DeleteRequest, InstanceCommandRequest, PipelineRequest, ScaleUpRequest,
};
use crate::resources::ContainerPolicy;
use crate::specs::{DeeploySpecs, JobAppType, JobConfig, PipelineConfig};
use crate::state::{Failed, Operation, OperationKind};
use crate::strategy::UpdateStrategy;
use crate::types::{new_app_id, new_response_key};

pub use plan::{Plan, Transition};

/// Top-level pipeline key carrying the input URI.
const PIPELINE_URL_KEY: &str = "URL";

/// Abort the operation on error, logging the failed state.
macro_rules! step {
    ($operation:ident, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => {
                aborted($operation.fail(&err));
                return Err(err);
            }
        }
    };
}

fn aborted(operation: Operation<Failed>) {
    let data = operation.data();
    warn!(
        kind = %data.kind,
        app_id = ?data.app_id,
        job_id = ?data.job_id,
        phase = %operation.phase(),
        error = data.error.as_deref().unwrap_or_default(),
        "operation aborted"
    );
}

/// A pipeline stopped by `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedApp {
    pub node: String,
    pub app_id: String,
    pub job_id: Option<u64>,
}

/// One instance addressed by an app command, serialised as
/// `[node, app_id, signature, instance_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceTarget(pub String, pub String, pub String, pub String);

/// Drives pipelines through their lifecycle.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    fleet: Arc<dyn FleetView>,
    ledger: Arc<dyn Ledger>,
    kv: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    selector: NodeSelector,
    builder: PluginConfigBuilder,
    payment: PaymentValidator,
    scheduler: PostponedRequestScheduler,
    jobs: JobLedger,
    policy: ContainerPolicy,
    strategy: UpdateStrategy,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("strategy", &self.strategy)
            .field("selector", &self.selector)
            .field("payment", &self.payment)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        parts: &Collaborators,
        scheduler: PostponedRequestScheduler,
        deployment: &DeploymentConfig,
        payment: PaymentConfig,
    ) -> Self {
        let policy = deployment.container_policy();
        Self {
            fleet: Arc::clone(&parts.fleet),
            ledger: Arc::clone(&parts.ledger),
            kv: Arc::clone(&parts.kv),
            clock: Arc::clone(&parts.clock),
            selector: NodeSelector::new(
                Arc::clone(&parts.fleet),
                Arc::clone(&parts.ledger),
                policy.clone(),
                deployment.admin_pipeline.clone(),
            ),
            builder: PluginConfigBuilder::default(),
            payment: PaymentValidator::new(Arc::clone(&parts.ledger), policy.clone(), payment),
            scheduler,
            jobs: JobLedger::new(Arc::clone(&parts.kv), Arc::clone(&parts.blob)),
            policy,
            strategy: deployment.update_strategy,
        }
    }

    /// Use a different instance matcher for update requests.
    #[must_use]
    pub fn with_builder(mut self, builder: PluginConfigBuilder) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PostponedRequestScheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn jobs(&self) -> &JobLedger {
        &self.jobs
    }

    /// Deploy a new app.
    pub async fn create(
        &self,
        signer: &VerifiedSigner,
        request: &PipelineRequest,
        base: Envelope,
    ) -> ControlResult<Outcome> {
        let operation = Operation::begin(OperationKind::Create, self.clock.now());
        let alias = step!(operation, create_alias(request));
        let plugins_request = step!(operation, request.plugins_request());
        let plugins = step!(operation, self.builder.build(plugins_request, None));
        step!(
            operation,
            self.payment
                .require(request.job_id, &signer.address, true, &plugins)
                .await
        );

        let app_id = new_app_id(&alias);
        let job_tags = request.job_tags.clone().unwrap_or_default();
        let operation = operation
            .target(Some(app_id.clone()), request.job_id)
            .select_nodes();
        let nodes = step!(
            operation,
            self.selector
                .select(&SelectionRequest {
                    target_nodes: &request.target_nodes,
                    target_nodes_count: request.node_count(),
                    plugins: &plugins,
                    job_tags: &job_tags,
                    node_res_req: request.node_res_req,
                    ..SelectionRequest::default()
                })
                .await
        );

        let now = epoch_secs(self.clock.now());
        let mut specs = DeeploySpecs {
            job_id: request.job_id,
            project_id: request.project_id.clone(),
            project_name: request.project_name.clone(),
            spare_nodes: request.spare_nodes.clone().unwrap_or_default(),
            job_tags,
            job_app_type: self.app_type(&plugins),
            date_created: now,
            date_updated: now,
            job_config: JobConfig {
                pipeline_params: request.pipeline_params.clone().unwrap_or_default(),
            },
            ..DeeploySpecs::default()
        };
        specs.set_target_nodes(&nodes);

        let mut pipeline = PipelineConfig::assemble(
            &app_id,
            Some(alias),
            &signer.address,
            request.pipeline_input_type.clone(),
            specs,
            &plugins,
        );
        if let Some(uri) = &request.pipeline_input_uri {
            pipeline
                .params
                .insert(PIPELINE_URL_KEY.to_owned(), Value::from(uri.as_str()));
        }

        info!(app_id = %app_id, job_id = ?request.job_id, nodes = ?nodes, "creating pipeline");
        let plan = Plan::create(&nodes);
        let operation = operation.dispatch(nodes.clone());
        let response_keys = step!(
            operation,
            self.execute(&plan, &mut pipeline, request.chainstore_response)
                .await
        );
        self.save(request.job_id, &pipeline).await;

        self.scheduler
            .submit(Dispatched {
                kind: PendingKind::Pipeline,
                operation,
                response_keys,
                base_result: base.with_app_id(app_id).with_job_id(request.job_id),
                confirm: ConfirmContext {
                    job_id: request.job_id,
                    nodes_changed: true,
                    nodes,
                    submitted: false,
                },
            })
            .await
    }

    /// Redeploy a running app with a new config and, optionally, new nodes.
    pub async fn update(
        &self,
        signer: &VerifiedSigner,
        request: &PipelineRequest,
        base: Envelope,
    ) -> ControlResult<Outcome> {
        let operation = Operation::begin(OperationKind::Update, self.clock.now());
        let app_id = step!(
            operation,
            request
                .app_id
                .clone()
                .ok_or_else(|| ControlError::request("app_id is required on update"))
        );
        let live = step!(
            operation,
            self.require_live(Some(&app_id), None, &signer.address).await
        );
        let current = nodes_of(&live);
        let live_pipeline = live[0].pipeline.template();
        let live_specs = live_pipeline.deeploy_specs.clone().unwrap_or_default();
        let job_id = step!(operation, reconcile_job_id(request.job_id, live_specs.job_id));

        let plugins_request = step!(operation, request.plugins_request());
        let plugins = step!(
            operation,
            self.builder
                .build(plugins_request, Some(live_pipeline.instances().as_slice()))
        );
        step!(
            operation,
            self.payment
                .require(job_id, &signer.address, false, &plugins)
                .await
        );

        let operation = operation.target(Some(app_id.clone()), job_id).select_nodes();
        let target = step!(
            operation,
            self.update_targets(request, &plugins, &current).await
        );
        let nodes_changed = sorted(&target) != sorted(&current);

        let mut specs = live_specs;
        specs.job_id = job_id;
        specs.set_target_nodes(&target);
        specs.date_updated = epoch_secs(self.clock.now());
        specs.job_app_type = self.app_type(&plugins);
        if let Some(tags) = &request.job_tags {
            specs.job_tags.clone_from(tags);
        }
        if let Some(spare) = &request.spare_nodes {
            specs.spare_nodes.clone_from(spare);
        }
        if request.project_id.is_some() {
            specs.project_id.clone_from(&request.project_id);
        }
        if request.project_name.is_some() {
            specs.project_name.clone_from(&request.project_name);
        }
        if let Some(params) = &request.pipeline_params {
            specs.job_config.pipeline_params.clone_from(params);
        }

        let owner = live_pipeline
            .owner
            .clone()
            .unwrap_or_else(|| signer.address.clone());
        let mut pipeline = PipelineConfig::assemble(
            &app_id,
            request.app_alias.clone().or(live_pipeline.app_alias.clone()),
            owner,
            Some(
                request
                    .pipeline_input_type
                    .clone()
                    .unwrap_or_else(|| live_pipeline.pipeline_type.clone()),
            ),
            specs,
            &plugins,
        );
        let url = request
            .pipeline_input_uri
            .as_deref()
            .map(Value::from)
            .or_else(|| live_pipeline.params.get(PIPELINE_URL_KEY).cloned());
        if let Some(url) = url {
            pipeline.params.insert(PIPELINE_URL_KEY.to_owned(), url);
        }

        let plan = Plan::update(self.strategy, &current, &target);
        info!(
            app_id = %app_id,
            job_id = ?job_id,
            strategy = %self.strategy,
            nodes_changed,
            nodes = ?target,
            "updating pipeline"
        );
        let operation = operation.dispatch(target.clone());
        let response_keys = step!(
            operation,
            self.execute(&plan, &mut pipeline, request.chainstore_response)
                .await
        );
        self.save(job_id, &pipeline).await;

        self.scheduler
            .submit(Dispatched {
                kind: PendingKind::Pipeline,
                operation,
                response_keys,
                base_result: base.with_app_id(app_id).with_job_id(job_id),
                confirm: ConfirmContext {
                    job_id,
                    nodes_changed,
                    nodes: target,
                    submitted: false,
                },
            })
            .await
    }

    /// Add workers to a running job.
    pub async fn scale_up(
        &self,
        signer: &VerifiedSigner,
        request: &ScaleUpRequest,
        base: Envelope,
    ) -> ControlResult<Outcome> {
        let job_id = request.job_id;
        let operation = Operation::begin(OperationKind::ScaleUp, self.clock.now());
        let live = step!(
            operation,
            self.require_live(None, Some(job_id), &signer.address).await
        );
        let current = nodes_of(&live);
        let mut pipeline = live[0].pipeline.template();
        let app_id = pipeline.name.clone();
        let instances = pipeline.instances();
        step!(
            operation,
            self.payment
                .require(Some(job_id), &signer.address, false, &instances)
                .await
        );

        let operation = operation.target(Some(app_id.clone()), Some(job_id)).select_nodes();
        let job_tags = pipeline
            .deeploy_specs
            .as_ref()
            .map(|s| s.job_tags.clone())
            .unwrap_or_default();
        let selected = step!(
            operation,
            self.selector
                .select(&SelectionRequest {
                    target_nodes: &request.target_nodes,
                    target_nodes_count: request.target_nodes_count,
                    plugins: &instances,
                    job_tags: &job_tags,
                    node_res_req: request.node_res_req,
                    exclude: &current,
                    skip_resource_check: &current,
                })
                .await
        );
        let added: Vec<String> = selected
            .into_iter()
            .filter(|n| !current.contains(n))
            .collect();
        if added.is_empty() {
            let err = ControlError::request(format!("job {job_id} already runs on every requested node"));
            aborted(operation.fail(&err));
            return Err(err);
        }

        let target: Vec<String> = current.iter().chain(&added).cloned().collect();
        let specs = pipeline.deeploy_specs.get_or_insert_with(DeeploySpecs::default);
        specs.set_target_nodes(&target);
        specs.date_updated = epoch_secs(self.clock.now());

        info!(app_id = %app_id, job_id, added = ?added, "scaling up job");
        let plan = Plan::scale_up(&current, &added);
        let operation = operation.dispatch(target.clone());
        let response_keys = step!(
            operation,
            self.execute(&plan, &mut pipeline, request.chainstore_response)
                .await
        );
        self.save(Some(job_id), &pipeline).await;

        self.scheduler
            .submit(Dispatched {
                kind: PendingKind::ScaleUp,
                operation,
                response_keys,
                base_result: base.with_app_id(app_id).with_job_id(Some(job_id)),
                confirm: ConfirmContext {
                    job_id: Some(job_id),
                    nodes_changed: true,
                    nodes: target,
                    submitted: false,
                },
            })
            .await
    }

    /// Stop an app everywhere, or on the listed nodes only.
    pub async fn delete(
        &self,
        signer: &VerifiedSigner,
        request: &DeleteRequest,
    ) -> ControlResult<Vec<StoppedApp>> {
        let operation = Operation::begin(OperationKind::Delete, self.clock.now())
            .target(request.app_id.clone(), request.job_id);
        if request.app_id.is_none() && request.job_id.is_none() {
            let err = ControlError::request("one of app_id or job_id is required");
            aborted(operation.fail(&err));
            return Err(err);
        }

        let mut live = step!(
            operation,
            self.discover(request.app_id.as_deref(), request.job_id, &signer.address)
                .await
        );
        if !request.target_nodes.is_empty() {
            let mut only = BTreeSet::new();
            for raw in &request.target_nodes {
                only.insert(step!(operation, to_internal(self.ledger.as_ref(), raw).await));
            }
            live.retain(|app| only.contains(&app.node));
        }

        if live.is_empty() {
            if request.allow_missing {
                info!(app_id = ?request.app_id, job_id = ?request.job_id, "nothing to delete");
                return Ok(Vec::new());
            }
            let err: ControlError =
                NodeError::NotFound(describe(request.app_id.as_deref(), request.job_id)).into();
            aborted(operation.fail(&err));
            return Err(err);
        }

        let operation = operation.select_nodes().dispatch(nodes_of(&live));
        let mut stopped = Vec::with_capacity(live.len());
        for app in &live {
            step!(
                operation,
                self.fleet.stop_pipeline(&app.node, app.app_id()).await
            );
            info!(node = %app.node, app_id = %app.app_id(), "pipeline stopped");
            stopped.push(StoppedApp {
                node: app.node.clone(),
                app_id: app.app_id().to_owned(),
                job_id: app.pipeline.job_id(),
            });
        }

        let operation = operation.deliver();
        debug!(phase = %operation.phase(), count = stopped.len(), "delete delivered");
        Ok(stopped)
    }

    /// Send a command to one instance on the listed nodes.
    ///
    /// Every node must run the app and the instance.
    pub async fn send_instance_command(
        &self,
        signer: &VerifiedSigner,
        request: &InstanceCommandRequest,
    ) -> ControlResult<Vec<String>> {
        if request.target_nodes.is_empty() {
            return Err(ControlError::request("target_nodes is required"));
        }
        let live = self
            .require_live(Some(&request.app_id), None, &signer.address)
            .await?;
        let signature = request.plugin_signature.trim().to_uppercase();

        let mut nodes = Vec::with_capacity(request.target_nodes.len());
        for raw in &request.target_nodes {
            let node = to_internal(self.ledger.as_ref(), raw).await?;
            let app = live
                .iter()
                .find(|app| app.node == node)
                .ok_or_else(|| NodeError::NotFound(format!("{} on {node}", request.app_id)))?;
            let known = app
                .pipeline
                .instances()
                .iter()
                .any(|i| i.instance_id == request.instance_id && i.signature.eq_ignore_ascii_case(&signature));
            if !known {
                return Err(ControlError::plugins(format!(
                    "unknown instance_id {} for {signature} on {node}",
                    request.instance_id
                )));
            }
            nodes.push(node);
        }

        for node in &nodes {
            self.fleet
                .send_instance_command(
                    node,
                    &request.app_id,
                    &signature,
                    &request.instance_id,
                    &request.instance_command,
                )
                .await?;
        }
        info!(app_id = %request.app_id, instance_id = %request.instance_id, nodes = ?nodes, "instance command sent");
        Ok(nodes)
    }

    /// Send a command to every instance of an app on every node.
    pub async fn send_app_command(
        &self,
        signer: &VerifiedSigner,
        request: &AppCommandRequest,
    ) -> ControlResult<Vec<InstanceTarget>> {
        if request.app_id.is_none() && request.job_id.is_none() {
            return Err(ControlError::request("one of app_id or job_id is required"));
        }
        let live = self
            .require_live(request.app_id.as_deref(), request.job_id, &signer.address)
            .await?;

        let mut targets = Vec::new();
        for app in &live {
            for instance in app.pipeline.instances() {
                self.fleet
                    .send_instance_command(
                        &app.node,
                        app.app_id(),
                        &instance.signature,
                        &instance.instance_id,
                        &request.app_command,
                    )
                    .await?;
                targets.push(InstanceTarget(
                    app.node.clone(),
                    app.app_id().to_owned(),
                    instance.signature,
                    instance.instance_id,
                ));
            }
        }
        info!(app_id = ?request.app_id, job_id = ?request.job_id, targets = targets.len(), "app command sent");
        Ok(targets)
    }

    /// Deployed pipelines owned by `owner`, optionally narrowed by app and
    /// job, ordered by node.
    pub async fn discover(
        &self,
        app_id: Option<&str>,
        job_id: Option<u64>,
        owner: &str,
    ) -> ControlResult<Vec<LiveApp>> {
        let mut apps: Vec<LiveApp> = self
            .fleet
            .apps()
            .await?
            .into_iter()
            .filter(|app| app.pipeline.is_deeployed && app.pipeline.is_owned_by(owner))
            .filter(|app| app_id.map_or(true, |id| app.app_id() == id))
            .filter(|app| job_id.map_or(true, |id| app.pipeline.job_id() == Some(id)))
            .collect();
        apps.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.app_id().cmp(b.app_id())));

        let names: BTreeSet<&str> = apps.iter().map(LiveApp::app_id).collect();
        if job_id.is_some() && names.len() > 1 {
            warn!(job_id = ?job_id, apps = ?names, "job runs under several app ids");
        }
        Ok(apps)
    }

    async fn require_live(
        &self,
        app_id: Option<&str>,
        job_id: Option<u64>,
        owner: &str,
    ) -> ControlResult<Vec<LiveApp>> {
        let mut live = self.discover(app_id, job_id, owner).await?;
        if let Some(first) = live.first().map(|a| a.app_id().to_owned()) {
            live.retain(|app| app.app_id() == first);
        }
        if live.is_empty() {
            return Err(NodeError::NotFound(describe(app_id, job_id)).into());
        }
        Ok(live)
    }

    async fn update_targets(
        &self,
        request: &PipelineRequest,
        plugins: &[PluginInstanceSpec],
        current: &[String],
    ) -> ControlResult<Vec<String>> {
        if !request.target_nodes.is_empty() {
            return self
                .selector
                .check_explicit(&SelectionRequest {
                    target_nodes: &request.target_nodes,
                    plugins,
                    skip_resource_check: current,
                    ..SelectionRequest::default()
                })
                .await;
        }
        if let Some(count) = request.node_count() {
            if count != current.len() {
                return Err(ControlError::request(format!(
                    "target_nodes_count {count} differs from the {} running nodes; use scale_up_job_workers",
                    current.len()
                )));
            }
        }
        Ok(current.to_vec())
    }

    /// Apply a plan. Returns the confirmation keys per serving node.
    ///
    /// Keys are stamped into the pipeline's specs and reset to `null` in the
    /// chainstore before any node receives them.
    async fn execute(
        &self,
        plan: &Plan,
        pipeline: &mut PipelineConfig,
        confirmable: bool,
    ) -> ControlResult<BTreeMap<String, Vec<String>>> {
        let mut node_keys: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        if confirmable {
            let instance_ids: Vec<String> = pipeline
                .instances()
                .into_iter()
                .map(|i| i.instance_id)
                .collect();
            for node in plan.serving_nodes() {
                let keys = instance_ids
                    .iter()
                    .map(|id| (id.clone(), new_response_key(id)))
                    .collect();
                node_keys.insert(node, keys);
            }
        }

        let response_keys: BTreeMap<String, Vec<String>> = node_keys
            .iter()
            .map(|(node, keys)| (node.clone(), keys.values().cloned().collect()))
            .collect();
        if let Some(specs) = pipeline.deeploy_specs.as_mut() {
            specs.chainstore_response_keys.clone_from(&response_keys);
        }
        for key in response_keys.values().flatten() {
            self.kv.put(key, b"null", None).await?;
        }

        let unstamped = BTreeMap::new();
        for transition in plan.transitions() {
            for node in transition.nodes() {
                let keys = node_keys.get(node).unwrap_or(&unstamped);
                match transition {
                    Transition::Stop(_) => self.fleet.stop_pipeline(node, &pipeline.name).await?,
                    Transition::Create(_) => {
                        let copy = pipeline.for_node(keys, std::slice::from_ref(node));
                        self.fleet.start_pipeline(node, &copy).await?;
                    }
                    Transition::Refresh(_) => {
                        let copy = pipeline.for_node(keys, std::slice::from_ref(node));
                        self.fleet.update_pipeline(node, &copy).await?;
                    }
                }
            }
            debug!(
                app_id = %pipeline.name,
                step = transition.as_str(),
                nodes = ?transition.nodes(),
                "transition applied"
            );
        }

        Ok(response_keys)
    }

    async fn save(&self, job_id: Option<u64>, pipeline: &PipelineConfig) {
        if let Some(job_id) = job_id {
            self.jobs.save(job_id, pipeline).await;
        }
    }

    fn app_type(&self, plugins: &[PluginInstanceSpec]) -> JobAppType {
        if self
            .policy
            .all_containers(plugins.iter().map(|p| p.signature.as_str()))
        {
            JobAppType::Container
        } else {
            JobAppType::Native
        }
    }
}

fn create_alias(request: &PipelineRequest) -> ControlResult<String> {
    if request.app_id.is_some() {
        return Err(ControlError::request(
            "app_id is assigned on create; use update_pipeline to change an app",
        ));
    }
    request
        .app_alias
        .as_deref()
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ControlError::request("app_alias is required"))
}

fn reconcile_job_id(requested: Option<u64>, live: Option<u64>) -> ControlResult<Option<u64>> {
    match (requested, live) {
        (Some(requested), Some(live)) if requested != live => Err(ControlError::request(format!(
            "job_id {requested} does not match the deployed job {live}"
        ))),
        (requested, live) => Ok(live.or(requested)),
    }
}

fn nodes_of(apps: &[LiveApp]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    apps.iter()
        .filter(|app| seen.insert(app.node.as_str()))
        .map(|app| app.node.clone())
        .collect()
}

fn sorted(nodes: &[String]) -> Vec<&String> {
    let mut out: Vec<&String> = nodes.iter().collect();
    out.sort();
    out
}

fn describe(app_id: Option<&str>, job_id: Option<u64>) -> String {
    match (app_id, job_id) {
        (Some(app_id), Some(job_id)) => format!("app {app_id} (job {job_id})"),
        (Some(app_id), None) => format!("app {app_id}"),
        (None, Some(job_id)) => format!("job {job_id}"),
        (None, None) => "request".to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn job_id_cannot_be_reassigned() {
        assert_eq!(reconcile_job_id(None, Some(4)).unwrap(), Some(4));
        assert_eq!(reconcile_job_id(Some(4), Some(4)).unwrap(), Some(4));
        assert_eq!(reconcile_job_id(Some(9), None).unwrap(), Some(9));
        let err = reconcile_job_id(Some(9), Some(4)).unwrap_err();
        assert_eq!(err.code(), "REQUEST1");
    }

    #[test]
    fn create_needs_an_alias_and_no_app_id() {
        let request = PipelineRequest {
            app_alias: Some("  web ".into()),
            ..PipelineRequest::default()
        };
        assert_eq!(create_alias(&request).unwrap(), "web");

        let blank = PipelineRequest {
            app_alias: Some(" ".into()),
            ..PipelineRequest::default()
        };
        assert!(create_alias(&blank).is_err());

        let with_id = PipelineRequest {
            app_id: Some("web_1234567".into()),
            ..request
        };
        assert!(create_alias(&with_id).is_err());
    }

    #[test]
    fn describe_names_what_was_looked_up() {
        assert_eq!(describe(Some("a"), None), "app a");
        assert_eq!(describe(None, Some(3)), "job 3");
    }
}
