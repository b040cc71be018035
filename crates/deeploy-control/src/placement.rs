//! Node selection.
//!
//! Explicit mode validates the nodes a caller named. Count mode picks the
//! best `n` eligible nodes from the fleet:
//!
//! 1. online, non-supervisor, not excluded
//! 2. advertises the container capability when containers are requested
//! 3. carries every job tag and meets `node_res_req`
//! 4. isolation: native workloads only land on empty nodes; container
//!    workloads avoid nodes running non-container pipelines
//! 5. `used + requested <= total` for cpu and memory
//!
//! Candidates are ordered by score (desc), last deployment (asc) and
//! address (asc), so a fixed fleet snapshot always yields the same list.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::address::to_internal;
use crate::error::{ControlError, ControlResult, NodeError};
use crate::fleet::{FleetView, LiveApp, NodeStatus};
use crate::ledger::Ledger;
use crate::plugins::PluginInstanceSpec;
use crate::resources::{ContainerPolicy, NodeResourceProfile, ResourceSpec};

/// What to place and where it may go.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionRequest<'a> {
    /// Explicit nodes, ETH or internal form. Takes precedence over the count.
    pub target_nodes: &'a [String],
    pub target_nodes_count: Option<usize>,
    pub plugins: &'a [PluginInstanceSpec],
    pub job_tags: &'a [String],
    /// Minimum total capacity a node must have.
    pub node_res_req: Option<ResourceSpec>,
    /// Internal addresses never picked in count mode.
    pub exclude: &'a [String],
    /// Explicit nodes that already host the app; their resources are not checked.
    pub skip_resource_check: &'a [String],
}

/// Selects nodes for a deployment.
#[derive(Clone)]
pub struct NodeSelector {
    fleet: Arc<dyn FleetView>,
    ledger: Arc<dyn Ledger>,
    policy: ContainerPolicy,
    admin_pipeline: String,
}

impl std::fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSelector")
            .field("policy", &self.policy)
            .field("admin_pipeline", &self.admin_pipeline)
            .finish_non_exhaustive()
    }
}

impl NodeSelector {
    #[must_use]
    pub fn new(
        fleet: Arc<dyn FleetView>,
        ledger: Arc<dyn Ledger>,
        policy: ContainerPolicy,
        admin_pipeline: impl Into<String>,
    ) -> Self {
        Self {
            fleet,
            ledger,
            policy,
            admin_pipeline: admin_pipeline.into(),
        }
    }

    /// Internal addresses of the selected nodes, in selection order.
    pub async fn select(&self, request: &SelectionRequest<'_>) -> ControlResult<Vec<String>> {
        if !request.target_nodes.is_empty() {
            return self.check_explicit(request).await;
        }
        match request.target_nodes_count {
            Some(count) if count > 0 => self.select_by_count(request, count).await,
            _ => Err(ControlError::request(
                "either target_nodes or target_nodes_count is required",
            )),
        }
    }

    /// Resolve and validate caller-named nodes.
    pub async fn check_explicit(&self, request: &SelectionRequest<'_>) -> ControlResult<Vec<String>> {
        let requested = self.policy.aggregate(request.plugins)?;
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(request.target_nodes.len());

        for raw in request.target_nodes {
            let address = to_internal(self.ledger.as_ref(), raw).await?;
            if !seen.insert(address.clone()) {
                continue;
            }

            let status = self
                .fleet
                .node(&address)
                .await?
                .ok_or_else(|| NodeError::Offline(address.clone()))?;
            if status.supervisor {
                return Err(NodeError::SupervisorIneligible(address).into());
            }
            if !status.online {
                return Err(NodeError::Offline(address).into());
            }

            if !requested.is_zero() && !request.skip_resource_check.contains(&address) {
                let details = status.available().deficits(&requested);
                if !details.is_empty() {
                    return Err(NodeError::ResourceDeficit {
                        node: address,
                        details,
                    }
                    .into());
                }
            }
            nodes.push(address);
        }

        Ok(nodes)
    }

    async fn select_by_count(
        &self,
        request: &SelectionRequest<'_>,
        count: usize,
    ) -> ControlResult<Vec<String>> {
        let online: Vec<NodeStatus> = self
            .fleet
            .nodes()
            .await?
            .into_iter()
            .filter(|n| n.online && !n.supervisor)
            .collect();
        if online.is_empty() {
            return Err(NodeError::NoneOnline.into());
        }

        let apps = self.deployed_apps_by_node().await?;
        let requested = self.policy.aggregate(request.plugins)?;
        let signatures: Vec<&str> = request.plugins.iter().map(|p| p.signature.as_str()).collect();
        let container_job = self.policy.all_containers(signatures.iter().copied());
        let needs_capability = signatures.iter().any(|s| self.policy.is_container(s));

        let mut candidates: Vec<NodeResourceProfile> = Vec::new();
        for node in &online {
            if request.exclude.contains(&node.address) {
                continue;
            }
            if needs_capability && !node.capabilities.contains(&self.policy.capability) {
                continue;
            }
            if !request.job_tags.iter().all(|tag| node.has_tag(tag)) {
                continue;
            }
            if let Some(min) = &request.node_res_req {
                if node.total_cpu_cores < min.cpu || node.total_memory_bytes < min.memory_bytes {
                    continue;
                }
            }

            let hosted = apps.get(&node.address).map(Vec::as_slice).unwrap_or_default();
            if !container_job && !hosted.is_empty() {
                continue;
            }
            if container_job
                && hosted
                    .iter()
                    .any(|app| !self.policy.all_containers(app.pipeline.signatures()))
            {
                continue;
            }

            let profile = self.profile(node, hosted);
            if !profile.fits(&requested) {
                debug!(node = %node.address, free = %profile.free(), %requested, "node lacks capacity");
                continue;
            }
            candidates.push(profile);
        }

        candidates.sort_by(rank);

        if candidates.len() < count {
            return Err(NodeError::CountDeficit {
                required: count,
                available: candidates.len(),
            }
            .into());
        }

        let selected: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|p| p.address)
            .collect();
        debug!(?selected, "nodes selected by count");
        Ok(selected)
    }

    /// Deployed, non-admin pipelines per node.
    async fn deployed_apps_by_node(&self) -> ControlResult<BTreeMap<String, Vec<LiveApp>>> {
        let mut by_node: BTreeMap<String, Vec<LiveApp>> = BTreeMap::new();
        for app in self.fleet.apps().await? {
            if app.pipeline.name.eq_ignore_ascii_case(&self.admin_pipeline) || !app.pipeline.is_deeployed {
                continue;
            }
            by_node.entry(app.node.clone()).or_default().push(app);
        }
        Ok(by_node)
    }

    fn profile(&self, node: &NodeStatus, hosted: &[LiveApp]) -> NodeResourceProfile {
        let mut used = ResourceSpec::default();
        let mut last_deployment_ts: f64 = 0.0;

        for app in hosted {
            match self.policy.aggregate(&app.pipeline.instances()) {
                Ok(resources) => used = used.plus(resources),
                Err(e) => {
                    warn!(node = %node.address, app_id = %app.pipeline.name, error = %e, "unreadable resources on live pipeline");
                }
            }
            if let Some(specs) = &app.pipeline.deeploy_specs {
                last_deployment_ts = last_deployment_ts
                    .max(specs.date_created)
                    .max(specs.date_updated);
            }
        }

        NodeResourceProfile {
            address: node.address.clone(),
            cpu_total: node.total_cpu_cores,
            cpu_used: used.cpu,
            mem_total_bytes: node.total_memory_bytes,
            mem_used_bytes: used.memory_bytes,
            score: node.score,
            last_deployment_ts,
        }
    }
}

fn rank(a: &NodeResourceProfile, b: &NodeResourceProfile) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.last_deployment_ts.total_cmp(&b.last_deployment_ts))
        .then_with(|| a.address.cmp(&b.address))
}
