//! In-memory fleet for development mode and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deeploy_state::KvBackend;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::specs::PipelineConfig;

use super::{FleetView, LiveApp, NodeStatus};

/// A command the fleet received.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetCommand {
    Start { node: String, app_id: String },
    Update { node: String, app_id: String },
    Stop { node: String, app_id: String },
    Instance {
        node: String,
        app_id: String,
        signature: String,
        instance_id: String,
        command: Value,
    },
}

#[derive(Debug, Default)]
struct FleetState {
    nodes: BTreeMap<String, NodeStatus>,
    apps: BTreeMap<(String, String), LiveApp>,
    commands: Vec<FleetCommand>,
}

/// Fleet kept in memory.
///
/// Start/update/stop commands are applied to the pipeline table right away.
/// With a responder attached, started and refreshed pipelines also write their
/// confirmation keys, mimicking a node agent.
#[derive(Default)]
pub struct MemoryFleet {
    state: RwLock<FleetState>,
    responder: Option<Arc<dyn KvBackend>>,
}

impl MemoryFleet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer confirmation keys of started pipelines in `kv`.
    #[must_use]
    pub fn with_responder(mut self, kv: Arc<dyn KvBackend>) -> Self {
        self.responder = Some(kv);
        self
    }

    #[must_use]
    pub fn with_node(self, node: NodeStatus) -> Self {
        self.upsert_node(node);
        self
    }

    pub fn upsert_node(&self, node: NodeStatus) {
        self.state.write().nodes.insert(node.address.clone(), node);
    }

    /// Place a pipeline on a node as if it had been running already.
    pub fn insert_app(&self, app: LiveApp) {
        let key = (app.node.clone(), app.pipeline.name.clone());
        self.state.write().apps.insert(key, app);
    }

    #[must_use]
    pub fn commands(&self) -> Vec<FleetCommand> {
        self.state.read().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.write().commands.clear();
    }

    #[must_use]
    pub fn app(&self, node: &str, app_id: &str) -> Option<LiveApp> {
        self.state
            .read()
            .apps
            .get(&(node.to_owned(), app_id.to_owned()))
            .cloned()
    }

    async fn respond(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()> {
        let Some(kv) = &self.responder else {
            return Ok(());
        };
        for (instance_id, key) in pipeline.response_keys() {
            let value = json!({"node": node, "instance_id": instance_id, "status": "ok"});
            kv.put(&key, value.to_string().as_bytes(), None).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryFleet")
            .field("nodes", &state.nodes.len())
            .field("apps", &state.apps.len())
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

#[async_trait]
impl FleetView for MemoryFleet {
    async fn nodes(&self) -> ControlResult<Vec<NodeStatus>> {
        Ok(self.state.read().nodes.values().cloned().collect())
    }

    async fn node(&self, address: &str) -> ControlResult<Option<NodeStatus>> {
        Ok(self.state.read().nodes.get(address).cloned())
    }

    async fn apps(&self) -> ControlResult<Vec<LiveApp>> {
        Ok(self.state.read().apps.values().cloned().collect())
    }

    async fn start_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()> {
        {
            let mut state = self.state.write();
            if !state.nodes.contains_key(node) {
                return Err(ControlError::fleet(format!("unknown node {node}")));
            }
            state.apps.insert(
                (node.to_owned(), pipeline.name.clone()),
                LiveApp {
                    node: node.to_owned(),
                    pipeline: pipeline.clone(),
                    last_config: Some(Utc::now()),
                },
            );
            state.commands.push(FleetCommand::Start {
                node: node.to_owned(),
                app_id: pipeline.name.clone(),
            });
        }
        debug!(node, app_id = %pipeline.name, "pipeline started");
        self.respond(node, pipeline).await
    }

    async fn update_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()> {
        {
            let mut state = self.state.write();
            let key = (node.to_owned(), pipeline.name.clone());
            let Some(app) = state.apps.get_mut(&key) else {
                return Err(ControlError::fleet(format!(
                    "pipeline {} not running on {node}",
                    pipeline.name
                )));
            };
            app.pipeline = pipeline.clone();
            app.last_config = Some(Utc::now());
            state.commands.push(FleetCommand::Update {
                node: node.to_owned(),
                app_id: pipeline.name.clone(),
            });
        }
        debug!(node, app_id = %pipeline.name, "pipeline refreshed");
        self.respond(node, pipeline).await
    }

    async fn stop_pipeline(&self, node: &str, app_id: &str) -> ControlResult<()> {
        let mut state = self.state.write();
        state.apps.remove(&(node.to_owned(), app_id.to_owned()));
        state.commands.push(FleetCommand::Stop {
            node: node.to_owned(),
            app_id: app_id.to_owned(),
        });
        Ok(())
    }

    async fn send_instance_command(
        &self,
        node: &str,
        app_id: &str,
        signature: &str,
        instance_id: &str,
        command: &Value,
    ) -> ControlResult<()> {
        self.state.write().commands.push(FleetCommand::Instance {
            node: node.to_owned(),
            app_id: app_id.to_owned(),
            signature: signature.to_owned(),
            instance_id: instance_id.to_owned(),
            command: command.clone(),
        });
        Ok(())
    }
}
