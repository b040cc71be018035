//! Live view of the node fleet and the command channel to it.

mod client;
mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ControlResult;
use crate::resources::ResourceSpec;
use crate::specs::PipelineConfig;

pub use client::FleetClient;
pub use memory::{FleetCommand, MemoryFleet};

/// Heartbeat-derived state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Internal address.
    pub address: String,
    pub eth_address: String,
    pub online: bool,
    #[serde(default)]
    pub supervisor: bool,
    /// Reputation score; higher is better.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub total_cpu_cores: f64,
    pub total_memory_bytes: u64,
    pub available_cpu_cores: f64,
    pub available_memory_bytes: u64,
}

impl NodeStatus {
    #[must_use]
    pub const fn total(&self) -> ResourceSpec {
        ResourceSpec::new(self.total_cpu_cores, self.total_memory_bytes)
    }

    #[must_use]
    pub const fn available(&self) -> ResourceSpec {
        ResourceSpec::new(self.available_cpu_cores, self.available_memory_bytes)
    }

    /// A tag counts only when present with a truthy value.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        match self.tags.get(tag) {
            None | Some(Value::Null | Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

/// A pipeline running on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveApp {
    /// Internal address of the hosting node.
    pub node: String,
    pub pipeline: PipelineConfig,
    /// When the node last applied this pipeline's config.
    #[serde(default)]
    pub last_config: Option<DateTime<Utc>>,
}

impl LiveApp {
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.pipeline.name
    }
}

/// Node discovery and pipeline commands.
///
/// Commands are fire-and-forget: `Ok` means the command was handed to the
/// node, not that it has been applied.
#[async_trait]
pub trait FleetView: Send + Sync {
    async fn nodes(&self) -> ControlResult<Vec<NodeStatus>>;

    async fn node(&self, address: &str) -> ControlResult<Option<NodeStatus>>;

    /// Every pipeline on every node.
    async fn apps(&self) -> ControlResult<Vec<LiveApp>>;

    async fn start_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()>;

    /// Replace a running pipeline's config without restarting it.
    async fn update_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()>;

    async fn stop_pipeline(&self, node: &str, app_id: &str) -> ControlResult<()>;

    async fn send_instance_command(
        &self,
        node: &str,
        app_id: &str,
        signature: &str,
        instance_id: &str,
        command: &Value,
    ) -> ControlResult<()>;
}
