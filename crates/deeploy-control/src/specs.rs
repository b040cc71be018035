//! Node-side pipeline documents and their orchestration metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plugins::PluginInstanceSpec;

/// Instance config key carrying the confirmation key the agent writes to.
pub const CHAINSTORE_RESPONSE_KEY: &str = "CHAINSTORE_RESPONSE_KEY";

/// Instance config key listing the nodes that share the confirmation keys.
pub const CHAINSTORE_PEERS: &str = "CHAINSTORE_PEERS";

/// Workload family of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAppType {
    /// Every plugin is a container runner.
    #[default]
    Container,
    /// At least one plugin runs natively on the node.
    Native,
}

/// Pipeline-level job configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub pipeline_params: Map<String, Value>,
}

/// Orchestration metadata attached to every deployed pipeline.
///
/// Fields this engine does not know about are kept in `extra` and carried
/// forward untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeeploySpecs {
    #[serde(default)]
    pub job_id: Option<u64>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub nr_target_nodes: usize,
    #[serde(default)]
    pub current_target_nodes: Vec<String>,
    #[serde(default)]
    pub spare_nodes: Vec<String>,
    #[serde(default)]
    pub job_tags: Vec<String>,
    #[serde(default)]
    pub job_app_type: JobAppType,
    #[serde(default)]
    pub date_created: f64,
    #[serde(default)]
    pub date_updated: f64,
    #[serde(default)]
    pub chainstore_response_keys: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub job_config: JobConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeeploySpecs {
    /// Point the specs at a node set, keeping the count in step.
    pub fn set_target_nodes(&mut self, nodes: &[String]) {
        self.current_target_nodes = nodes.to_vec();
        self.nr_target_nodes = nodes.len();
    }

    /// Whether this job was deployed with confirmation keys.
    #[must_use]
    pub fn is_confirmable(&self) -> bool {
        self.chainstore_response_keys.values().any(|k| !k.is_empty())
    }
}

/// One configured plugin instance inside a pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(rename = "INSTANCE_ID")]
    pub instance_id: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

/// All instances of one plugin signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    #[serde(rename = "SIGNATURE")]
    pub signature: String,
    #[serde(rename = "INSTANCES", default)]
    pub instances: Vec<InstanceConfig>,
}

/// A pipeline as the node agents receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// App id; unique per node.
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "TYPE", default = "default_pipeline_type")]
    pub pipeline_type: String,
    #[serde(rename = "APP_ALIAS", default)]
    pub app_alias: Option<String>,
    #[serde(rename = "OWNER", default)]
    pub owner: Option<String>,
    #[serde(rename = "IS_DEEPLOYED", default)]
    pub is_deeployed: bool,
    #[serde(rename = "DEEPLOY_SPECS", default)]
    pub deeploy_specs: Option<DeeploySpecs>,
    #[serde(rename = "PLUGINS", default)]
    pub plugins: Vec<PluginEntry>,
    /// Pipeline parameters and anything else set at the top level.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

fn default_pipeline_type() -> String {
    "void".to_owned()
}

impl PipelineConfig {
    /// Build a pipeline document from canonical plugin instances.
    #[must_use]
    pub fn assemble(
        name: impl Into<String>,
        app_alias: Option<String>,
        owner: impl Into<String>,
        pipeline_type: Option<String>,
        specs: DeeploySpecs,
        plugins: &[PluginInstanceSpec],
    ) -> Self {
        let params = specs.job_config.pipeline_params.clone();
        let mut entries: Vec<PluginEntry> = Vec::new();
        for plugin in plugins {
            let instance = InstanceConfig {
                instance_id: plugin.instance_id.clone(),
                config: plugin.config.clone(),
            };
            match entries.iter_mut().find(|e| e.signature == plugin.signature) {
                Some(entry) => entry.instances.push(instance),
                None => entries.push(PluginEntry {
                    signature: plugin.signature.clone(),
                    instances: vec![instance],
                }),
            }
        }

        Self {
            name: name.into(),
            pipeline_type: pipeline_type.unwrap_or_else(default_pipeline_type),
            app_alias,
            owner: Some(owner.into()),
            is_deeployed: true,
            deeploy_specs: Some(specs),
            plugins: entries,
            params,
        }
    }

    /// Flattened view of the plugin instances.
    #[must_use]
    pub fn instances(&self) -> Vec<PluginInstanceSpec> {
        self.plugins
            .iter()
            .flat_map(|entry| {
                entry.instances.iter().map(|i| {
                    PluginInstanceSpec::new(&entry.signature, &i.instance_id, i.config.clone())
                })
            })
            .collect()
    }

    /// Signatures in document order.
    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.signature.as_str())
    }

    #[must_use]
    pub fn job_id(&self) -> Option<u64> {
        self.deeploy_specs.as_ref().and_then(|s| s.job_id)
    }

    #[must_use]
    pub fn is_owned_by(&self, sender: &str) -> bool {
        self.owner
            .as_deref()
            .is_some_and(|owner| crate::address::same_eth(owner, sender))
    }

    /// Copy for one node: stamps each instance with its confirmation key.
    ///
    /// Instances missing from `keys` lose any stale key they carried.
    #[must_use]
    pub fn for_node(&self, keys: &BTreeMap<String, String>, peers: &[String]) -> Self {
        let mut pipeline = self.clone();
        for entry in &mut pipeline.plugins {
            for instance in &mut entry.instances {
                match keys.get(&instance.instance_id) {
                    Some(key) => {
                        instance
                            .config
                            .insert(CHAINSTORE_RESPONSE_KEY.to_owned(), Value::String(key.clone()));
                        instance.config.insert(
                            CHAINSTORE_PEERS.to_owned(),
                            Value::Array(peers.iter().cloned().map(Value::String).collect()),
                        );
                    }
                    None => {
                        instance.config.remove(CHAINSTORE_RESPONSE_KEY);
                        instance.config.remove(CHAINSTORE_PEERS);
                    }
                }
            }
        }
        pipeline
    }

    /// Confirmation keys currently stamped on the instances, by instance id.
    #[must_use]
    pub fn response_keys(&self) -> BTreeMap<String, String> {
        self.plugins
            .iter()
            .flat_map(|e| e.instances.iter())
            .filter_map(|i| {
                i.config
                    .get(CHAINSTORE_RESPONSE_KEY)
                    .and_then(Value::as_str)
                    .map(|k| (i.instance_id.clone(), k.to_owned()))
            })
            .collect()
    }

    /// Template form: per-node confirmation stamps removed.
    #[must_use]
    pub fn template(&self) -> Self {
        self.for_node(&BTreeMap::new(), &[])
    }
}
