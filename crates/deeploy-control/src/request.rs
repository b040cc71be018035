//! Signed request parsing.
//!
//! A request body is a JSON object. The signature fields are split off and
//! the rest is the signed payload; typed endpoint bodies are parsed from the
//! payload with unknown fields rejected.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::canonical::to_canonical_json;
use crate::error::{ControlError, ControlResult};
use crate::plugins::PluginsRequest;
use crate::resources::ResourceSpec;

const SIGNATURE_KEYS: [&str; 2] = ["signature", "EE_ETH_SIGN"];
const ETH_SENDER_KEYS: [&str; 2] = ["eth_sender", "EE_ETH_SENDER"];
const NODE_SENDER_KEYS: [&str; 2] = ["sender", "EE_SENDER"];
const NONCE_KEY: &str = "nonce";

/// A request split into its signature and its signed payload.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    payload: Map<String, Value>,
    signature: String,
    sender: String,
    node_sender: Option<String>,
    raw: Value,
}

fn take_field(map: &mut Map<String, Value>, keys: &[&str]) -> ControlResult<Option<String>> {
    let mut found = None;
    for key in keys {
        match map.remove(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => found = found.or(Some(s)),
            Some(other) => {
                return Err(ControlError::request(format!(
                    "`{key}` must be a string, got {other}"
                )))
            }
        }
    }
    Ok(found)
}

impl SignedRequest {
    /// Split a raw request body.
    pub fn from_value(raw: Value) -> ControlResult<Self> {
        let Value::Object(mut payload) = raw.clone() else {
            return Err(ControlError::request("request body must be a JSON object"));
        };

        let signature = take_field(&mut payload, &SIGNATURE_KEYS)?
            .ok_or_else(|| ControlError::request("missing signature"))?;
        let eth_sender = take_field(&mut payload, &ETH_SENDER_KEYS)?;
        let node_sender = take_field(&mut payload, &NODE_SENDER_KEYS)?;

        // Older clients put the ETH address in `sender`.
        let sender = match (eth_sender, &node_sender) {
            (Some(eth), _) => eth,
            (None, Some(s)) if crate::address::is_eth_address(s) => s.clone(),
            _ => return Err(ControlError::request("missing eth_sender")),
        };

        Ok(Self {
            payload,
            signature,
            sender,
            node_sender,
            raw,
        })
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Declared ETH address of the signer.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Node address the request was relayed through, if any.
    #[must_use]
    pub fn node_sender(&self) -> Option<&str> {
        self.node_sender.as_deref()
    }

    /// The body as received.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn nonce(&self) -> ControlResult<&str> {
        self.payload
            .get(NONCE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ControlError::request("missing nonce"))
    }

    /// The exact text the signer signed.
    #[must_use]
    pub fn canonical_message(&self) -> String {
        to_canonical_json(&Value::Object(self.payload.clone()))
    }

    /// Parse the payload, minus the nonce, into an endpoint body.
    pub fn body<T: DeserializeOwned>(&self) -> ControlResult<T> {
        let mut payload = self.payload.clone();
        payload.remove(NONCE_KEY);
        serde_json::from_value(Value::Object(payload))
            .map_err(|e| ControlError::request(format!("malformed request: {e}")))
    }
}

/// Body of `create_pipeline` and `update_pipeline`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineRequest {
    #[serde(default)]
    pub job_id: Option<u64>,
    /// Required on update.
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_alias: Option<String>,
    #[serde(default)]
    pub target_nodes: Vec<String>,
    #[serde(default)]
    pub target_nodes_count: Option<usize>,
    #[serde(default)]
    pub spare_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub plugin_signature: Option<String>,
    #[serde(default)]
    pub app_params: Option<Map<String, Value>>,
    #[serde(default)]
    pub plugins: Option<Vec<Value>>,
    #[serde(default)]
    pub pipeline_params: Option<Map<String, Value>>,
    #[serde(default)]
    pub pipeline_input_type: Option<String>,
    #[serde(default)]
    pub pipeline_input_uri: Option<String>,
    #[serde(default)]
    pub chainstore_response: bool,
    #[serde(default)]
    pub job_tags: Option<Vec<String>>,
    #[serde(default)]
    pub node_res_req: Option<ResourceSpec>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub return_request: bool,
}

impl PipelineRequest {
    /// Requested node count; zero means none.
    #[must_use]
    pub fn node_count(&self) -> Option<usize> {
        self.target_nodes_count.filter(|n| *n > 0)
    }

    /// The plugin section in whichever shape the caller used.
    pub fn plugins_request(&self) -> ControlResult<PluginsRequest> {
        match (&self.plugin_signature, &self.plugins) {
            (Some(signature), None) => Ok(PluginsRequest::Legacy {
                signature: signature.clone(),
                config: self.app_params.clone().unwrap_or_default(),
            }),
            (None, Some(plugins)) => {
                if self.app_params.is_some() {
                    return Err(ControlError::request(
                        "app_params belongs to plugin_signature requests; use plugins[]",
                    ));
                }
                Ok(PluginsRequest::Current(plugins.clone()))
            }
            (Some(_), Some(_)) => Err(ControlError::request(
                "plugin_signature and plugins are mutually exclusive",
            )),
            (None, None) => Err(ControlError::request(
                "one of plugin_signature or plugins is required",
            )),
        }
    }

    /// Short echo of the request for responses.
    #[must_use]
    pub fn summary(&self, app_alias: Option<&str>) -> Value {
        let mut out = Map::new();
        if let Some(alias) = app_alias.or(self.app_alias.as_deref()) {
            out.insert("app_alias".into(), Value::from(alias));
        }
        if let Some(signature) = &self.plugin_signature {
            out.insert("plugin_signature".into(), Value::from(signature.as_str()));
        }
        if let Some(plugins) = &self.plugins {
            out.insert("plugins_count".into(), Value::from(plugins.len()));
        }
        out.insert(
            "target_nodes".into(),
            Value::from(self.target_nodes.clone()),
        );
        out.insert(
            "target_nodes_count".into(),
            Value::from(self.target_nodes_count.unwrap_or(0)),
        );
        if let Some(params) = &self.app_params {
            for key in ["IMAGE", "CR"] {
                if let Some(value) = params.get(key) {
                    out.insert(key.into(), value.clone());
                }
            }
        }
        Value::Object(out)
    }
}

/// Body of `scale_up_job_workers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScaleUpRequest {
    pub job_id: u64,
    #[serde(default)]
    pub target_nodes: Vec<String>,
    #[serde(default, alias = "count")]
    pub target_nodes_count: Option<usize>,
    #[serde(default)]
    pub node_res_req: Option<ResourceSpec>,
    #[serde(default)]
    pub chainstore_response: bool,
    #[serde(default)]
    pub return_request: bool,
}

/// Body of `delete_pipeline`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteRequest {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<u64>,
    /// Restrict the stop to these nodes.
    #[serde(default)]
    pub target_nodes: Vec<String>,
    /// Succeed when nothing is running.
    #[serde(default)]
    pub allow_missing: bool,
}

/// Body of `send_instance_command`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceCommandRequest {
    pub app_id: String,
    pub target_nodes: Vec<String>,
    pub plugin_signature: String,
    pub instance_id: String,
    pub instance_command: Value,
}

/// Body of `send_app_command`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppCommandRequest {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<u64>,
    pub app_command: Value,
}

/// Body of job lookups.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobRequest {
    pub job_id: u64,
}

/// Body carrying nothing but the nonce.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyRequest {}
