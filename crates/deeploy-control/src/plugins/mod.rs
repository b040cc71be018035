//! Canonical plugin instance lists.
//!
//! Requests describe plugins in one of two shapes:
//!
//! - legacy: one `plugin_signature` plus a flat `app_params` config
//! - current: a `plugins` array of `{signature, instance_id?, ...config}`
//!
//! [`PluginConfigBuilder`] turns either into `[PluginInstanceSpec]` with one
//! unique instance id per entry.

mod matcher;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::types::new_instance_id;

pub use matcher::{InstanceMatcher, SimilarityMatcher};

/// One configured plugin instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInstanceSpec {
    pub signature: String,
    pub instance_id: String,
    pub config: Map<String, Value>,
}

impl PluginInstanceSpec {
    #[must_use]
    pub fn new(
        signature: impl Into<String>,
        instance_id: impl Into<String>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            signature: signature.into(),
            instance_id: instance_id.into(),
            config,
        }
    }
}

/// Plugin section of a request, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginsRequest {
    /// `plugin_signature` + `app_params`.
    Legacy {
        signature: String,
        config: Map<String, Value>,
    },
    /// `plugins[]`.
    Current(Vec<Value>),
}

struct RawEntry {
    signature: String,
    instance_id: Option<String>,
    config: Map<String, Value>,
}

fn take_string(map: &mut Map<String, Value>, keys: &[&str]) -> ControlResult<Option<String>> {
    for key in keys {
        if let Some(value) = map.remove(*key) {
            return match value {
                Value::String(s) if !s.trim().is_empty() => Ok(Some(s.trim().to_owned())),
                Value::Null => Ok(None),
                other => Err(ControlError::plugins(format!(
                    "`{key}` must be a non-empty string, got {other}"
                ))),
            };
        }
    }
    Ok(None)
}

impl PluginsRequest {
    fn into_entries(self) -> ControlResult<Vec<RawEntry>> {
        match self {
            Self::Legacy { signature, config } => Ok(vec![RawEntry {
                signature: signature.trim().to_uppercase(),
                instance_id: None,
                config,
            }]),
            Self::Current(items) => {
                if items.is_empty() {
                    return Err(ControlError::plugins("plugins array is empty"));
                }
                items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        let Value::Object(mut config) = item else {
                            return Err(ControlError::plugins(format!(
                                "plugins[{idx}] must be an object"
                            )));
                        };
                        let signature = take_string(&mut config, &["signature", "plugin_signature"])?
                            .ok_or_else(|| {
                                ControlError::plugins(format!("plugins[{idx}] has no signature"))
                            })?;
                        let instance_id = take_string(&mut config, &["instance_id"])?;
                        Ok(RawEntry {
                            signature: signature.to_uppercase(),
                            instance_id,
                            config,
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Normalises plugin requests and assigns instance ids.
#[derive(Debug, Clone)]
pub struct PluginConfigBuilder {
    matcher: Arc<dyn InstanceMatcher>,
}

impl Default for PluginConfigBuilder {
    fn default() -> Self {
        Self::new(Arc::new(SimilarityMatcher))
    }
}

impl PluginConfigBuilder {
    #[must_use]
    pub fn new(matcher: Arc<dyn InstanceMatcher>) -> Self {
        Self { matcher }
    }

    /// Build the canonical instance list.
    ///
    /// `live` holds the running instances on update. Caller-supplied ids must
    /// then exist in it; configs without ids are matched against it before a
    /// fresh id is minted.
    pub fn build(
        &self,
        request: PluginsRequest,
        live: Option<&[PluginInstanceSpec]>,
    ) -> ControlResult<Vec<PluginInstanceSpec>> {
        let entries = request.into_entries()?;
        let mut used: HashSet<String> = HashSet::new();

        for entry in &entries {
            let Some(id) = &entry.instance_id else {
                continue;
            };
            if !used.insert(id.clone()) {
                return Err(ControlError::plugins(format!("duplicate instance_id {id}")));
            }
            if let Some(live) = live {
                let known = live
                    .iter()
                    .any(|l| l.instance_id == *id && l.signature.eq_ignore_ascii_case(&entry.signature));
                if !known {
                    return Err(ControlError::plugins(format!(
                        "unknown instance_id {id} for {}",
                        entry.signature
                    )));
                }
            }
        }

        let live_ids: HashSet<&str> = live
            .unwrap_or_default()
            .iter()
            .map(|l| l.instance_id.as_str())
            .collect();

        let mut specs = Vec::with_capacity(entries.len());
        for entry in entries {
            let instance_id = match entry.instance_id {
                Some(id) => id,
                None => {
                    let adopted = live.and_then(|live| {
                        let candidates: Vec<PluginInstanceSpec> = live
                            .iter()
                            .filter(|l| l.signature.eq_ignore_ascii_case(&entry.signature))
                            .cloned()
                            .collect();
                        self.matcher
                            .match_instance(&entry.config, &candidates, &used)
                    });
                    match adopted {
                        Some(id) => {
                            debug!(
                                matcher = self.matcher.name(),
                                instance_id = %id,
                                "adopted live instance id"
                            );
                            used.insert(id.clone());
                            id
                        }
                        None => mint_unique(&entry.signature, &mut used, &live_ids),
                    }
                }
            };
            specs.push(PluginInstanceSpec::new(entry.signature, instance_id, entry.config));
        }

        Ok(specs)
    }
}

fn mint_unique(signature: &str, used: &mut HashSet<String>, live_ids: &HashSet<&str>) -> String {
    loop {
        let id = new_instance_id(signature);
        if !live_ids.contains(id.as_str()) && used.insert(id.clone()) {
            return id;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn legacy_shape_becomes_one_instance() {
        let specs = PluginConfigBuilder::default()
            .build(
                PluginsRequest::Legacy {
                    signature: "container_app_runner".into(),
                    config: config(json!({"IMAGE": "nginx"})),
                },
                None,
            )
            .unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].signature, "CONTAINER_APP_RUNNER");
        assert!(specs[0].instance_id.starts_with("CONTAINER_APP_"));
        assert_eq!(specs[0].config["IMAGE"], "nginx");
    }

    #[test]
    fn current_shape_keeps_supplied_ids_and_mints_the_rest() {
        let specs = PluginConfigBuilder::default()
            .build(
                PluginsRequest::Current(vec![
                    json!({"signature": "CONTAINER_APP_RUNNER", "instance_id": "web", "IMAGE": "a"}),
                    json!({"signature": "CONTAINER_APP_RUNNER", "IMAGE": "b"}),
                    json!({"plugin_signature": "EDGE_NODE_API", "PORT": 1}),
                ]),
                None,
            )
            .unwrap();

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].instance_id, "web");
        assert!(specs[0].config.get("signature").is_none());
        assert!(specs[0].config.get("instance_id").is_none());
        let ids: HashSet<_> = specs.iter().map(|s| s.instance_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(specs[2].signature, "EDGE_NODE_API");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = PluginConfigBuilder::default()
            .build(
                PluginsRequest::Current(vec![
                    json!({"signature": "A", "instance_id": "x"}),
                    json!({"signature": "A", "instance_id": "x"}),
                ]),
                None,
            )
            .unwrap_err();
        assert_eq!(err.code(), "PLUGINS1");
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let builder = PluginConfigBuilder::default();
        assert!(builder
            .build(PluginsRequest::Current(vec![json!("nope")]), None)
            .is_err());
        assert!(builder
            .build(PluginsRequest::Current(vec![json!({"IMAGE": "x"})]), None)
            .is_err());
        assert!(builder.build(PluginsRequest::Current(vec![]), None).is_err());
    }

    #[test]
    fn update_adopts_live_ids_and_rejects_unknown_ones() {
        let live = vec![PluginInstanceSpec::new(
            "CONTAINER_APP_RUNNER",
            "CONTAINER_APP_111111",
            config(json!({"IMAGE": "nginx"})),
        )];
        let builder = PluginConfigBuilder::default();

        let specs = builder
            .build(
                PluginsRequest::Current(vec![
                    json!({"signature": "CONTAINER_APP_RUNNER", "IMAGE": "nginx:2"}),
                    json!({"signature": "CONTAINER_APP_RUNNER", "IMAGE": "extra"}),
                ]),
                Some(&live),
            )
            .unwrap();
        assert_eq!(specs[0].instance_id, "CONTAINER_APP_111111");
        assert_ne!(specs[1].instance_id, "CONTAINER_APP_111111");

        let err = builder
            .build(
                PluginsRequest::Current(vec![
                    json!({"signature": "CONTAINER_APP_RUNNER", "instance_id": "ghost"}),
                ]),
                Some(&live),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown instance_id ghost"));
    }
}
