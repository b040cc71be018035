//! Matching incoming plugin configs to live instances.
//!
//! Callers do not always send instance ids on update. Until they do, an
//! incoming config is paired with the live instance it most resembles so
//! that the instance keeps its id (and its on-node state) across updates.
//! Swap the matcher once ids are mandatory.

use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};

use super::PluginInstanceSpec;

/// Strategy for adopting a live instance id for an incoming config.
pub trait InstanceMatcher: Send + Sync + fmt::Debug {
    /// Pick one of `candidates` (same signature, in live order) that is not
    /// in `claimed`, or `None` to mint a fresh id.
    fn match_instance(
        &self,
        incoming: &Map<String, Value>,
        candidates: &[PluginInstanceSpec],
        claimed: &HashSet<String>,
    ) -> Option<String>;

    /// Name for logs.
    fn name(&self) -> &'static str;
}

/// Scores candidates by how many config keys agree.
///
/// Per shared key: equal objects or arrays score 3, equal scalars 2, equal
/// string renderings 1. The best unclaimed candidate wins; ties go to the
/// earliest one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityMatcher;

impl SimilarityMatcher {
    #[must_use]
    pub fn score(incoming: &Map<String, Value>, candidate: &Map<String, Value>) -> u32 {
        incoming
            .iter()
            .filter_map(|(key, value)| candidate.get(key).map(|other| (value, other)))
            .map(|(value, other)| {
                let structural = value.is_object() || value.is_array();
                if structural && value == other {
                    3
                } else if !structural && value == other {
                    2
                } else if render(value) == render(other) {
                    1
                } else {
                    0
                }
            })
            .sum()
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl InstanceMatcher for SimilarityMatcher {
    fn match_instance(
        &self,
        incoming: &Map<String, Value>,
        candidates: &[PluginInstanceSpec],
        claimed: &HashSet<String>,
    ) -> Option<String> {
        let mut best: Option<(&PluginInstanceSpec, u32)> = None;
        for candidate in candidates
            .iter()
            .filter(|c| !claimed.contains(&c.instance_id))
        {
            let score = Self::score(incoming, &candidate.config);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        best.map(|(candidate, _)| candidate.instance_id.clone())
    }

    fn name(&self) -> &'static str {
        "similarity"
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

    fn live() -> Vec<PluginInstanceSpec> {
        vec![
            PluginInstanceSpec::new(
                "CONTAINER_APP_RUNNER",
                "CONTAINER_APP_aaaaaa",
                config(json!({"IMAGE": "nginx", "PORT": 80, "ENV": {"A": "1"}})),
            ),
            PluginInstanceSpec::new(
                "CONTAINER_APP_RUNNER",
                "CONTAINER_APP_bbbbbb",
                config(json!({"IMAGE": "redis", "PORT": 6379, "ENV": {"B": "2"}})),
            ),
        ]
    }

    #[test]
    fn weights_structural_scalar_and_string_matches() {
        let candidate = config(json!({"ENV": {"A": "1"}, "PORT": 80, "REPLICAS": "3"}));
        let incoming = config(json!({"ENV": {"A": "1"}, "PORT": 80, "REPLICAS": 3}));
        assert_eq!(SimilarityMatcher::score(&incoming, &candidate), 3 + 2 + 1);
    }

    #[test]
    fn best_candidate_wins() {
        let incoming = config(json!({"IMAGE": "redis", "PORT": 6379}));
        let picked = SimilarityMatcher.match_instance(&incoming, &live(), &HashSet::new());
        assert_eq!(picked.as_deref(), Some("CONTAINER_APP_bbbbbb"));
    }

    #[test]
    fn claimed_candidates_are_skipped() {
        let incoming = config(json!({"IMAGE": "redis"}));
        let claimed: HashSet<String> = ["CONTAINER_APP_bbbbbb".to_owned()].into();
        let picked = SimilarityMatcher.match_instance(&incoming, &live(), &claimed);
        assert_eq!(picked.as_deref(), Some("CONTAINER_APP_aaaaaa"));
    }

    #[test]
    fn ties_fall_back_to_first_unclaimed() {
        let incoming = config(json!({"UNRELATED": true}));
        let picked = SimilarityMatcher.match_instance(&incoming, &live(), &HashSet::new());
        assert_eq!(picked.as_deref(), Some("CONTAINER_APP_aaaaaa"));
    }

    #[test]
    fn no_candidates_means_no_match() {
        let incoming = config(json!({"IMAGE": "nginx"}));
        let claimed: HashSet<String> = live().into_iter().map(|c| c.instance_id).collect();
        assert!(SimilarityMatcher
            .match_instance(&incoming, &live(), &claimed)
            .is_none());
    }
}
