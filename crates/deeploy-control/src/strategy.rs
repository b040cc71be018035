//! Update strategies.
//!
//! An update moves a running deployment from its current node set to a
//! target node set. [`UpdateStrategy`] decides which nodes are torn down and
//! which are refreshed in place.

use serde::{Deserialize, Serialize};

/// How an update reaches the target node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Stop the pipeline everywhere, then start it on every target node.
    ///
    /// **Pros:**
    /// - No node ever runs a mix of old and new instance configs
    /// - Removed instances cannot linger
    ///
    /// **Cons:**
    /// - Short availability gap on every update
    ///
    /// **Use when:** Consistency across nodes matters more than uptime.
    #[default]
    Recreate,

    /// Stop only on dropped nodes, push the new config to kept nodes and
    /// start on added nodes.
    ///
    /// **Pros:**
    /// - Kept nodes stay up
    ///
    /// **Cons:**
    /// - Kept and added nodes briefly run different configs
    ///
    /// **Use when:** The workload tolerates a rolling config change.
    InPlace,
}

impl UpdateStrategy {
    /// Get the strategy name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::InPlace => "in_place",
        }
    }

    /// Whether kept nodes are stopped before the new config lands.
    #[must_use]
    pub const fn stops_kept_nodes(&self) -> bool {
        matches!(self, Self::Recreate)
    }
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
