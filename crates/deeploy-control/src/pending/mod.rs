//! Postponed requests.
//!
//! A dispatched deployment that expects chainstore confirmations is parked
//! as a [`PendingRequest`] and advanced by repeated
//! [`PostponedRequestScheduler::solve`] calls until every key resolves or
//! the request times out.

mod scheduler;
mod store;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::address::to_eth_sorted;
use crate::envelope::Envelope;
use crate::error::ControlResult;
use crate::ledger::Ledger;
use crate::state::{OperationData, OperationPhase};
use crate::types::PendingId;

pub use scheduler::{Dispatched, Outcome, PostponedRequestScheduler};
pub use store::MemoryPendingStore;

/// Which endpoint parked the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Create or update.
    Pipeline,
    ScaleUp,
}

impl PendingKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::ScaleUp => "scale_up",
        }
    }
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to anchor on the ledger once a deployment lands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmContext {
    pub job_id: Option<u64>,
    /// Only changed node sets are submitted.
    pub nodes_changed: bool,
    /// Internal addresses now serving the job.
    pub nodes: Vec<String>,
    /// Set once the submission went out.
    pub submitted: bool,
}

/// A dispatched request waiting for confirmations.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub pending_id: PendingId,
    pub kind: PendingKind,
    pub operation: OperationData,
    pub phase: OperationPhase,
    /// Expected confirmation keys per node.
    pub response_keys: BTreeMap<String, Vec<String>>,
    /// Resolved keys and the value each one resolved to.
    pub collected: BTreeMap<String, Value>,
    pub start_time: DateTime<Utc>,
    pub timeout: std::time::Duration,
    pub next_check_ts: DateTime<Utc>,
    /// Envelope the final result is built on.
    pub base_result: Envelope,
    pub confirm: ConfirmContext,
}

impl PendingRequest {
    #[must_use]
    pub fn total_expected(&self) -> usize {
        self.response_keys.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.collected.len() >= self.total_expected()
    }

    /// Keys not resolved yet, in node then key order.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<String> {
        self.response_keys
            .values()
            .flatten()
            .filter(|k| !self.collected.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Strictly more than `timeout` has passed since `start_time`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.start_time)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.timeout)
    }

    /// Past twice its timeout; whoever submitted it stopped polling.
    #[must_use]
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        (now - self.start_time)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.timeout.saturating_mul(2))
    }
}

/// Storage for pending requests.
#[async_trait]
pub trait PendingRequestStore: Send + Sync {
    /// Store a new request; an existing id is an error.
    async fn insert(&self, request: PendingRequest) -> ControlResult<()>;

    async fn get(&self, id: &PendingId) -> ControlResult<Option<PendingRequest>>;

    /// Replace a stored request.
    async fn update(&self, request: PendingRequest) -> ControlResult<()>;

    async fn remove(&self, id: &PendingId) -> ControlResult<Option<PendingRequest>>;

    async fn len(&self) -> ControlResult<usize>;

    async fn ids(&self) -> ControlResult<Vec<PendingId>>;
}

/// Submit the node set of a finished deployment to the ledger.
///
/// Unchanged node sets and jobs without an id are skipped. Failures are
/// logged and swallowed. Returns whether a submission went out.
pub async fn submit_node_update(ledger: &dyn Ledger, confirm: &ConfirmContext) -> bool {
    let Some(job_id) = confirm.job_id else {
        return false;
    };
    if !confirm.nodes_changed || confirm.submitted {
        return false;
    }

    let eth_nodes = match to_eth_sorted(ledger, &confirm.nodes).await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(job_id, error = %e, "cannot resolve node set for ledger update");
            return false;
        }
    };
    match ledger.submit_node_update(job_id, &eth_nodes).await {
        Ok(()) => {
            info!(job_id, nodes = eth_nodes.len(), "node set submitted to ledger");
            true
        }
        Err(e) => {
            warn!(job_id, error = %e, "node set submission failed");
            false
        }
    }
}
