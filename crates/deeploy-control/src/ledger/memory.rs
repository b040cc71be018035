//! In-memory ledger for development mode and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::address::normalize_eth;
use crate::error::ControlResult;

use super::{JobDetails, Ledger};

#[derive(Debug, Default)]
struct LedgerState {
    wallets: HashMap<String, Vec<String>>,
    oracles: BTreeSet<String>,
    jobs: HashMap<u64, JobDetails>,
    node_to_eth: BTreeMap<String, String>,
    submissions: Vec<(u64, Vec<String>)>,
}

/// In-memory ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under both address forms.
    #[must_use]
    pub fn with_node(self, internal: &str, eth: &str) -> Self {
        self.state
            .write()
            .node_to_eth
            .insert(internal.to_owned(), normalize_eth(eth));
        self
    }

    /// Give a wallet ownership of nodes (ETH addresses).
    #[must_use]
    pub fn with_wallet_nodes(self, wallet: &str, nodes: &[&str]) -> Self {
        self.state.write().wallets.insert(
            normalize_eth(wallet),
            nodes.iter().map(|n| normalize_eth(n)).collect(),
        );
        self
    }

    #[must_use]
    pub fn with_oracle(self, eth: &str) -> Self {
        self.state.write().oracles.insert(normalize_eth(eth));
        self
    }

    #[must_use]
    pub fn with_job(self, job: JobDetails) -> Self {
        self.insert_job(job);
        self
    }

    pub fn insert_job(&self, job: JobDetails) {
        self.state.write().jobs.insert(job.job_id, job);
    }

    /// Node-set confirmations submitted so far, oldest first.
    #[must_use]
    pub fn submissions(&self) -> Vec<(u64, Vec<String>)> {
        self.state.read().submissions.clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn wallet_nodes(&self, wallet: &str) -> ControlResult<Vec<String>> {
        Ok(self
            .state
            .read()
            .wallets
            .get(&normalize_eth(wallet))
            .cloned()
            .unwrap_or_default())
    }

    async fn oracles(&self) -> ControlResult<Vec<String>> {
        Ok(self.state.read().oracles.iter().cloned().collect())
    }

    async fn job_details(&self, job_id: u64) -> ControlResult<Option<JobDetails>> {
        Ok(self.state.read().jobs.get(&job_id).cloned())
    }

    async fn eth_addr_to_node_addr(&self, eth: &str) -> ControlResult<Option<String>> {
        let eth = normalize_eth(eth);
        Ok(self
            .state
            .read()
            .node_to_eth
            .iter()
            .find(|(_, e)| **e == eth)
            .map(|(node, _)| node.clone()))
    }

    async fn node_addr_to_eth_addr(&self, node: &str) -> ControlResult<Option<String>> {
        Ok(self.state.read().node_to_eth.get(node).cloned())
    }

    async fn submit_node_update(&self, job_id: u64, eth_nodes: &[String]) -> ControlResult<()> {
        self.state
            .write()
            .submissions
            .push((job_id, eth_nodes.to_vec()));
        Ok(())
    }
}
