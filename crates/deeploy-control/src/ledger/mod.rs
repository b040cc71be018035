//! Blockchain job registry, wallets and oracles.

mod client;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControlResult;

pub use client::LedgerClient;
pub use memory::MemoryLedger;

/// On-chain job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub job_id: u64,
    #[serde(default)]
    pub job_type: Option<u32>,
    /// Wallet that funded the job.
    pub escrow_owner: String,
    /// Set once the job has been started; `0` means never.
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub project_hash: Option<String>,
    #[serde(default)]
    pub number_of_nodes_requested: Option<u32>,
}

impl JobDetails {
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.start_timestamp.is_some_and(|ts| ts > 0)
    }
}

/// Read and write access to the blockchain ledger.
///
/// Addresses handed to and returned by the ledger are ETH addresses unless
/// a method says otherwise.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// ETH addresses of the nodes a wallet owns.
    async fn wallet_nodes(&self, wallet: &str) -> ControlResult<Vec<String>>;

    /// ETH addresses of the oracle nodes.
    async fn oracles(&self) -> ControlResult<Vec<String>>;

    async fn job_details(&self, job_id: u64) -> ControlResult<Option<JobDetails>>;

    /// Internal address of the node with this ETH address.
    async fn eth_addr_to_node_addr(&self, eth: &str) -> ControlResult<Option<String>>;

    /// ETH address of the node with this internal address.
    async fn node_addr_to_eth_addr(&self, node: &str) -> ControlResult<Option<String>>;

    /// Record the node set now serving a job.
    async fn submit_node_update(&self, job_id: u64, eth_nodes: &[String]) -> ControlResult<()>;
}
