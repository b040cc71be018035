//! HTTP client for a ledger gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::error::{ControlError, ControlResult};

use super::{JobDetails, Ledger};

#[derive(Deserialize)]
struct AddressResponse {
    address: Option<String>,
}

#[derive(Serialize)]
struct NodeUpdateBody<'a> {
    nodes: &'a [String],
}

/// Talks to a JSON gateway in front of the chain RPC.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
}

impl LedgerClient {
    /// Create a ledger client from configuration.
    pub fn new(base_url: &str, config: &LedgerConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> ControlResult<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(ControlError::Http),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ControlError::ledger(format!("GET {path} failed: {status}"))),
        }
    }
}

#[async_trait]
impl Ledger for LedgerClient {
    async fn wallet_nodes(&self, wallet: &str) -> ControlResult<Vec<String>> {
        Ok(self
            .get_optional(&format!("/wallets/{wallet}/nodes"))
            .await?
            .unwrap_or_default())
    }

    async fn oracles(&self) -> ControlResult<Vec<String>> {
        Ok(self.get_optional("/oracles").await?.unwrap_or_default())
    }

    async fn job_details(&self, job_id: u64) -> ControlResult<Option<JobDetails>> {
        self.get_optional(&format!("/jobs/{job_id}")).await
    }

    async fn eth_addr_to_node_addr(&self, eth: &str) -> ControlResult<Option<String>> {
        let response: Option<AddressResponse> =
            self.get_optional(&format!("/addresses/eth/{eth}")).await?;
        Ok(response.and_then(|r| r.address))
    }

    async fn node_addr_to_eth_addr(&self, node: &str) -> ControlResult<Option<String>> {
        let response: Option<AddressResponse> =
            self.get_optional(&format!("/addresses/node/{node}")).await?;
        Ok(response.and_then(|r| r.address))
    }

    async fn submit_node_update(&self, job_id: u64, eth_nodes: &[String]) -> ControlResult<()> {
        let url = format!("{}/jobs/{job_id}/nodes", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&NodeUpdateBody { nodes: eth_nodes })
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::ledger(format!(
                "node update for job {job_id} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
