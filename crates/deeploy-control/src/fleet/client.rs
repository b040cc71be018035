//! HTTP client for a fleet gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::config::FleetConfig;
use crate::error::{ControlError, ControlResult};
use crate::specs::PipelineConfig;

use super::{FleetView, LiveApp, NodeStatus};

#[derive(Serialize)]
struct InstanceCommandBody<'a> {
    signature: &'a str,
    instance_id: &'a str,
    command: &'a Value,
}

/// Talks to the node-discovery service over HTTP.
#[derive(Debug, Clone)]
pub struct FleetClient {
    client: Client,
    base_url: String,
}

impl FleetClient {
    /// Create a fleet client from configuration.
    pub fn new(base_url: &str, config: &FleetConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> ControlResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ControlError::fleet(format!(
                "{what} failed: {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl FleetView for FleetClient {
    async fn nodes(&self) -> ControlResult<Vec<NodeStatus>> {
        let url = format!("{}/nodes", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::fleet(format!(
                "failed to list nodes: {}",
                response.status()
            )));
        }

        response.json().await.map_err(ControlError::Http)
    }

    async fn node(&self, address: &str) -> ControlResult<Option<NodeStatus>> {
        let url = format!("{}/nodes/{address}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(ControlError::Http),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ControlError::fleet(format!("failed to get node: {status}"))),
        }
    }

    async fn apps(&self) -> ControlResult<Vec<LiveApp>> {
        let url = format!("{}/apps", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::fleet(format!(
                "failed to list apps: {}",
                response.status()
            )));
        }

        response.json().await.map_err(ControlError::Http)
    }

    async fn start_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()> {
        let url = format!("{}/nodes/{node}/pipelines", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(pipeline)
            .send()
            .await
            .map_err(ControlError::Http)?;
        Self::expect_success(response, "start pipeline").await
    }

    async fn update_pipeline(&self, node: &str, pipeline: &PipelineConfig) -> ControlResult<()> {
        let url = format!("{}/nodes/{node}/pipelines/{}", self.base_url, pipeline.name);
        let response = self
            .client
            .put(&url)
            .json(pipeline)
            .send()
            .await
            .map_err(ControlError::Http)?;
        Self::expect_success(response, "update pipeline").await
    }

    async fn stop_pipeline(&self, node: &str, app_id: &str) -> ControlResult<()> {
        let url = format!("{}/nodes/{node}/pipelines/{app_id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(ControlError::fleet(format!(
                "stop pipeline failed: {status}"
            ))),
        }
    }

    async fn send_instance_command(
        &self,
        node: &str,
        app_id: &str,
        signature: &str,
        instance_id: &str,
        command: &Value,
    ) -> ControlResult<()> {
        let url = format!("{}/nodes/{node}/pipelines/{app_id}/commands", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&InstanceCommandBody {
                signature,
                instance_id,
                command,
            })
            .send()
            .await
            .map_err(ControlError::Http)?;
        Self::expect_success(response, "instance command").await
    }
}
