//! Configuration for deeploy-control.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use deeploy_state::StateConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ControlError, ControlResult};
use crate::resources::{parse_memory, ContainerPolicy, ResourceSpec};
use crate::strategy::UpdateStrategy;

/// Top-level configuration for the orchestration service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeeployConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Postponed request handling.
    #[serde(default)]
    pub pending: PendingConfig,

    /// Deployment behaviour configuration.
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Job payment rules.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Ledger gateway.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Fleet gateway.
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Chainstore and blob backends.
    #[serde(default)]
    pub state: StateConfig,

    /// Response rendering.
    #[serde(default)]
    pub api: ApiConfig,
}

impl DeeployConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `deeploy.toml` in the current directory (if present)
    /// 3. Environment variables with `DEEPLOY_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("deeploy.toml"))
            .merge(Env::prefixed("DEEPLOY_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DEEPLOY_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Request authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Oldest accepted nonce, in seconds.
    #[serde(default = "default_nonce_max_age_secs")]
    pub nonce_max_age_secs: u64,
}

const fn default_nonce_max_age_secs() -> u64 {
    12 * 60 * 60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_max_age_secs: default_nonce_max_age_secs(),
        }
    }
}

impl AuthConfig {
    /// The freshness window as a signed duration.
    #[must_use]
    pub fn nonce_max_age(&self) -> chrono::Duration {
        let secs = i64::try_from(self.nonce_max_age_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Postponed request handling.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingConfig {
    /// How long a dispatched request may wait for confirmations.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum gap between two chainstore reads for one request.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Background sweep period.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

const fn default_request_timeout_secs() -> u64 {
    300
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_sweep_interval_ms() -> u64 {
    1000
}

impl PendingConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Plugin signatures that run containers.
    #[serde(default = "default_container_signatures")]
    pub container_signatures: BTreeSet<String>,

    /// Capability a node must advertise to host containers.
    #[serde(default = "default_container_capability")]
    pub container_capability: String,

    /// Pipeline name ignored when accounting node usage.
    #[serde(default = "default_admin_pipeline")]
    pub admin_pipeline: String,

    /// Resources assumed for a container instance that declares none.
    #[serde(default = "default_container_resources")]
    pub default_container_resources: ResourceSpec,

    /// How updates move a deployment to its new node set.
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

fn default_container_signatures() -> BTreeSet<String> {
    ["CONTAINER_APP_RUNNER", "WORKER_APP_RUNNER"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_container_capability() -> String {
    "did".to_owned()
}

fn default_admin_pipeline() -> String {
    "admin_pipeline".to_owned()
}

const fn default_container_resources() -> ResourceSpec {
    ResourceSpec::new(1.0, 512 * 1024 * 1024)
}

impl DeploymentConfig {
    /// Container classification derived from this config.
    #[must_use]
    pub fn container_policy(&self) -> ContainerPolicy {
        ContainerPolicy {
            signatures: self
                .container_signatures
                .iter()
                .map(|s| s.to_ascii_uppercase())
                .collect(),
            capability: self.container_capability.clone(),
            default_resources: self.default_container_resources,
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            container_signatures: default_container_signatures(),
            container_capability: default_container_capability(),
            admin_pipeline: default_admin_pipeline(),
            default_container_resources: default_container_resources(),
            update_strategy: UpdateStrategy::default(),
        }
    }
}

/// Job payment rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Accept deployments that name no job.
    #[serde(default)]
    pub allow_unpaid_jobs: bool,

    /// Paid resource bundles keyed by job type.
    #[serde(default)]
    pub job_types: BTreeMap<String, JobTypeSpec>,
}

impl PaymentConfig {
    #[must_use]
    pub fn job_type(&self, job_type: u32) -> Option<&JobTypeSpec> {
        self.job_types.get(&job_type.to_string())
    }
}

/// What one job type pays for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobTypeSpec {
    /// Native jobs run plugins directly on the node.
    #[serde(default)]
    pub native: bool,
    pub cpu: Option<f64>,
    pub memory: Option<Value>,
}

impl JobTypeSpec {
    /// The paid bundle, if both cpu and memory are configured.
    pub fn resources(&self) -> ControlResult<Option<ResourceSpec>> {
        match (self.cpu, &self.memory) {
            (Some(cpu), Some(memory)) => Ok(Some(ResourceSpec::new(cpu, parse_memory(memory)?))),
            _ => Ok(None),
        }
    }
}

/// Ledger gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Base URL; unset keeps an in-memory ledger.
    pub url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_client_timeout_secs() -> u64 {
    10
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

/// Fleet gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Base URL; unset keeps an in-memory fleet.
    pub url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

/// Response rendering.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Above 1, failure envelopes carry the error chain.
    #[serde(default)]
    pub verbose: u8,
}
