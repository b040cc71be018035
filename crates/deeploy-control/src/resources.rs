//! CPU and memory accounting.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControlError, ControlResult};
use crate::plugins::PluginInstanceSpec;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = MB * 1024.0;

/// Instance config key holding `{cpu, memory}` for container plugins.
pub const CONTAINER_RESOURCES_KEY: &str = "CONTAINER_RESOURCES";

/// Parse a memory amount into bytes.
///
/// Bare numbers are gigabytes. Strings may end in `m`/`mb` or `g`/`gb`
/// (any case); a plain numeric string is bytes.
pub fn parse_memory(value: &Value) -> ControlResult<u64> {
    match value {
        Value::Number(n) => {
            let gb = n
                .as_f64()
                .ok_or_else(|| ControlError::request(format!("invalid memory value: {n}")))?;
            to_bytes(gb, GB, &n.to_string())
        }
        Value::String(s) => parse_memory_str(s),
        other => Err(ControlError::request(format!(
            "invalid memory value: {other}"
        ))),
    }
}

/// String form of [`parse_memory`].
pub fn parse_memory_str(raw: &str) -> ControlResult<u64> {
    let lowered = raw.trim().to_ascii_lowercase();
    let (number, unit) = if let Some(n) = lowered.strip_suffix("mb") {
        (n, MB)
    } else if let Some(n) = lowered.strip_suffix("gb") {
        (n, GB)
    } else if let Some(n) = lowered.strip_suffix('m') {
        (n, MB)
    } else if let Some(n) = lowered.strip_suffix('g') {
        (n, GB)
    } else {
        (lowered.as_str(), 1.0)
    };

    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| ControlError::request(format!("invalid memory value: {raw}")))?;
    to_bytes(amount, unit, raw)
}

fn to_bytes(amount: f64, unit: f64, raw: &str) -> ControlResult<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ControlError::request(format!("invalid memory value: {raw}")));
    }
    let bytes = (amount * unit).round();
    if bytes >= u64::MAX as f64 {
        return Err(ControlError::request(format!("memory value out of range: {raw}")));
    }
    Ok(bytes as u64)
}

/// CPU cores and memory bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawResources", into = "RawResources")]
pub struct ResourceSpec {
    /// CPU cores.
    pub cpu: f64,
    /// Memory in bytes.
    pub memory_bytes: u64,
}

#[derive(Serialize, Deserialize)]
struct RawResources {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: Value,
}

impl TryFrom<RawResources> for ResourceSpec {
    type Error = ControlError;

    fn try_from(raw: RawResources) -> ControlResult<Self> {
        let memory_bytes = if raw.memory.is_null() {
            0
        } else {
            parse_memory(&raw.memory)?
        };
        if !raw.cpu.is_finite() || raw.cpu < 0.0 {
            return Err(ControlError::request(format!("invalid cpu value: {}", raw.cpu)));
        }
        Ok(Self {
            cpu: raw.cpu,
            memory_bytes,
        })
    }
}

impl From<ResourceSpec> for RawResources {
    fn from(spec: ResourceSpec) -> Self {
        Self {
            cpu: spec.cpu,
            memory: Value::String(format!("{}m", spec.memory_mb())),
        }
    }
}

impl ResourceSpec {
    #[must_use]
    pub const fn new(cpu: f64, memory_bytes: u64) -> Self {
        Self { cpu, memory_bytes }
    }

    /// Parse a `{cpu, memory}` JSON object.
    pub fn from_value(value: &Value) -> ControlResult<Self> {
        let raw: RawResources = serde_json::from_value(value.clone())
            .map_err(|e| ControlError::request(format!("invalid resources: {e}")))?;
        Self::try_from(raw)
    }

    #[must_use]
    pub fn memory_mb(&self) -> f64 {
        (self.memory_bytes as f64 / MB * 100.0).round() / 100.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.memory_bytes == 0
    }

    /// Sum of two specs, saturating memory at `u64::MAX`.
    #[must_use]
    pub fn plus(self, other: Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }

    /// Sum of two specs, `None` when memory overflows.
    #[must_use]
    pub fn checked_plus(self, other: Self) -> Option<Self> {
        Some(Self {
            cpu: self.cpu + other.cpu,
            memory_bytes: self.memory_bytes.checked_add(other.memory_bytes)?,
        })
    }

    /// Lines describing where `self` (available) falls short of `required`.
    #[must_use]
    pub fn deficits(&self, required: &Self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.cpu < required.cpu {
            lines.push(format!(
                "- cpu: available {} cores < required {} cores",
                self.cpu, required.cpu
            ));
        }
        if self.memory_bytes < required.memory_bytes {
            lines.push(format!(
                "- memory: available {} MB < required {} MB",
                self.memory_mb(),
                required.memory_mb()
            ));
        }
        lines
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{cpu: {}, memory: {}MB}}", self.cpu, self.memory_mb())
    }
}

/// Which signatures are container workloads and what they cost by default.
#[derive(Debug, Clone)]
pub struct ContainerPolicy {
    /// Signatures treated as container runners.
    pub signatures: BTreeSet<String>,
    /// Capability a node must advertise to run containers.
    pub capability: String,
    /// Resources assumed when an instance declares none.
    pub default_resources: ResourceSpec,
}

impl ContainerPolicy {
    #[must_use]
    pub fn is_container(&self, signature: &str) -> bool {
        self.signatures.contains(&signature.to_ascii_uppercase())
    }

    /// True when every plugin is a container runner.
    #[must_use]
    pub fn all_containers<'a>(&self, signatures: impl IntoIterator<Item = &'a str>) -> bool {
        let mut any = false;
        for signature in signatures {
            if !self.is_container(signature) {
                return false;
            }
            any = true;
        }
        any
    }

    /// Declared resources of one instance config, or the default.
    pub fn instance_resources(&self, config: &Map<String, Value>) -> ControlResult<ResourceSpec> {
        match config.get(CONTAINER_RESOURCES_KEY) {
            Some(value) if !value.is_null() => ResourceSpec::from_value(value),
            _ => Ok(self.default_resources),
        }
    }

    /// Sum of container resources across the container-type plugins.
    pub fn aggregate(&self, plugins: &[PluginInstanceSpec]) -> ControlResult<ResourceSpec> {
        plugins
            .iter()
            .filter(|p| self.is_container(&p.signature))
            .try_fold(ResourceSpec::default(), |acc, p| {
                acc.checked_plus(self.instance_resources(&p.config)?)
                    .ok_or_else(|| ControlError::request("requested memory is out of range"))
            })
    }
}

/// Derived capacity view of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResourceProfile {
    pub address: String,
    pub cpu_total: f64,
    pub cpu_used: f64,
    pub mem_total_bytes: u64,
    pub mem_used_bytes: u64,
    pub score: f64,
    /// Epoch seconds of the most recent deployment, 0 when none.
    pub last_deployment_ts: f64,
}

impl NodeResourceProfile {
    #[must_use]
    pub fn free(&self) -> ResourceSpec {
        ResourceSpec {
            cpu: (self.cpu_total - self.cpu_used).max(0.0),
            memory_bytes: self.mem_total_bytes.saturating_sub(self.mem_used_bytes),
        }
    }

    /// Whether `used + requested` stays within the totals.
    #[must_use]
    pub fn fits(&self, requested: &ResourceSpec) -> bool {
        self.cpu_used + requested.cpu <= self.cpu_total
            && self.mem_used_bytes.saturating_add(requested.memory_bytes) <= self.mem_total_bytes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn memory_units() {
        assert_eq!(parse_memory(&json!("512m")).unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory(&json!("512MB")).unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory(&json!("2g")).unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory(&json!("1gb")).unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory(&json!(2)).unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory(&json!(0.5)).unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory(&json!("4096")).unwrap(), 4096);
    }

    #[test]
    fn memory_rejects_garbage() {
        assert!(parse_memory(&json!("lots")).is_err());
        assert!(parse_memory(&json!("-1g")).is_err());
        assert!(parse_memory(&json!(true)).is_err());
        assert!(parse_memory(&json!("1e19g")).is_err());
        assert!(parse_memory(&json!(1e300)).is_err());
    }

    #[test]
    fn resource_spec_from_json() {
        let spec = ResourceSpec::from_value(&json!({"cpu": 1, "memory": "512m"})).unwrap();
        assert_eq!(spec, ResourceSpec::new(1.0, 512 * 1024 * 1024));

        let other = ResourceSpec::from_value(&json!({"cpu": 1, "memory": "513m"})).unwrap();
        assert_ne!(spec, other);
    }

    #[test]
    fn deficits_name_each_resource() {
        let available = ResourceSpec::new(1.0, 256 * 1024 * 1024);
        let required = ResourceSpec::new(2.0, 512 * 1024 * 1024);
        let lines = available.deficits(&required);
        assert_eq!(
            lines,
            vec![
                "- cpu: available 1 cores < required 2 cores".to_owned(),
                "- memory: available 256 MB < required 512 MB".to_owned(),
            ]
        );
        assert!(required.deficits(&available).is_empty());
    }

    #[test]
    fn aggregate_counts_only_containers() {
        let policy = ContainerPolicy {
            signatures: ["CONTAINER_APP_RUNNER".to_owned()].into(),
            capability: "did".into(),
            default_resources: ResourceSpec::new(1.0, 512 * 1024 * 1024),
        };
        let plugins = vec![
            PluginInstanceSpec::new(
                "CONTAINER_APP_RUNNER",
                "CONTAINER_APP_aaaaaa",
                json!({"CONTAINER_RESOURCES": {"cpu": 2, "memory": "1g"}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
            PluginInstanceSpec::new("CONTAINER_APP_RUNNER", "CONTAINER_APP_bbbbbb", Map::new()),
            PluginInstanceSpec::new("A_SIMPLE_PLUGIN", "A_SIMPLE_PLUGI_cccccc", Map::new()),
        ];

        let total = policy.aggregate(&plugins).unwrap();
        assert_eq!(total, ResourceSpec::new(3.0, 1536 * 1024 * 1024));
        assert!(!policy.all_containers(plugins.iter().map(|p| p.signature.as_str())));
    }

    #[test]
    fn aggregate_rejects_memory_overflow() {
        let policy = ContainerPolicy {
            signatures: ["CONTAINER_APP_RUNNER".to_owned()].into(),
            capability: "did".into(),
            default_resources: ResourceSpec::new(1.0, 512 * 1024 * 1024),
        };
        let huge = json!({"CONTAINER_RESOURCES": {"cpu": 1, "memory": "9e9g"}})
            .as_object()
            .cloned()
            .unwrap();
        let plugins = vec![
            PluginInstanceSpec::new("CONTAINER_APP_RUNNER", "CONTAINER_APP_aaaaaa", huge.clone()),
            PluginInstanceSpec::new("CONTAINER_APP_RUNNER", "CONTAINER_APP_bbbbbb", huge),
        ];

        let err = policy.aggregate(&plugins).unwrap_err();
        assert_eq!(err.code(), "REQUEST1");
    }

    #[test]
    fn huge_request_never_fits() {
        let profile = NodeResourceProfile {
            address: "0xai_n".into(),
            cpu_total: 4.0,
            cpu_used: 0.0,
            mem_total_bytes: u64::MAX,
            mem_used_bytes: 512,
            score: 99.0,
            last_deployment_ts: 0.0,
        };
        assert!(!profile.fits(&ResourceSpec::new(1.0, u64::MAX)));
        assert_eq!(
            ResourceSpec::new(0.0, u64::MAX).plus(ResourceSpec::new(0.0, 1)).memory_bytes,
            u64::MAX
        );
    }

    #[test]
    fn profile_fit_uses_used_plus_requested() {
        let profile = NodeResourceProfile {
            address: "0xai_n".into(),
            cpu_total: 4.0,
            cpu_used: 3.0,
            mem_total_bytes: 1024,
            mem_used_bytes: 512,
            score: 99.0,
            last_deployment_ts: 0.0,
        };
        assert!(profile.fits(&ResourceSpec::new(1.0, 512)));
        assert!(!profile.fits(&ResourceSpec::new(1.5, 0)));
        assert_eq!(profile.free(), ResourceSpec::new(1.0, 512));
    }
}
