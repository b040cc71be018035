//! Test fixtures for deeploy integration tests.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use deeploy_control::auth::{eth_address, sign_message};
use deeploy_control::canonical::to_canonical_json;
use deeploy_control::fleet::NodeStatus;
use deeploy_control::ledger::JobDetails;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Builder for test [`NodeStatus`] values.
pub struct NodeBuilder {
    status: NodeStatus,
}

impl NodeBuilder {
    /// An online container-capable node with 4 cores and 8 GiB free.
    pub fn new(address: &str, eth_address: &str) -> Self {
        Self {
            status: NodeStatus {
                address: address.to_owned(),
                eth_address: eth_address.to_owned(),
                online: true,
                supervisor: false,
                score: 50.0,
                tags: BTreeMap::new(),
                capabilities: BTreeSet::from(["did".to_owned()]),
                total_cpu_cores: 4.0,
                total_memory_bytes: 8 * GIB,
                available_cpu_cores: 4.0,
                available_memory_bytes: 8 * GIB,
            },
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.status.score = score;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.status.tags.insert(tag.to_owned(), json!(true));
        self
    }

    pub fn offline(mut self) -> Self {
        self.status.online = false;
        self
    }

    pub fn build(self) -> NodeStatus {
        self.status
    }
}

/// A wallet that signs requests the way clients do.
pub struct Signer {
    key: SigningKey,
    pub address: String,
}

impl Signer {
    pub fn new(seed: u8) -> Self {
        let key = SigningKey::from_slice(&[seed; 32]).unwrap();
        let address = eth_address(key.verifying_key());
        Self { key, address }
    }

    /// Stamp a nonce for `now` and sign `body`.
    pub fn sign(&self, body: Value, now: DateTime<Utc>) -> Value {
        let Value::Object(mut payload) = body else {
            panic!("request body must be an object");
        };
        payload.insert(
            "nonce".to_owned(),
            json!(format!("0x{:x}", now.timestamp_millis())),
        );
        let message = to_canonical_json(&Value::Object(payload.clone()));
        let signature = sign_message(&self.key, &message).unwrap();
        payload.insert("EE_ETH_SIGN".to_owned(), json!(signature));
        payload.insert("EE_ETH_SENDER".to_owned(), json!(self.address));
        Value::Object(payload)
    }
}

/// An unstarted job of type 1 funded by `owner`.
pub fn job(job_id: u64, owner: &str) -> JobDetails {
    JobDetails {
        job_id,
        job_type: Some(1),
        escrow_owner: owner.to_owned(),
        start_timestamp: None,
        project_hash: None,
        number_of_nodes_requested: Some(1),
    }
}

/// One container plugin sized for a type-1 job.
pub fn container_plugins() -> Value {
    json!([{
        "signature": "CONTAINER_APP_RUNNER",
        "IMAGE": "nginx:latest",
        "CONTAINER_RESOURCES": {"cpu": 1, "memory": "512m"},
    }])
}
