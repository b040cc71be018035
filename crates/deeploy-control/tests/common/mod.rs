//! Common test utilities for deeploy integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use deeploy_control::clock::{Clock, ManualClock};
use deeploy_control::config::{DeeployConfig, JobTypeSpec};
use deeploy_control::engine::{Collaborators, DeeployEngine};
use deeploy_control::fleet::MemoryFleet;
use deeploy_control::ledger::MemoryLedger;
use deeploy_control::pending::{MemoryPendingStore, Outcome};
use deeploy_control::{Envelope, UpdateStrategy};
use deeploy_state::{MemoryBlob, MemoryKv};
use serde_json::{json, Value};

use fixtures::{job, NodeBuilder, Signer};

pub const JOB_ID: u64 = 7;

/// Internal and ETH addresses of the test fleet.
pub const NODES: [(&str, &str); 3] = [
    ("0xai_node_a", "0x00000000000000000000000000000000000000a1"),
    ("0xai_node_b", "0x00000000000000000000000000000000000000b2"),
    ("0xai_node_c", "0x00000000000000000000000000000000000000c3"),
];

/// Engine on in-memory collaborators with a frozen clock.
pub struct TestDeeploy {
    pub engine: Arc<DeeployEngine>,
    pub fleet: Arc<MemoryFleet>,
    pub ledger: Arc<MemoryLedger>,
    pub kv: Arc<MemoryKv>,
    pub blob: Arc<MemoryBlob>,
    pub clock: Arc<ManualClock>,
    pub owner: Signer,
    pub oracle: Signer,
}

impl TestDeeploy {
    /// Nodes answer every confirmation key they receive.
    pub fn new() -> Self {
        Self::build(test_config(), true)
    }

    /// Nodes never answer; postponed requests can only time out.
    pub fn silent() -> Self {
        Self::build(test_config(), false)
    }

    pub fn with_strategy(strategy: UpdateStrategy) -> Self {
        let mut config = test_config();
        config.deployment.update_strategy = strategy;
        Self::build(config, true)
    }

    pub fn build(config: DeeployConfig, responding: bool) -> Self {
        let owner = Signer::new(1);
        let oracle = Signer::new(2);

        let kv = Arc::new(MemoryKv::new());
        let blob = Arc::new(MemoryBlob::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));

        let mut fleet = MemoryFleet::new();
        if responding {
            fleet = fleet.with_responder(kv.clone());
        }
        let mut ledger = MemoryLedger::new()
            .with_wallet_nodes(&owner.address, &[NODES[0].1])
            .with_oracle(&oracle.address)
            .with_job(job(JOB_ID, &owner.address));
        for (score, (address, eth)) in [90.0, 80.0, 70.0].into_iter().zip(NODES) {
            fleet = fleet.with_node(NodeBuilder::new(address, eth).with_score(score).build());
            ledger = ledger.with_node(address, eth);
        }
        let fleet = Arc::new(fleet);
        let ledger = Arc::new(ledger);

        let parts = Collaborators {
            fleet: fleet.clone(),
            ledger: ledger.clone(),
            kv: kv.clone(),
            blob: blob.clone(),
            clock: clock.clone(),
        };
        let engine = Arc::new(DeeployEngine::new(
            &parts,
            Arc::new(MemoryPendingStore::new()),
            &config,
        ));

        Self {
            engine,
            fleet,
            ledger,
            kv,
            blob,
            clock,
            owner,
            oracle,
        }
    }

    /// Sign as the job owner at the current clock.
    pub fn signed(&self, body: Value) -> Value {
        self.owner.sign(body, self.clock.now())
    }

    pub fn signed_by_oracle(&self, body: Value) -> Value {
        self.oracle.sign(body, self.clock.now())
    }

    /// Poll a postponed request until it settles, moving the clock past the
    /// poll interval between steps.
    pub async fn settle(&self, outcome: Outcome) -> Envelope {
        let mut outcome = outcome;
        for _ in 0..10 {
            match outcome {
                Outcome::Ready(envelope) => return envelope,
                Outcome::Postponed(id) => {
                    self.clock.advance(chrono::Duration::milliseconds(500));
                    outcome = self.engine.solve(&id).await;
                }
            }
        }
        panic!("request did not settle");
    }

    /// Create the standard one-node container app for [`JOB_ID`].
    pub async fn create_app(&self, extra: Value) -> Envelope {
        let mut body = json!({
            "app_alias": "web",
            "job_id": JOB_ID,
            "target_nodes_count": 1,
            "plugins": fixtures::container_plugins(),
            "chainstore_response": true,
        });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        let outcome = self.engine.create_pipeline(self.signed(body)).await;
        self.settle(outcome).await
    }
}

impl Default for TestDeeploy {
    fn default() -> Self {
        Self::new()
    }
}

/// Defaults plus a paid type-1 bundle of one container.
pub fn test_config() -> DeeployConfig {
    let mut config = DeeployConfig::default();
    config.pending.request_timeout_secs = 10;
    config.pending.poll_interval_ms = 10;
    config.payment.job_types.insert(
        "1".to_owned(),
        JobTypeSpec {
            native: false,
            cpu: Some(1.0),
            memory: Some(json!("512m")),
        },
    );
    config
}
