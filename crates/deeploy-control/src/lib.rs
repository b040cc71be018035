//! Deeploy control plane
//!
//! This crate turns signed deployment requests into pipeline commands on a
//! fleet of edge nodes and tracks them until the nodes confirm.
//!
//! # Architecture
//!
//! - **Authentication**: requests are signed EIP-191 messages; the signer is
//!   recovered and checked against the ledger
//!   ([`RequestVerifier`](auth::RequestVerifier))
//! - **Payment**: a job must be paid for and sized for its plugins before it
//!   runs ([`PaymentValidator`](payment::PaymentValidator))
//! - **Placement**: target nodes are chosen among online nodes with enough
//!   free resources ([`NodeSelector`](placement::NodeSelector))
//! - **Orchestration**: create, update, scale-up and delete are planned as a
//!   sequence of node commands ([`PipelineOrchestrator`])
//! - **Confirmation**: dispatched operations wait on chainstore keys written
//!   by the nodes ([`PostponedRequestScheduler`])
//! - **API surface**: one POST route per operation, each answering with an
//!   [`Envelope`]
//!
//! # Operation lifecycle
//!
//! ```text
//! Validating ──▶ NodeSelection ──▶ Dispatching ──▶ AwaitingConfirmation ──▶ Confirmed
//!     │               │                 │                    │
//!     ▼               ▼                 ▼                    ▼
//!   Failed          Failed          Delivered             TimedOut
//! ```
//!
//! Transitions are typestate methods on [`Operation`]; invalid ones do not
//! compile.

#![forbid(unsafe_code)]

pub mod address;
pub mod api;
pub mod auth;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fleet;
pub mod jobs;
pub mod ledger;
pub mod orchestrator;
pub mod payment;
pub mod pending;
pub mod placement;
pub mod plugins;
pub mod request;
pub mod resources;
pub mod service;
pub mod specs;
pub mod state;
pub mod strategy;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::DeeployConfig;
pub use engine::{Collaborators, DeeployEngine};
pub use envelope::Envelope;
pub use error::{ControlError, ControlResult};
pub use orchestrator::PipelineOrchestrator;
pub use pending::{Outcome, PostponedRequestScheduler};
pub use service::DeeployService;
pub use state::{
    AwaitingConfirmation, Confirmed, Delivered, Dispatching, Failed, NodeSelection, Operation,
    OperationKind, OperationState, TimedOut, Validating,
};
pub use strategy::UpdateStrategy;
pub use types::{DeeployStatus, PendingId};
