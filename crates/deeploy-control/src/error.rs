//! Error types for deeploy-control.
//!
//! Every variant carries a short, stable code. The HTTP boundary prefixes
//! error messages with it so callers can branch without parsing prose.

use std::error::Error as _;

use deeploy_state::{BlobError, KvError};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Signature, nonce and wallet failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The recovered signer differs from the declared sender.
    #[error("signature mismatch: recovered {recovered}, declared {declared}")]
    SignatureMismatch {
        /// Address recovered from the signature.
        recovered: String,
        /// Address the request claims to come from.
        declared: String,
    },

    /// Signature bytes could not be decoded or recovered.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Nonce is not a hex millisecond timestamp.
    #[error("malformed nonce: {0}")]
    MalformedNonce(String),

    /// Nonce lies in the future.
    #[error("nonce is {ahead_ms}ms in the future")]
    NonceInFuture {
        /// How far ahead of the local clock the nonce is.
        ahead_ms: i64,
    },

    /// Nonce is older than the freshness window.
    #[error("nonce expired: {age_secs}s old, max {max_age_secs}s")]
    NonceExpired {
        /// Age of the nonce.
        age_secs: i64,
        /// Freshness window.
        max_age_secs: i64,
    },

    /// The signer's wallet owns no nodes.
    #[error("wallet {0} owns no nodes")]
    NoWalletNodes(String),

    /// Oracle-only endpoint called by a non-oracle.
    #[error("sender {0} is not an oracle")]
    NotOracle(String),

    /// The signer does not own the addressed resource.
    #[error("sender {sender} is not the owner of {resource}")]
    NotOwner {
        /// Signer address.
        sender: String,
        /// Resource description.
        resource: String,
    },
}

impl AuthError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SignatureMismatch { .. } | Self::MalformedSignature(_) => "AUTH1",
            Self::MalformedNonce(_) | Self::NonceInFuture { .. } | Self::NonceExpired { .. } => {
                "AUTH2"
            }
            Self::NoWalletNodes(_) => "AUTH3",
            Self::NotOracle(_) => "AUTH4",
            Self::NotOwner { .. } => "AUTH5",
        }
    }
}

/// Node selection and availability failures.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Node is unknown to the fleet or not online.
    #[error("node {0} is offline")]
    Offline(String),

    /// No online, schedulable node exists at all.
    #[error("no online nodes available")]
    NoneOnline,

    /// Nothing deployed matches the lookup.
    #[error("no running instances found for {0}")]
    NotFound(String),

    /// Address is neither an ETH address nor an internal node address.
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    /// Fewer eligible nodes than requested.
    #[error("not enough eligible nodes: required {required}, available {available}")]
    CountDeficit {
        /// Requested node count.
        required: usize,
        /// Eligible node count.
        available: usize,
    },

    /// Supervisor nodes never host workloads.
    #[error("node {0} is a supervisor and cannot host deployments")]
    SupervisorIneligible(String),

    /// Node lacks the resources for the request.
    #[error("node {node} does not have enough resources:\n{}", .details.join("\n"))]
    ResourceDeficit {
        /// Offending node.
        node: String,
        /// One line per lacking resource.
        details: Vec<String>,
    },
}

impl NodeError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Offline(_) => "NODES1",
            Self::NoneOnline => "NODES2",
            Self::NotFound(_) => "NODES3",
            Self::InvalidAddress(_) => "NODES4",
            Self::CountDeficit { .. } => "NODES5",
            Self::SupervisorIneligible(_) => "NODES6",
            Self::ResourceDeficit { .. } => "NODERES1",
        }
    }
}

/// Job payment and ownership failures.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Job is missing, owned by someone else or already started.
    #[error("job {job_id} is not paid for by the sender or cannot be used")]
    Unpaid {
        /// Job identifier.
        job_id: u64,
    },

    /// Request names no job while unpaid jobs are disabled.
    #[error("job_id is required")]
    MissingJob,

    /// Ledger returned a job without a job type.
    #[error("job {0} has no job type")]
    MissingJobType(u64),

    /// No resource bundle is configured for the job type.
    #[error("no resource spec for job type {0}")]
    MissingResourceSpec(u32),

    /// Requested container resources differ from the paid bundle.
    #[error("requested resources {requested} do not match paid resources {expected} for job type {job_type}")]
    ResourceMismatch {
        /// Job type.
        job_type: u32,
        /// Paid bundle.
        expected: String,
        /// Aggregated request.
        requested: String,
    },
}

impl PaymentError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unpaid { .. } | Self::MissingJob => "PAYMENT1",
            Self::MissingJobType(_) => "PAYMENT2",
            Self::MissingResourceSpec(_) => "PAYMENT3",
            Self::ResourceMismatch { .. } => "PAYMENT4",
        }
    }
}

/// Errors that can occur in the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Authentication failure.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Node selection failure.
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// Payment validation failure.
    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Malformed plugins or unknown instance ids.
    #[error("plugins error: {0}")]
    Plugins(String),

    /// Missing or malformed request fields.
    #[error("request error: {0}")]
    Request(String),

    /// Ledger communication error.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Fleet communication error.
    #[error("fleet error: {0}")]
    Fleet(String),

    /// Chainstore error.
    #[error("chainstore error: {0}")]
    Kv(#[from] KvError),

    /// Blob store error.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a plugins error.
    #[must_use]
    pub fn plugins(msg: impl Into<String>) -> Self {
        Self::Plugins(msg.into())
    }

    /// Create a request error.
    #[must_use]
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create a ledger error.
    #[must_use]
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a fleet error.
    #[must_use]
    pub fn fleet(msg: impl Into<String>) -> Self {
        Self::Fleet(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::Node(e) => e.code(),
            Self::Payment(e) => e.code(),
            Self::Plugins(_) => "PLUGINS1",
            Self::Request(_) | Self::Serialisation(_) => "REQUEST1",
            Self::Ledger(_) => "LEDGER1",
            Self::Fleet(_) | Self::Http(_) => "FLEET1",
            Self::Kv(_) | Self::Blob(_) => "STATE1",
            Self::Config(_) | Self::Internal(_) => "INTERNAL1",
        }
    }

    /// Message rendered into failure envelopes.
    #[must_use]
    pub fn envelope_message(&self) -> String {
        format!("{}: {self}", self.code())
    }

    /// The `source()` chain, outermost first, capped at `limit` entries.
    #[must_use]
    pub fn trace(&self, limit: usize) -> Vec<String> {
        let mut lines = vec![format!("{self:?}")];
        let mut source = self.source();
        while let Some(err) = source {
            lines.push(err.to_string());
            source = err.source();
        }
        let skip = lines.len().saturating_sub(limit);
        lines.into_iter().skip(skip).collect()
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialisation(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_taxonomy() {
        let err = ControlError::from(NodeError::SupervisorIneligible("0xai_a".into()));
        assert_eq!(err.code(), "NODES6");

        let err = ControlError::from(PaymentError::MissingResourceSpec(3));
        assert_eq!(err.code(), "PAYMENT3");

        let err = ControlError::from(AuthError::NonceInFuture { ahead_ms: 5 });
        assert_eq!(err.code(), "AUTH2");

        assert_eq!(ControlError::plugins("bad").code(), "PLUGINS1");
    }

    #[test]
    fn resource_deficit_lists_every_resource() {
        let err = NodeError::ResourceDeficit {
            node: "0xai_n1".into(),
            details: vec![
                "- cpu: available 1 cores < required 2 cores".into(),
                "- memory: available 256 MB < required 512 MB".into(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("0xai_n1"));
        assert!(msg.contains("- cpu: available 1 cores < required 2 cores"));
        assert!(msg.contains("- memory: available 256 MB < required 512 MB"));
    }

    #[test]
    fn envelope_message_is_prefixed_with_code() {
        let err = ControlError::request("missing app_alias");
        assert_eq!(
            err.envelope_message(),
            "REQUEST1: request error: missing app_alias"
        );
    }

    #[test]
    fn trace_includes_source_chain() {
        let err = ControlError::from(AuthError::NoWalletNodes("0xabc".into()));
        let trace = err.trace(5);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1], "wallet 0xabc owns no nodes");
    }
}
