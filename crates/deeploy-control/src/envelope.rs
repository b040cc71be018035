//! The uniform response envelope.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ControlError;
use crate::types::DeeployStatus;

/// Signer summary echoed in every response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthSummary {
    pub sender: String,
    pub nonce: String,
    pub sender_oracles: Vec<String>,
    pub sender_nodes_count: usize,
    pub sender_total_count: usize,
}

/// Body returned by every endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Envelope {
    pub status: DeeployStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
    pub request: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSummary>,
    /// Endpoint-specific top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    #[must_use]
    pub fn new(status: DeeployStatus, request: Value) -> Self {
        Self {
            status,
            request,
            ..Self::default()
        }
    }

    /// Failure envelope for an error caught at the endpoint boundary.
    ///
    /// `verbose > 1` attaches the error's source chain.
    #[must_use]
    pub fn failure(error: &ControlError, request: Value, verbose: u8) -> Self {
        Self {
            status: DeeployStatus::Fail,
            error: Some(error.envelope_message()),
            trace: (verbose > 1).then(|| error.trace(5)),
            request,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthSummary) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    #[must_use]
    pub fn with_job_id(mut self, job_id: Option<u64>) -> Self {
        self.job_id = job_id;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.status_details = Some(details);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_owned(), value);
        self
    }

    /// Same envelope with a different status.
    #[must_use]
    pub fn finish(mut self, status: DeeployStatus) -> Self {
        self.status = status;
        self
    }
}
