//! Core identifiers and statuses.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier of a postponed request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingId(String);

impl PendingId {
    /// Create a pending ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique pending ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PendingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Terminal and intermediate statuses reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeeployStatus {
    /// Every expected confirmation arrived.
    #[default]
    Success,
    /// Rejected before or during dispatch.
    Fail,
    /// Still waiting for confirmations.
    Pending,
    /// Dispatched but not confirmed in time.
    Timeout,
    /// Dispatched to an unconfirmable job.
    CommandDelivered,
}

impl DeeployStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Pending => "pending",
            Self::Timeout => "timeout",
            Self::CommandDelivered => "command_delivered",
        }
    }
}

impl fmt::Display for DeeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

fn truncated(raw: &str, max: usize) -> String {
    raw.chars().take(max).collect()
}

/// New app id: lower-cased alias cut to 13 chars, `_`, 7 hex chars.
#[must_use]
pub fn new_app_id(alias: &str) -> String {
    format!("{}_{}", truncated(&alias.to_lowercase(), 13), random_hex(7))
}

/// New instance id: upper-cased signature cut to 13 chars, `_`, 6 hex chars.
#[must_use]
pub fn new_instance_id(signature: &str) -> String {
    format!(
        "{}_{}",
        truncated(&signature.to_uppercase(), 13),
        random_hex(6)
    )
}

/// New chainstore confirmation key for one instance.
#[must_use]
pub fn new_response_key(instance_id: &str) -> String {
    format!("{instance_id}_{}", random_hex(8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(DeeployStatus::CommandDelivered.as_str(), "command_delivered");
        let json = serde_json::to_string(&DeeployStatus::Timeout).unwrap_or_default();
        assert_eq!(json, "\"timeout\"");
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let app = new_app_id("My Very Long Application");
        assert!(app.starts_with("my very long _"));
        assert_eq!(app.len(), 13 + 1 + 7);

        let instance = new_instance_id("container_app_runner");
        assert!(instance.starts_with("CONTAINER_APP_"));
        assert_eq!(instance.len(), 13 + 1 + 6);

        let key = new_response_key(&instance);
        assert!(key.starts_with(&instance));
        assert_eq!(key.len(), instance.len() + 1 + 8);
    }

    #[test]
    fn pending_ids_are_unique() {
        assert_ne!(PendingId::generate(), PendingId::generate());
    }
}
