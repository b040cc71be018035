//! Request authentication.
//!
//! Requests are signed as EIP-191 personal messages over the canonical
//! payload. The verifier recovers the signer, checks the nonce freshness
//! window and resolves the signer's wallet against the ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::address::{normalize_eth, same_eth};
use crate::clock::Clock;
use crate::envelope::AuthSummary;
use crate::error::{AuthError, ControlError, ControlResult};
use crate::ledger::Ledger;
use crate::request::SignedRequest;

/// Who may call an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any wallet that owns at least one node.
    Any,
    /// Only oracle nodes.
    OracleOnly,
}

/// A signer that passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSigner {
    /// Lower-cased ETH address.
    pub address: String,
    pub nonce: String,
    /// ETH addresses of the nodes the signer's wallet owns.
    pub wallet_nodes: Vec<String>,
    /// The subset of `wallet_nodes` that are oracles.
    pub wallet_oracles: Vec<String>,
}

impl VerifiedSigner {
    #[must_use]
    pub fn auth_summary(&self) -> AuthSummary {
        AuthSummary {
            sender: self.address.clone(),
            nonce: self.nonce.clone(),
            sender_oracles: self.wallet_oracles.clone(),
            sender_nodes_count: self.wallet_nodes.len() - self.wallet_oracles.len(),
            sender_total_count: self.wallet_nodes.len(),
        }
    }
}

/// Verifies signed requests.
#[derive(Clone)]
pub struct RequestVerifier {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    nonce_max_age: Duration,
}

impl std::fmt::Debug for RequestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestVerifier")
            .field("nonce_max_age", &self.nonce_max_age)
            .finish_non_exhaustive()
    }
}

impl RequestVerifier {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>, nonce_max_age: Duration) -> Self {
        Self {
            ledger,
            clock,
            nonce_max_age,
        }
    }

    /// Authenticate a request.
    pub async fn verify(
        &self,
        request: &SignedRequest,
        access: Access,
    ) -> ControlResult<VerifiedSigner> {
        let recovered = recover_signer(&request.canonical_message(), request.signature())?;
        if !same_eth(&recovered, request.sender()) {
            return Err(AuthError::SignatureMismatch {
                recovered,
                declared: request.sender().to_owned(),
            }
            .into());
        }

        let nonce = request.nonce()?;
        check_nonce(nonce, self.clock.now(), self.nonce_max_age)?;

        let oracles: BTreeSet<String> = self
            .ledger
            .oracles()
            .await?
            .iter()
            .map(|o| normalize_eth(o))
            .collect();

        let wallet_nodes: Vec<String> = self
            .ledger
            .wallet_nodes(&recovered)
            .await?
            .iter()
            .map(|n| normalize_eth(n))
            .collect();

        match access {
            Access::Any if wallet_nodes.is_empty() => {
                return Err(AuthError::NoWalletNodes(recovered).into());
            }
            Access::OracleOnly if !oracles.contains(&recovered) => {
                return Err(AuthError::NotOracle(recovered).into());
            }
            _ => {}
        }

        let wallet_oracles = wallet_nodes
            .iter()
            .filter(|n| oracles.contains(*n))
            .cloned()
            .collect();

        debug!(sender = %recovered, nodes = wallet_nodes.len(), "request verified");
        Ok(VerifiedSigner {
            address: recovered,
            nonce: nonce.to_owned(),
            wallet_nodes,
            wallet_oracles,
        })
    }
}

/// Check a hex millisecond nonce against `now`.
///
/// Valid iff `0 <= now - nonce <= max_age`. Returns the nonce in millis.
pub fn check_nonce(nonce: &str, now: DateTime<Utc>, max_age: Duration) -> Result<i64, AuthError> {
    let digits = nonce
        .strip_prefix("0x")
        .or_else(|| nonce.strip_prefix("0X"))
        .unwrap_or(nonce);
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AuthError::MalformedNonce(format!("{nonce}: not a hex number")));
    }
    let millis = u64::from_str_radix(digits, 16)
        .ok()
        .and_then(|m| i64::try_from(m).ok())
        .ok_or_else(|| AuthError::MalformedNonce(format!("{nonce}: out of range")))?;

    let age_ms = now
        .timestamp_millis()
        .checked_sub(millis)
        .ok_or_else(|| AuthError::MalformedNonce(format!("{nonce}: out of range")))?;
    if age_ms < 0 {
        return Err(AuthError::NonceInFuture { ahead_ms: -age_ms });
    }
    if age_ms > max_age.num_milliseconds() {
        return Err(AuthError::NonceExpired {
            age_secs: age_ms / 1000,
            max_age_secs: max_age.num_seconds(),
        });
    }
    Ok(millis)
}

/// Keccak-256 of the EIP-191 personal message wrapping `message`.
#[must_use]
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// ETH address of a public key.
#[must_use]
pub fn eth_address(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover the ETH address that produced a 65-byte hex signature.
pub fn recover_signer(message: &str, signature: &str) -> Result<String, AuthError> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(AuthError::MalformedSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }

    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(AuthError::MalformedSignature(format!(
                "invalid recovery byte {other}"
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| AuthError::MalformedSignature(format!("invalid recovery byte {v}")))?;
    let sig = Signature::from_slice(&bytes[..64])
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;

    let hash = eip191_hash(message.as_bytes());
    let key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
    Ok(eth_address(&key))
}

/// Sign `message` the way clients do. Used by tooling and tests.
pub fn sign_message(key: &SigningKey, message: &str) -> ControlResult<String> {
    let hash = eip191_hash(message.as_bytes());
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&hash)
        .map_err(|e| ControlError::internal(format!("signing failed: {e}")))?;
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    Ok(format!("0x{}", hex::encode(bytes)))
}
