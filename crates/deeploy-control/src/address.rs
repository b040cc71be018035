//! Node address forms.
//!
//! The fleet names nodes by internal address (`0xai_` prefix); the ledger and
//! wallets use Ethereum addresses. Everything entering the engine is
//! normalised to the internal form and everything sent to the ledger to the
//! ETH form.

use std::collections::BTreeSet;

use crate::error::{ControlResult, NodeError};
use crate::ledger::Ledger;

/// Prefix of internal node addresses.
pub const INTERNAL_PREFIX: &str = "0xai_";

/// `0x` followed by 40 hex characters.
#[must_use]
pub fn is_eth_address(raw: &str) -> bool {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[must_use]
pub fn is_internal_address(raw: &str) -> bool {
    raw.strip_prefix(INTERNAL_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_graphic()))
}

/// Lower-cased ETH address, used for every comparison.
#[must_use]
pub fn normalize_eth(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Case-insensitive comparison of two ETH addresses.
#[must_use]
pub fn same_eth(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Resolve a caller-supplied node address to its internal form.
pub async fn to_internal(ledger: &dyn Ledger, raw: &str) -> ControlResult<String> {
    let raw = raw.trim();
    if is_internal_address(raw) {
        return Ok(raw.to_owned());
    }
    if is_eth_address(raw) {
        return ledger
            .eth_addr_to_node_addr(&normalize_eth(raw))
            .await?
            .ok_or_else(|| NodeError::InvalidAddress(raw.to_owned()).into());
    }
    Err(NodeError::InvalidAddress(raw.to_owned()).into())
}

/// Resolve internal node addresses to sorted, de-duplicated ETH addresses.
pub async fn to_eth_sorted(ledger: &dyn Ledger, nodes: &[String]) -> ControlResult<Vec<String>> {
    let mut out = BTreeSet::new();
    for node in nodes {
        let eth = if is_eth_address(node) {
            normalize_eth(node)
        } else {
            ledger
                .node_addr_to_eth_addr(node)
                .await?
                .map(|a| normalize_eth(&a))
                .ok_or_else(|| NodeError::InvalidAddress(node.clone()))?
        };
        out.insert(eth);
    }
    Ok(out.into_iter().collect())
}
