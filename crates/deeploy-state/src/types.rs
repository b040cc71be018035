use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::BlobError;

/// Address of a blob derived from its content.
///
/// The address is the lowercase hex SHA-256 of the stored bytes, so equal
/// content always maps to the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Compute the address of the given bytes.
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse an address previously produced by [`ContentAddress::for_bytes`].
    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        let is_hex = raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit());
        if !is_hex {
            return Err(BlobError::InvalidAddress(raw.to_owned()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that `data` hashes to this address.
    pub fn verify(&self, data: &[u8]) -> Result<(), BlobError> {
        if Self::for_bytes(data) == *self {
            Ok(())
        } else {
            Err(BlobError::Integrity(self.0.clone()))
        }
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContentAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn address_is_stable_for_equal_content() {
        let a = ContentAddress::for_bytes(b"{\"a\":1}");
        let b = ContentAddress::for_bytes(b"{\"a\":1}");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, ContentAddress::for_bytes(b"{\"a\":2}"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ContentAddress::parse("not-a-hash").is_err());
        let addr = ContentAddress::for_bytes(b"x");
        let upper = addr.as_str().to_ascii_uppercase();
        assert_eq!(ContentAddress::parse(&upper).unwrap(), addr);
    }

    #[test]
    fn verify_detects_tampering() {
        let addr = ContentAddress::for_bytes(b"payload");
        assert!(addr.verify(b"payload").is_ok());
        assert!(matches!(addr.verify(b"other"), Err(BlobError::Integrity(_))));
    }
}
