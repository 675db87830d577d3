//! Pseudo-identity derivation. Ported behaviorally from `shasum`/`newUser`
//! in `original_source/{util,main}.go`: hash the marshalled public key
//! bytes if one was presented, otherwise fall back to the remote address.

use sha2::{Digest, Sha256};
use std::fmt;

/// A stable, hex-encoded SHA-256 identity for a connecting client.
///
/// Identities are stable across reconnects (same key -> same identity) and
/// key every piece of per-user persisted state: preferences, bans, and the
/// join-rate counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Derive an identity from marshalled public key bytes.
    pub fn from_pubkey(marshalled_key: &[u8]) -> Self {
        Self(hex_sha256(marshalled_key))
    }

    /// Derive an identity from a remote address string, used when the
    /// client presented no public key at all.
    pub fn from_remote_addr(addr: &str) -> Self {
        Self(hex_sha256(addr.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_yields_same_identity() {
        let a = Identity::from_pubkey(b"some-marshalled-key-bytes");
        let b = Identity::from_pubkey(b"some-marshalled-key-bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_yield_different_identities() {
        let a = Identity::from_pubkey(b"key-one");
        let b = Identity::from_pubkey(b"key-two");
        assert_ne!(a, b);
    }

    #[test]
    fn falls_back_to_remote_addr() {
        let a = Identity::from_remote_addr("203.0.113.7");
        assert_eq!(a.as_str().len(), 64);
    }
}
