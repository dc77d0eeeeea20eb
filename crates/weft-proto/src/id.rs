//! Node identifiers.
//!
//! A `NodeId` is a 16-character opaque identifier, stable for a node's
//! lifetime, used as the peer address throughout the protocol. It is bound
//! to the node's Ed25519 key: the identifier is the first 16 hex characters
//! of SHA-256 over the public key bytes, so any peer that learns the key can
//! check the binding. The reserved author id of the genesis block
//! (`"genesis"`) is the one identifier outside that form.

use crate::{GENESIS_AUTHOR, NODE_ID_LEN, ProtoError};
use serde::{Deserialize, Serialize};
use weft_crypto::{VerifyingKey, sha256};

/// 16-character opaque node identifier
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Derive the identifier bound to a public key
    ///
    /// The binding is `hex(SHA-256(public_key))[..16]`; peers verify it when
    /// a session introduces itself with a `hello` frame.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let digest = sha256(&key.to_bytes());
        Self(digest.to_hex()[..NODE_ID_LEN].to_string())
    }

    /// Generate a random identifier from the system CSPRNG
    ///
    /// Used for nodes that have no key yet (test fixtures, tooling). A real
    /// node derives its id from its key so peers can verify the binding.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_LEN / 2];
        getrandom::getrandom(&mut bytes).expect("system RNG unavailable");
        Self(hex::encode(bytes))
    }

    /// The reserved author id of the genesis block
    #[must_use]
    pub fn genesis() -> Self {
        Self(GENESIS_AUTHOR.to_string())
    }

    /// Parse an identifier received on the wire
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidNodeId`] unless the input is exactly 16
    /// characters (or the reserved genesis id).
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.len() == NODE_ID_LEN || s == GENESIS_AUTHOR {
            Ok(Self(s.to_string()))
        } else {
            Err(ProtoError::InvalidNodeId(s.to_string()))
        }
    }

    /// Check that a public key hashes to this identifier
    #[must_use]
    pub fn matches_key(&self, key: &VerifyingKey) -> bool {
        Self::from_verifying_key(key) == *self
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
