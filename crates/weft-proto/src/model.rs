//! Ledger data model: transactions and blocks.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Base64 wire form for binary payload fields.
pub(crate) mod serde_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// A signed ledger entry.
///
/// The signature covers the canonical serialization of
/// `{from, to, data, amount, timestamp}` (see [`crate::canonical`]).
/// Unsigned transactions exist for system-internal use; consensus refuses
/// them for block inclusion unless authored by the proposing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique transaction id
    pub id: Uuid,
    /// Originating node
    pub from: NodeId,
    /// Recipient designator (free-form)
    pub to: String,
    /// Opaque payload, base64 on the wire
    #[serde(with = "serde_b64")]
    pub data: Vec<u8>,
    /// Transferred amount
    pub amount: f64,
    /// Submission wall-clock time (ms since epoch)
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    /// Hex Ed25519 signature over the canonical blob, if signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    /// Create a fresh unsigned transaction stamped with the current time
    #[must_use]
    pub fn new(from: NodeId, to: impl Into<String>, data: Vec<u8>, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to: to.into(),
            data,
            amount,
            timestamp_ms: now_ms(),
            signature: None,
        }
    }

    /// Whether the transaction carries a signature
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// An indexed, hash-linked record of a batch of committed transactions.
///
/// `hash` is SHA-256 over the canonical serialization of
/// `{index, timestamp, transactions, previousHash, nonce, author}`; the
/// `hash` and `signature` fields themselves are excluded from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain; the genesis block has index 0
    pub index: u64,
    /// Production wall-clock time (ms since epoch)
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    /// Committed transactions, in inclusion order
    pub transactions: Vec<Transaction>,
    /// Hash of the predecessor block; `"0"` for genesis
    pub previous_hash: String,
    /// Hash of this block's canonical form
    pub hash: String,
    /// Reserved field, always 0 in this protocol revision
    pub nonce: u64,
    /// Proposing node; `"genesis"` for the genesis block
    pub author: NodeId,
    /// Hex Ed25519 signature by the author over the block hash bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Block {
    /// Whether the block carries an author signature
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Ids of the contained transactions, in inclusion order
    #[must_use]
    pub fn transaction_ids(&self) -> Vec<Uuid> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }
}
