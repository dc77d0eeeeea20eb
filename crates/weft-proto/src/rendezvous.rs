//! Rendezvous wire messages.
//!
//! The rendezvous service is a line-oriented bidirectional text channel; it
//! only relays session-setup blobs between nodes that have no direct channel
//! yet, and notifies clients of peers arriving and leaving.

use crate::{NodeId, ProtoError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// The session-setup blob relayed in `offer` and `answer` frames.
///
/// For the stream transport in this workspace the blob is simply the
/// sender's listen address plus its hex public key; the dial tie-break
/// decides which side actually connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSignal {
    /// Where the sender accepts transport connections
    pub addr: SocketAddr,
    /// Sender's hex Ed25519 public key
    pub public_key: String,
}

/// Rendezvous protocol frames (both directions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RendezvousMessage {
    /// Client announces itself after opening the channel
    Register {
        /// The registering node
        node_id: NodeId,
    },

    /// Client asks for a fresh peer list
    GetPeers {
        /// The asking node
        node_id: NodeId,
    },

    /// Directed session-setup blob (dial request)
    Offer {
        /// Originating node
        from: NodeId,
        /// Destination node
        to: NodeId,
        /// Transport-specific setup blob
        signal: SessionSignal,
    },

    /// Directed session-setup blob (dial reply)
    Answer {
        /// Originating node
        from: NodeId,
        /// Destination node
        to: NodeId,
        /// Transport-specific setup blob
        signal: SessionSignal,
    },

    /// Directed transport candidate hint; opaque to the stream transport
    IceCandidate {
        /// Originating node
        from: NodeId,
        /// Destination node
        to: NodeId,
        /// Transport-specific candidate blob
        signal: serde_json::Value,
    },

    /// Client keepalive
    Ping,

    /// Service keepalive reply
    Pong {
        /// Service wall-clock time (ms)
        timestamp: i64,
    },

    /// Registration snapshot sent after `register` or `get-peers`
    PeerList {
        /// Currently registered nodes, excluding the recipient
        peers: Vec<NodeId>,
    },

    /// A node registered
    PeerJoined {
        /// The arriving node
        node_id: NodeId,
        /// Service wall-clock time (ms)
        timestamp: i64,
    },

    /// A node's channel closed
    PeerLeft {
        /// The departing node
        node_id: NodeId,
        /// Service wall-clock time (ms)
        timestamp: i64,
    },

    /// Service-side failure notice
    Error {
        /// Human-readable reason
        message: String,
        /// The offending frame, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_message: Option<String>,
    },
}

impl RendezvousMessage {
    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decode`] for malformed or unknown frames.
    pub fn decode(frame: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(frame).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}
