//! Peer-to-peer wire messages.
//!
//! Every peer frame is a JSON object tagged by its `type` field. Within one
//! session frames are delivered reliably and in order; across sessions there
//! is no ordering guarantee.

use crate::{Block, NodeId, ProtoError, Transaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Peer-to-peer protocol frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PeerMessage {
    /// First frame on every new transport: introduces the sender and its
    /// public key so the receiver can verify the id/key binding
    Hello {
        /// Sender's node id
        node_id: NodeId,
        /// Sender's hex Ed25519 public key
        public_key: String,
    },

    /// Heartbeat probe
    Ping {
        /// Sender's wall-clock time (ms)
        timestamp: i64,
    },

    /// Heartbeat reply, echoing the probe's timestamp
    Pong {
        /// Timestamp copied from the originating ping
        timestamp: i64,
    },

    /// Announce a locally shared file
    FileOffer {
        /// Catalog id of the file
        file_id: Uuid,
        /// File name
        name: String,
        /// Content size in bytes
        size: u64,
        /// MIME type
        mime_type: String,
        /// Hex SHA-256 of the content
        sha256_hash: String,
    },

    /// Withdraw a previously offered file
    FileUnavailable {
        /// Catalog id of the file
        file_id: Uuid,
    },

    /// Ask the advertiser to start sending a file
    FileRequest {
        /// Catalog id of the file
        file_id: Uuid,
        /// Requesting node
        requester: NodeId,
    },

    /// Transfer header, sent once before the chunks
    FileMetadata {
        /// Catalog id of the file
        file_id: Uuid,
        /// File name
        name: String,
        /// Content size in bytes
        size: u64,
        /// MIME type
        mime_type: String,
        /// Number of chunks that will follow
        total_chunks: u64,
        /// Size of each chunk except possibly the last
        chunk_size: u64,
    },

    /// One chunk of file content
    FileChunk {
        /// Catalog id of the file
        file_id: Uuid,
        /// Zero-based chunk position
        chunk_index: u64,
        /// Base64 chunk payload
        chunk_data: String,
        /// Whether this is the final chunk
        is_last: bool,
    },

    /// Transfer refusal or failure notice
    FileError {
        /// Catalog id of the file
        file_id: Uuid,
        /// Human-readable reason
        message: String,
    },

    /// Gossip a pending transaction
    Transaction {
        /// The transaction
        transaction: Transaction,
    },

    /// Leader proposes a block for voting
    BlockProposal {
        /// The proposed block
        block: Block,
    },

    /// Vote on a proposed block
    BlockVote {
        /// Hash of the voted block
        block_hash: String,
        /// Voting node
        voter: NodeId,
        /// Approval or rejection
        approve: bool,
        /// Vote wall-clock time (ms)
        timestamp: i64,
    },

    /// Announce a freshly committed block
    NewBlock {
        /// The committed block
        block: Block,
    },

    /// Ask a peer for its chain from a given height
    BlockchainSyncRequest {
        /// First block index wanted
        from_index: u64,
        /// Correlation id echoed in the response
        request_id: Uuid,
    },

    /// Serve a chain segment
    BlockchainSyncResponse {
        /// Correlation id from the request
        request_id: Uuid,
        /// Blocks from the requested index to the tip
        blocks: Vec<Block>,
        /// The server's total chain length
        total_blocks: u64,
    },

    /// Claim leadership for the current slot
    LeaderAnnouncement {
        /// Claimed leader
        leader: NodeId,
        /// Claimant's chain height
        block_height: u64,
        /// Announcement wall-clock time (ms)
        timestamp: i64,
    },
}

impl PeerMessage {
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

    /// The wire name of this frame's type
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            PeerMessage::Hello { .. } => "hello",
            PeerMessage::Ping { .. } => "ping",
            PeerMessage::Pong { .. } => "pong",
            PeerMessage::FileOffer { .. } => "file-offer",
            PeerMessage::FileUnavailable { .. } => "file-unavailable",
            PeerMessage::FileRequest { .. } => "file-request",
            PeerMessage::FileMetadata { .. } => "file-metadata",
            PeerMessage::FileChunk { .. } => "file-chunk",
            PeerMessage::FileError { .. } => "file-error",
            PeerMessage::Transaction { .. } => "transaction",
            PeerMessage::BlockProposal { .. } => "block-proposal",
            PeerMessage::BlockVote { .. } => "block-vote",
            PeerMessage::NewBlock { .. } => "new-block",
            PeerMessage::BlockchainSyncRequest { .. } => "blockchain-sync-request",
            PeerMessage::BlockchainSyncResponse { .. } => "blockchain-sync-response",
            PeerMessage::LeaderAnnouncement { .. } => "leader-announcement",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_form() {
        let msg = PeerMessage::Ping { timestamp: 12345 };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, "{\"type\":\"ping\",\"timestamp\":12345}");
    }

    #[test]
    fn test_tag_is_kebab_case() {
        let msg = PeerMessage::BlockchainSyncRequest {
            from_index: 3,
            request_id: Uuid::nil(),
        };
        let frame = msg.encode().unwrap();
        assert!(frame.contains("\"type\":\"blockchain-sync-request\""));
        assert!(frame.contains("\"fromIndex\":3"));
    }

    #[test]
    fn test_fields_are_camel_case() {
        let msg = PeerMessage::FileChunk {
            file_id: Uuid::nil(),
            chunk_index: 7,
            chunk_data: "AAAA".to_string(),
            is_last: false,
        };
        let frame = msg.encode().unwrap();
        assert!(frame.contains("\"fileId\""));
        assert!(frame.contains("\"chunkIndex\":7"));
        assert!(frame.contains("\"isLast\":false"));
    }

    #[test]
    fn test_roundtrip_all_simple_frames() {
        let frames = vec![
            PeerMessage::Hello {
                node_id: NodeId::random(),
                public_key: "00".repeat(32),
            },
            PeerMessage::Ping { timestamp: 1 },
            PeerMessage::Pong { timestamp: 1 },
            PeerMessage::FileUnavailable { file_id: Uuid::new_v4() },
            PeerMessage::FileRequest {
                file_id: Uuid::new_v4(),
                requester: NodeId::random(),
            },
            PeerMessage::LeaderAnnouncement {
                leader: NodeId::random(),
                block_height: 9,
                timestamp: 5,
            },
        ];
        for msg in frames {
            let frame = msg.encode().unwrap();
            assert_eq!(PeerMessage::decode(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(PeerMessage::decode("{\"type\":\"mystery\"}").is_err());
        assert!(PeerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_message_type_matches_tag() {
        let msg = PeerMessage::Ping { timestamp: 0 };
        let frame = msg.encode().unwrap();
        assert!(frame.contains(&format!("\"type\":\"{}\"", msg.message_type())));
    }
}
