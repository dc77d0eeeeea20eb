//! Typed node events.
//!
//! One enum of event kinds with explicit subscription replaces the
//! free-form runtime emitter the protocol grew up with. Emission is
//! synchronous and never re-enters the emitter; slow subscribers miss
//! events rather than blocking the node.

use std::sync::Arc;
use uuid::Uuid;
use weft_files::{FileEntry, FileOffer, TransferError};
use weft_proto::{Block, NodeId, Transaction};

/// Everything a front-end can observe about a node
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A peer session entered service
    PeerConnected {
        /// The peer
        peer: NodeId,
    },
    /// A peer session ended
    PeerDisconnected {
        /// The peer
        peer: NodeId,
    },
    /// A local transaction was signed, pooled, and broadcast
    TransactionSubmitted {
        /// The transaction
        transaction: Transaction,
    },
    /// A valid transaction arrived from a peer
    TransactionReceived {
        /// The transaction
        transaction: Transaction,
    },
    /// A block was committed to the local chain
    BlockAdded {
        /// The committed block
        block: Block,
    },
    /// The accepted leader changed
    LeaderChanged {
        /// The new leader, if any
        leader: Option<NodeId>,
    },
    /// A local file entered the shared catalog
    FileShared {
        /// The new entry
        entry: FileEntry,
    },
    /// A peer's file became available for download
    FileAvailable {
        /// The offer
        offer: FileOffer,
    },
    /// A previously offered file is gone
    FileUnavailable {
        /// The withdrawn file
        file_id: Uuid,
    },
    /// A download stored another chunk
    DownloadProgress {
        /// The file being downloaded
        file_id: Uuid,
        /// Chunks received so far
        received: u64,
        /// Chunks expected in total
        total: u64,
    },
    /// A download completed and verified
    DownloadCompleted {
        /// The downloaded file
        file_id: Uuid,
        /// Advertised file name
        name: String,
        /// The verified content
        content: Arc<[u8]>,
    },
    /// A download was discarded
    DownloadFailed {
        /// The file whose download ended
        file_id: Uuid,
        /// Why it ended
        reason: TransferError,
    },
}
