//! # WEFT Proto
//!
//! Wire protocol for the WEFT node.
//!
//! This crate provides:
//! - **Data model**: node identifiers, transactions, blocks
//! - **Canonical serialization**: the byte-stable signable/hashable forms
//!   every node must agree on
//! - **Peer messages**: the JSON text frames exchanged over peer sessions
//! - **Rendezvous messages**: the JSON text frames exchanged with the
//!   rendezvous service
//!
//! Every frame is a JSON object with a required `type` field; the transport
//! is expected to preserve message boundaries and ordering.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod canonical;
pub mod error;
pub mod id;
pub mod model;
pub mod peer;
pub mod rendezvous;

pub use error::ProtoError;
pub use id::NodeId;
pub use model::{Block, Transaction, now_ms};
pub use peer::PeerMessage;
pub use rendezvous::{RendezvousMessage, SessionSignal};

/// Length of a node identifier in characters
pub const NODE_ID_LEN: usize = 16;

/// The `previous_hash` value of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// The `author` value of the genesis block
pub const GENESIS_AUTHOR: &str = "genesis";
