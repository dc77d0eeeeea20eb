//! # WEFT Ledger
//!
//! Permissioned replicated ledger for the WEFT node.
//!
//! This crate provides:
//! - **Chain**: the append-only, hash-linked block sequence with full
//!   structural validation
//! - **Mempool**: pending transactions in first-receipt order
//! - **Schedule**: the deterministic leader rotation over the whitelist
//! - **Engine**: the propose/vote/commit state machine and catch-up sync
//!
//! Everything here is a pure state machine; timers, broadcast, and peer
//! I/O are wired up by the node layer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod chain;
pub mod engine;
pub mod error;
pub mod mempool;
pub mod schedule;

pub use chain::{Blockchain, build_block, compute_block_hash, genesis_block, sign_block};
pub use engine::{ConsensusEngine, ConsensusState, ProposalVerdict};
pub use error::LedgerError;
pub use mempool::{Mempool, validate_transaction};
pub use schedule::{Whitelist, leader_at};

/// Leader rotation slot length in milliseconds
pub const ROTATION_INTERVAL_MS: i64 = 30_000;

/// Leader block-production interval in milliseconds
pub const PRODUCTION_INTERVAL_MS: u64 = 10_000;

/// Voting window for one proposal in milliseconds
pub const VOTE_WINDOW_MS: u64 = 5_000;

/// Most transactions taken into one block
pub const MAX_BLOCK_TRANSACTIONS: usize = 10;

/// Default minimum approvals regardless of whitelist size
pub const DEFAULT_MIN_VOTES: usize = 1;
