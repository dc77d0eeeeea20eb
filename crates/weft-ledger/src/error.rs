//! Ledger error types.

use thiserror::Error;
use weft_proto::NodeId;

/// Ledger and consensus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Transaction failed validation
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Block failed validation
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// No public key known for a signer
    #[error("no public key known for {0}")]
    UnknownKey(NodeId),

    /// Operation requires leadership this node does not hold
    #[error("not the current leader")]
    NotLeader,

    /// Proposal arrived while another is pending
    #[error("consensus round already in progress")]
    RoundInProgress,
}
