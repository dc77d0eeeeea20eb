//! Node API error types.

use thiserror::Error;
use weft_files::TransferError;
use weft_ledger::LedgerError;
use weft_net::NetError;
use weft_rendezvous::RendezvousError;

/// Errors surfaced synchronously to API callers
#[derive(Debug, Error)]
pub enum NodeError {
    /// Rendezvous failure; fatal when it happens at startup
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    /// File catalog or transfer failure
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Ledger or consensus failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Connection fabric failure
    #[error(transparent)]
    Net(#[from] NetError),

    /// The node's actor task has stopped
    #[error("node is not running")]
    NotRunning,

    /// Listener socket failure at startup
    #[error("listener error: {0}")]
    Listener(String),
}
