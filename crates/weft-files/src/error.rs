//! Transfer error types.

use thiserror::Error;
use uuid::Uuid;

/// File catalog and transfer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The download cap is reached
    #[error("too many concurrent transfers")]
    TooManyTransfers,

    /// No offer or shared entry exists for the file id
    #[error("unknown file {0}")]
    UnknownFile(Uuid),

    /// A download for this file is already running
    #[error("already downloading {0}")]
    AlreadyDownloading(Uuid),

    /// No download for this file is running
    #[error("no active download for {0}")]
    NotDownloading(Uuid),

    /// The reassembled content does not hash to the advertised digest
    #[error("integrity failure: expected {expected}, got {actual}")]
    IntegrityFailure {
        /// Digest from the original offer
        expected: String,
        /// Digest of the reassembled bytes
        actual: String,
    },

    /// The advertising peer disconnected mid-transfer
    #[error("download source disconnected")]
    SourceLost,

    /// The serving peer refused the request
    #[error("transfer refused by peer: {0}")]
    Refused(String),

    /// A chunk payload was not valid base64
    #[error("malformed chunk payload: {0}")]
    BadChunk(String),
}
