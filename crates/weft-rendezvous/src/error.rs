//! Rendezvous error types.

use thiserror::Error;
use weft_proto::ProtoError;

/// Rendezvous client and server errors
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// The service could not be reached at startup; fatal to node start
    #[error("rendezvous unavailable: {0}")]
    Unavailable(String),

    /// Channel I/O failed
    #[error("rendezvous channel error: {0}")]
    Channel(String),

    /// Wire encoding or decoding failed
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl From<std::io::Error> for RendezvousError {
    fn from(err: std::io::Error) -> Self {
        RendezvousError::Channel(err.to_string())
    }
}
