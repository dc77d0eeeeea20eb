//! Error types for the connection fabric.

use thiserror::Error;
use weft_proto::ProtoError;

/// Connection fabric errors
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying transport I/O failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame would corrupt the line-oriented framing
    #[error("frame contains a line break")]
    InvalidFrame,

    /// The first frame on a new transport was not a valid `hello`
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer's claimed node id does not hash-match its public key
    #[error("identity binding mismatch for claimed id {0}")]
    IdentityMismatch(String),

    /// Timed out waiting for the peer
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// Wire encoding or decoding failed
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Transport(err.to_string())
    }
}
