//! Protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame could not be serialized to JSON
    #[error("encode error: {0}")]
    Encode(String),

    /// Frame could not be parsed as a known message
    #[error("decode error: {0}")]
    Decode(String),

    /// Identifier is not a well-formed node id
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),
}
