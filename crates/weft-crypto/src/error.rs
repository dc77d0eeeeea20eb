//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Byte slice is not a valid Ed25519 public key point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature is malformed or does not authenticate the message
    #[error("invalid signature")]
    InvalidSignature,

    /// Input has the wrong length for the expected key or signature form
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Input is not valid hexadecimal
    #[error("invalid hex encoding")]
    InvalidHex,
}
