//! # WEFT Crypto
//!
//! Cryptographic primitives for the WEFT node.
//!
//! This crate provides:
//! - Ed25519 identity keypairs (signing, verification)
//! - SHA-256 hashing with the hex digest form used for content addressing
//!   and chain links
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Signatures | Ed25519 |
//! | Hash | SHA-256 |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod hash;
pub mod keys;

pub use error::CryptoError;
pub use hash::{Digest, sha256};
pub use keys::{Signature, SigningKey, VerifyingKey};

/// Ed25519 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 secret key seed size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// SHA-256 digest size in bytes
pub const DIGEST_SIZE: usize = 32;
