//! SHA-256 hashing.
//!
//! Every content address, transaction digest, and chain link in the protocol
//! is a SHA-256 hash rendered as a 64-character lowercase hex string.

use crate::{CryptoError, DIGEST_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// SHA-256 digest (32 bytes).
///
/// Serializes as its 64-char lowercase hex form, which is the identifier
/// form used on the wire and in chain links.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Wrap raw digest bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Hex form: 64 lowercase hex characters
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the 64-char hex form
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] if the input is not valid hex and
    /// [`CryptoError::InvalidLength`] if it does not decode to 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        let bytes: [u8; DIGEST_SIZE] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidLength {
                    expected: DIGEST_SIZE,
                    actual: v.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl TryFrom<String> for Digest {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

/// Compute the SHA-256 digest of input data.
#[must_use]
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// Incremental SHA-256 hasher for data arriving in pieces.
pub struct Hasher {
    inner: Sha256,
    total_len: usize,
}

impl Hasher {
    /// Create a new hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
            total_len: 0,
        }
    }

    /// Update with more data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.total_len += data.len();
    }

    /// Get total bytes hashed so far.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Finalize and return the digest.
    #[must_use]
    pub fn finalize(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_input() {
        let digest = sha256(b"");
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = sha256(b"roundtrip");
        let recovered = Digest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, recovered);
    }

    #[test]
    fn test_hex_form_is_64_chars() {
        assert_eq!(sha256(b"x").to_hex().len(), 64);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Digest::from_hex("zz").is_err());
        assert!(Digest::from_hex("abcd").is_err());
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), sha256(b"hello world"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let digest = sha256(b"serde");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, back);
    }
}
