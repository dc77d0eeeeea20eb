//! Ed25519 identity keys.
//!
//! Every node holds one Ed25519 keypair for its lifetime. The signing key
//! authenticates transactions and blocks; the verifying key is published to
//! peers during session setup and anchors the node identifier.

use crate::{CryptoError, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: SIGNATURE_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Parse the hex wire form
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] for non-hex input and
    /// [`CryptoError::InvalidLength`] if it does not decode to 64 bytes.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Hex wire form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn to_dalek(self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.0)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..16])
    }
}

/// Ed25519 signing key (private key)
///
/// Contains the secret key material for signing transactions and blocks.
/// Zeroized on drop to prevent key material from lingering in memory.
#[derive(ZeroizeOnDrop)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Generate a new random signing key
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Create from a raw 32-byte seed
    #[must_use]
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Sign a message
    ///
    /// Signing is deterministic: the same message always produces the same
    /// signature under the same key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    /// Get the corresponding verifying key (public key)
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Export the raw seed bytes (use with extreme caution)
    ///
    /// # Security
    ///
    /// This exposes the raw secret key bytes. Handle with care and zeroize
    /// any copies after use.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.inner.to_bytes()
    }
}

/// Ed25519 verifying key (public key)
///
/// Verifies signatures created by the corresponding signing key. Safe to
/// share publicly; published to peers in the session `hello` frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Create from raw 32-byte public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes do not
    /// represent a valid Ed25519 point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Parse the hex wire form
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] for non-hex input,
    /// [`CryptoError::InvalidLength`] for the wrong length, and
    /// [`CryptoError::InvalidPublicKey`] for an invalid point.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidLength {
                    expected: PUBLIC_KEY_SIZE,
                    actual: v.len(),
                })?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw public key bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Hex wire form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature over a message
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not
    /// authenticate the message under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({}..)", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let message = b"authenticate this message";
        let signature = signing_key.sign(message);

        assert!(verifying_key.verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let signature = signing_key.sign(b"original message");
        assert!(verifying_key.verify(b"tampered message", &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let other_key = SigningKey::generate(&mut OsRng).verifying_key();

        let signature = signing_key.sign(b"test");
        assert!(other_key.verify(b"test", &signature).is_err());
    }

    #[test]
    fn test_signature_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let sig1 = signing_key.sign(b"deterministic");
        let sig2 = signing_key.sign(b"deterministic");
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let signature = SigningKey::generate(&mut OsRng).sign(b"test");
        let recovered = Signature::from_hex(&signature.to_hex()).unwrap();
        assert_eq!(signature, recovered);
    }

    #[test]
    fn test_verifying_key_hex_roundtrip() {
        let verifying_key = SigningKey::generate(&mut OsRng).verifying_key();
        let recovered = VerifyingKey::from_hex(&verifying_key.to_hex()).unwrap();
        assert_eq!(verifying_key, recovered);
    }

    #[test]
    fn test_signing_key_from_seed_roundtrip() {
        let original = SigningKey::generate(&mut OsRng);
        let recovered = SigningKey::from_bytes(&original.to_bytes());
        assert_eq!(original.sign(b"seed"), recovered.sign(b"seed"));
    }

    #[test]
    fn test_signature_from_slice_wrong_size() {
        assert!(Signature::from_slice(&[0u8; 32]).is_err());
        assert!(Signature::from_slice(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_invalid_signature_bytes() {
        let verifying_key = SigningKey::generate(&mut OsRng).verifying_key();
        let invalid = Signature::from_bytes([0u8; 64]);
        assert!(verifying_key.verify(b"test", &invalid).is_err());
    }
}
