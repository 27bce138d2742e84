//! SHA-256 digests used for key derivation and scrambled name lookup.
//!
//! The archive never stores raw secrets. The master key is hashed into a salt,
//! scrambled file names are stored only as salted digests, and per-file keys are
//! derived by chaining digests, which is why a streaming [`Hasher256`] exists
//! next to the one-shot [`hash256`].

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CryptoError;

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest256(pub [u8; DIGEST_SIZE]);

impl Digest256 {
    /// Digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        hash256(data)
    }

    /// Parse a digest from 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidDigestFormat(format!("Invalid hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Build a digest from exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; DIGEST_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidDigestSize {
                    expected: DIGEST_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }
}

impl fmt::Display for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Digest256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One-shot SHA-256.
pub fn hash256(data: &[u8]) -> Digest256 {
    Digest256(Sha256::digest(data).into())
}

/// Streaming SHA-256.
#[derive(Clone, Default)]
pub struct Hasher256 {
    inner: Sha256,
}

impl Hasher256 {
    /// Start a new digest.
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Feed more bytes.
    #[must_use]
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.inner.update(data);
        self
    }

    /// Feed more bytes in place.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish the digest.
    pub fn finalize(self) -> Digest256 {
        Digest256(self.inner.finalize().into())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_known_value() {
        assert_eq!(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            hash256(b"abc").to_hex()
        );
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut hasher = Hasher256::new();
        hasher.update(b"master");
        hasher.update(b"key");
        assert_eq!(hash256(b"masterkey"), hasher.finalize());
        assert_eq!(
            hash256(b"masterkey"),
            Hasher256::new().chain(b"mas").chain(b"terkey").finalize()
        );
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let digest = hash256(b"hello");
        let parsed = Digest256::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(digest.to_string(), digest.to_hex());
    }

    #[test]
    fn test_digest_rejects_wrong_size() {
        assert!(matches!(
            Digest256::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidDigestSize { expected: 32, actual: 16 })
        ));
        assert!(Digest256::from_hex("zz").is_err());
    }
}
