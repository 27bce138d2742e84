//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A keystream cipher was initialized without key material
    #[error("Cipher key must not be empty")]
    EmptyKey,

    /// Invalid digest size
    #[error("Invalid digest size: expected {expected}, got {actual}")]
    InvalidDigestSize {
        /// Expected digest size in bytes
        expected: usize,
        /// Actual size in bytes
        actual: usize,
    },

    /// Invalid hex string for a digest
    #[error("Invalid digest format: {0}")]
    InvalidDigestFormat(String),
}
