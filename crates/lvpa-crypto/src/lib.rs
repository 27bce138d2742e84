//! Cryptographic primitives for LVPA archives
//!
//! This crate provides the building blocks the archive engine uses to protect
//! and verify entry contents.
//!
//! # Components
//!
//! - **Keystream ciphers**: [`Hprc4Cipher`] for archive contents, [`Rc4Cipher`]
//!   as the reference it is derived from, both behind [`KeystreamCipher`]
//! - **Integrity**: CRC-32 over packed and unpacked bytes
//! - **Hashing**: SHA-256 for key derivation and scrambled file names
//! - **PRNG**: [`Mt19937`] for key expansion and randomized warm-up lengths
//!
//! # Examples
//!
//! ## Encrypting a buffer
//!
//! ```
//! use lvpa_crypto::{Hprc4Cipher, KeystreamCipher, hash256};
//!
//! let key = hash256(b"my secret");
//! let mut cipher = Hprc4Cipher::new(key.as_bytes()).expect("Cipher creation should succeed in test");
//! cipher.warm_up(256);
//!
//! let mut data = b"payload".to_vec();
//! cipher.apply(&mut data);
//! ```
//!
//! ## Checksums
//!
//! ```
//! use lvpa_crypto::crc32;
//!
//! assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
//! ```

#![warn(missing_docs)]

pub mod checksum;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod hprc4;
pub mod mt;
pub mod rc4;

pub use error::CryptoError;

// Re-export commonly used types
pub use checksum::{Crc32, crc32};
pub use cipher::KeystreamCipher;
pub use hash::{DIGEST_SIZE, Digest256, Hasher256, hash256};
pub use hprc4::Hprc4Cipher;
pub use mt::Mt19937;
pub use rc4::Rc4Cipher;
