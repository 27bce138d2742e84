//! RC4 reference keystream cipher.
//!
//! This is the classic byte-oriented RC4 algorithm. The archive format uses
//! the faster [`Hprc4Cipher`](crate::hprc4::Hprc4Cipher); RC4 is kept as the
//! reference the fast variant is derived from and for comparison in tests
//! and benchmarks.
//!
//! ## Security Warning
//!
//! RC4 has known cryptographic weaknesses. It offers obfuscation, not
//! confidentiality against a determined attacker.
//!
//! ## Usage
//!
//! ```rust
//! use lvpa_crypto::{KeystreamCipher, Rc4Cipher};
//!
//! let key = b"test_key";
//! let mut cipher = Rc4Cipher::new(key).expect("RC4 cipher creation should succeed in test");
//!
//! let mut data = b"Hello, World!".to_vec();
//! cipher.apply(&mut data);
//!
//! // A fresh cipher with the same key restores the plaintext
//! let mut cipher = Rc4Cipher::new(key).expect("RC4 cipher creation should succeed in test");
//! cipher.apply(&mut data);
//! assert_eq!(b"Hello, World!", &data[..]);
//! ```

use crate::cipher::KeystreamCipher;
use crate::error::CryptoError;

/// RC4 stream cipher state.
#[derive(Clone)]
pub struct Rc4Cipher {
    /// S-box permutation
    s: [u8; 256],
    /// Current indices
    i: u8,
    j: u8,
}

impl Rc4Cipher {
    /// Create a new RC4 cipher with the given key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key material; any non-empty length is accepted and keys
    ///   longer than 256 bytes only contribute their first 256 bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EmptyKey` if the key is empty.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        let mut s = [0u8; 256];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = i as u8;
        }

        // Key-scheduling algorithm (KSA)
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(key[i % key.len()]).wrapping_add(s[i]);
            s.swap(i, j as usize);
        }

        Ok(Self { s, i: 0, j: 0 })
    }

    /// Generate the next keystream byte (PRGA).
    fn next_keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);

        self.s.swap(self.i as usize, self.j as usize);

        let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[k as usize]
    }
}

impl KeystreamCipher for Rc4Cipher {
    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_keystream_byte();
        }
    }
}

impl std::fmt::Debug for Rc4Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the permutation
        f.debug_struct("Rc4Cipher").finish_non_exhaustive()
    }
}
