//! Word-oriented RC4 derivative used to encrypt archive contents.
//!
//! The cipher keeps an RC4 style permutation in the low byte of 256 table
//! words; the upper 24 bits of each word carry extra key-dependent state that
//! is remixed after every output. One round produces four keystream bytes,
//! which makes it several times faster than plain RC4.
//!
//! The keystream is a plain byte stream: a round's word is consumed in
//! little-endian byte order, and a partially consumed word is finished by the
//! next call before a new round starts. Applying a buffer in one call, byte by
//! byte, or in arbitrary chunks produces identical output.
//!
//! ```rust
//! use lvpa_crypto::{Hprc4Cipher, KeystreamCipher};
//!
//! let key = b"archive key";
//! let mut data = b"some payload".to_vec();
//!
//! let mut cipher = Hprc4Cipher::new(key).expect("Cipher creation should succeed in test");
//! cipher.warm_up(128);
//! cipher.apply(&mut data);
//!
//! let mut cipher = Hprc4Cipher::new(key).expect("Cipher creation should succeed in test");
//! cipher.warm_up(128);
//! cipher.apply(&mut data);
//! assert_eq!(b"some payload", &data[..]);
//! ```

use crate::cipher::KeystreamCipher;
use crate::error::CryptoError;
use crate::mt::Mt19937;

/// Fast RC4-like keystream cipher with a PRNG-expanded key schedule.
#[derive(Clone)]
pub struct Hprc4Cipher {
    table: [u32; 256],
    x: u8,
    y: u8,
    /// Keystream bytes still unused from the current round's word.
    remaining: u8,
}

impl Hprc4Cipher {
    /// Create a cipher from key material.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EmptyKey` if the key is empty.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        // the key zero-padded to whole little-endian words seeds the PRNG
        let words: Vec<u32> = key
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect();
        let mut mt = Mt19937::from_key(&words);

        // low byte is the permutation index, like in RC4
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u32 | (mt.next_u32() << 8);
        }

        let mut b = 0u32;
        for i in 0..key.len().max(256) {
            let slot = i & 0xFF;
            b = b
                .wrapping_add(u32::from(key[i % key.len()]))
                .wrapping_add(table[slot]);
            table.swap(slot, (b & 0xFF) as usize);
        }

        Ok(Self {
            table,
            x: 0,
            y: 0,
            remaining: 0,
        })
    }

    #[inline]
    fn low(&self, index: u8) -> u8 {
        self.table[index as usize] as u8
    }

    /// Advance one round and return the index of the output word.
    #[inline]
    fn step(&mut self) -> u8 {
        self.x = self.x.wrapping_add(1);
        self.y = self.y.wrapping_add(self.low(self.x));
        self.table.swap(self.x as usize, self.y as usize);
        self.low(self.x).wrapping_add(self.low(self.y))
    }

    /// Index of the output word of the round in progress.
    #[inline]
    fn current(&self) -> u8 {
        self.low(self.x).wrapping_add(self.low(self.y))
    }

    /// Remix the upper 24 bits of a consumed output word.
    #[inline]
    fn mix(&mut self, t: u8) {
        let t = t as usize;
        let mixed = self.table[t] ^ self.table[self.y as usize] ^ self.table[self.x as usize];
        self.table[t] = (self.table[t] & 0xFF) | (mixed & 0xFFFF_FF00);
    }

    /// Consume bytes of the round in progress; `data` must not exceed what is left.
    fn finish_word(&mut self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }
        let t = self.current();
        let keystream = self.table[t as usize].to_le_bytes();
        for byte in data {
            *byte ^= keystream[4 - self.remaining as usize];
            self.remaining -= 1;
        }
        if self.remaining == 0 {
            self.mix(t);
        }
    }
}

impl KeystreamCipher for Hprc4Cipher {
    fn apply(&mut self, data: &mut [u8]) {
        let mut start = 0;
        if self.remaining > 0 {
            start = (self.remaining as usize).min(data.len());
            self.finish_word(&mut data[..start]);
        }

        let mut words = data[start..].chunks_exact_mut(4);
        for word in &mut words {
            let t = self.step();
            let keystream = self.table[t as usize].to_le_bytes();
            for (byte, k) in word.iter_mut().zip(keystream) {
                *byte ^= k;
            }
            self.mix(t);
        }

        let tail = words.into_remainder();
        if !tail.is_empty() {
            self.step();
            self.remaining = 4;
            self.finish_word(tail);
        }
    }
}

impl std::fmt::Debug for Hprc4Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hprc4Cipher")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const K0: [u8; 4] = [0xef, 0x01, 0x23, 0x45];
    const R0: [u8; 12] = [
        0xd6, 0xd4, 0x61, 0x81, 0xa1, 0x36, 0x7b, 0x29, 0x41, 0x25, 0x3b, 0x1d,
    ];

    #[test]
    fn test_hprc4_known_vector() {
        let mut data = [0u8; 12];
        let mut cipher = Hprc4Cipher::new(&K0).expect("Cipher creation should succeed in test");
        cipher.apply(&mut data);
        assert_eq!(R0, data);
    }

    #[test]
    fn test_hprc4_bytewise_matches_vector() {
        let mut data = [0u8; 12];
        let mut cipher = Hprc4Cipher::new(&K0).expect("Cipher creation should succeed in test");
        for chunk in data.chunks_mut(1) {
            cipher.apply(chunk);
        }
        assert_eq!(R0, data);
    }

    #[test]
    fn test_hprc4_partial_word_stays_in_bounds() {
        let key = [0x45, 0x7a, 0x09, 0xf5];
        let mut mem = [0u8; 8];
        let mut cipher = Hprc4Cipher::new(&key).unwrap();
        for _ in 0..256 {
            cipher.apply(&mut mem[..7]);
            assert_eq!(0, mem[7]);
        }
    }

    #[test]
    fn test_hprc4_warm_up_round_trip() {
        for warm in [32u32, 1, 10, 43, 128, 171, 600] {
            let mut data = [0u8; 12];
            let mut cipher = Hprc4Cipher::new(&K0).unwrap();
            cipher.warm_up(warm);
            cipher.apply(&mut data);
            assert_ne!([0u8; 12], data);

            let mut cipher = Hprc4Cipher::new(&K0).unwrap();
            cipher.warm_up(warm);
            cipher.apply(&mut data);
            assert_eq!([0u8; 12], data, "warm-up {warm}");
        }
    }

    #[test]
    fn test_hprc4_warm_up_equals_skipped_keystream() {
        let mut reference = [0u8; 64];
        Hprc4Cipher::new(&K0).unwrap().apply(&mut reference);

        for skip in [1usize, 3, 4, 13, 40] {
            let mut data = vec![0u8; 64 - skip];
            let mut cipher = Hprc4Cipher::new(&K0).unwrap();
            cipher.warm_up(skip as u32);
            cipher.apply(&mut data);
            assert_eq!(&reference[skip..], &data[..], "skip {skip}");
        }
    }

    #[test]
    fn test_hprc4_massive_round_trip() {
        let key = [
            0x33, 0x60, 0x12, 0x58, 0x01, 0x04, 0x59, 0x21, 0x69, 0x00, 0xe2, 0xff, 0xa6, 0x2e,
            0xba, 0x7c, 0xe4, 0x40, 0x55, 0xa6, 0x19, 0xd9, 0xdd, 0x7f, 0xc3, 0x16, 0x6f, 0x94,
            0x87, 0xf7, 0xcb, 0x27, 0x29, 0x12, 0x42, 0x64,
        ];
        let mut mem: Vec<u8> = (0..80_000u32).map(|i| i as u8).collect();
        for _ in 0..2 {
            let mut cipher = Hprc4Cipher::new(&key).unwrap();
            for _ in 0..40 {
                cipher.apply(&mut mem);
            }
        }
        assert!(mem.iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[test]
    fn test_hprc4_key_longer_than_table() {
        let key: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        let mut data = [0u8; 16];
        Hprc4Cipher::new(&key).unwrap().apply(&mut data);
        Hprc4Cipher::new(&key).unwrap().apply(&mut data);
        assert_eq!([0u8; 16], data);
    }

    proptest! {
        #[test]
        fn chunked_apply_matches_single_call(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(0usize..16, 0..40),
        ) {
            let mut whole = data.clone();
            Hprc4Cipher::new(b"chunk key").unwrap().apply(&mut whole);

            let mut pieces = data;
            let mut cipher = Hprc4Cipher::new(b"chunk key").unwrap();
            let mut pos = 0;
            for cut in cuts {
                let end = (pos + cut).min(pieces.len());
                cipher.apply(&mut pieces[pos..end]);
                pos = end;
            }
            cipher.apply(&mut pieces[pos..]);

            prop_assert_eq!(whole, pieces);
        }
    }
}
