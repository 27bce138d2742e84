//! Symmetric keystream cipher abstraction.
//!
//! Every cipher used by the archive XORs a keystream into a buffer in place.
//! Applying the same keystream twice restores the input, so one call serves
//! both directions. Application is resumable: splitting one logical buffer
//! into any number of chunks yields the same output as a single call.

/// Size of the scratch buffer used to discard keystream bytes.
const WARM_UP_CHUNK: usize = 128;

/// A keyed stream cipher that can be applied incrementally.
pub trait KeystreamCipher {
    /// XOR the next `data.len()` keystream bytes into `data`.
    fn apply(&mut self, data: &mut [u8]);

    /// Discard `n` keystream bytes.
    ///
    /// Leaves the cipher in exactly the state it would have after applying
    /// `n` real bytes, so encoder and decoder stay in step as long as both
    /// use the same warm-up length.
    fn warm_up(&mut self, n: u32) {
        let mut scratch = [0u8; WARM_UP_CHUNK];
        let mut remaining = n as usize;
        while remaining > 0 {
            let step = remaining.min(WARM_UP_CHUNK);
            self.apply(&mut scratch[..step]);
            remaining -= step;
        }
    }

    /// Apply the keystream to a copy of `data` and return it.
    fn apply_to_vec(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Keystream of consecutive counter values, enough to observe positions.
    struct Counter(u8);

    impl KeystreamCipher for Counter {
        fn apply(&mut self, data: &mut [u8]) {
            for byte in data {
                *byte ^= self.0;
                self.0 = self.0.wrapping_add(1);
            }
        }
    }

    #[test]
    fn test_warm_up_discards_exact_count() {
        for n in [0u32, 1, 10, 127, 128, 129, 300] {
            let mut cipher = Counter(0);
            cipher.warm_up(n);
            assert_eq!(cipher.0, n as u8, "warm-up of {n} bytes");
        }
    }

    #[test]
    fn test_apply_to_vec_leaves_input() {
        let input = [0u8; 4];
        let mut cipher = Counter(1);
        let out = cipher.apply_to_vec(&input);
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert_eq!(input, [0u8; 4]);
    }
}
