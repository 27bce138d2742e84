//! MT19937 Mersenne Twister pseudo-random generator.
//!
//! Used for two things: expanding key material into the
//! [`Hprc4Cipher`](crate::hprc4::Hprc4Cipher) table, and picking random
//! per-file cipher warm-up lengths. It is not a cryptographic generator.
//!
//! Seeding follows the reference `init_genrand` / `init_by_array` routines so
//! a given key always expands to the same table on every platform. The twist
//! step differs from textbook MT19937: an odd word folds in all ones instead
//! of the `0x9908b0df` matrix constant. Existing archives depend on this
//! stream, so the first outputs match the reference generator only until the
//! first odd word is twisted.

const N: usize = 624;
const M: usize = 397;
/// Mask folded into a twisted word whose successor is odd
const TWIST_MASK: u32 = 0xffff_ffff;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// Seed used before mixing in an array key.
const ARRAY_SEED: u32 = 19_650_218;

/// 32-bit Mersenne Twister.
#[derive(Clone)]
pub struct Mt19937 {
    state: [u32; N],
    index: usize,
}

impl Mt19937 {
    /// Create a generator from a single 32-bit seed.
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; N];
        state[0] = seed;
        for i in 1..N {
            let prev = state[i - 1];
            state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Self { state, index: N }
    }

    /// Create a generator from an array key.
    ///
    /// An empty key behaves like the single seed `19650218`.
    pub fn from_key(key: &[u32]) -> Self {
        let mut mt = Self::new(ARRAY_SEED);
        if key.is_empty() {
            return mt;
        }

        let s = &mut mt.state;
        let mut i = 1usize;
        let mut j = 0usize;
        for _ in 0..N.max(key.len()) {
            let prev = s[i - 1];
            s[i] = (s[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_664_525))
                .wrapping_add(key[j])
                .wrapping_add(j as u32);
            i += 1;
            j += 1;
            if i >= N {
                s[0] = s[N - 1];
                i = 1;
            }
            if j >= key.len() {
                j = 0;
            }
        }
        for _ in 0..N - 1 {
            let prev = s[i - 1];
            s[i] = (s[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_566_083_941))
                .wrapping_sub(i as u32);
            i += 1;
            if i >= N {
                s[0] = s[N - 1];
                i = 1;
            }
        }
        s[0] = 0x8000_0000;
        mt
    }

    /// Regenerate the whole state block.
    fn twist(&mut self) {
        for k in 0..N {
            let y = (self.state[k] & UPPER_MASK) | (self.state[(k + 1) % N] & LOWER_MASK);
            let mag = if y & 1 == 0 { 0 } else { TWIST_MASK };
            self.state[k] = self.state[(k + M) % N] ^ (y >> 1) ^ mag;
        }
        self.index = 0;
    }

    /// Next tempered 32-bit output.
    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^ (y >> 18)
    }

    /// Uniform value in `0..=n`.
    ///
    /// Draws are masked to the smallest covering power of two and rejected
    /// until one falls in range, so there is no modulo bias.
    pub fn next_u32_bounded(&mut self, n: u32) -> u32 {
        let mut used = n;
        used |= used >> 1;
        used |= used >> 2;
        used |= used >> 4;
        used |= used >> 8;
        used |= used >> 16;

        loop {
            let value = self.next_u32() & used;
            if value <= n {
                return value;
            }
        }
    }
}

impl std::fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt19937")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
