//! CRC-32 checksums for corruption detection.
//!
//! Standard reflected CRC-32 (polynomial `0xEDB88320`, initial value and final
//! XOR `0xFFFFFFFF`), the same checksum zip and PNG use. The lookup table is an
//! immutable static built at compile time.

use crc::{CRC_32_ISO_HDLC, Crc};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC-32 over several slices.
pub struct Crc32 {
    digest: crc::Digest<'static, u32>,
}

impl Crc32 {
    /// Start an empty checksum.
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Finish and return the checksum.
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(0xCBF4_3926, crc32(b"123456789"));
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(0, crc32(b""));
    }

    #[test]
    fn test_crc32_incremental_matches_oneshot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = Crc32::new();
        crc.update(&data[..10]);
        crc.update(&data[10..]);
        assert_eq!(crc32(data), crc.finalize());
        assert_eq!(0x414F_A339, crc32(data));
    }
}
