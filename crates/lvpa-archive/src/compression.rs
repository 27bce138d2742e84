//! Compression backends and the stateful compression buffer.
//!
//! The archive engine only needs two operations from a codec: compress a
//! buffer at a level, and decompress to a declared size. [`CompressBuffer`]
//! wraps a codec with the bookkeeping every entry needs: whether the bytes
//! are currently compressed and what their uncompressed size is.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use tracing::debug;

use crate::entry::{Algorithm, Level};
use crate::error::{ArchiveError, ArchiveResult};

/// Maximum accepted declared size for a single decompression (4 GiB - 1,
/// the largest value the on-disk size fields can express).
pub const MAX_DECOMPRESSION_SIZE: usize = u32::MAX as usize;

/// A compression codec.
pub trait Compressor {
    /// Algorithm id written to entry headers
    fn algorithm(&self) -> Algorithm;

    /// Whether this build can actually run the codec
    fn is_available(&self) -> bool {
        true
    }

    /// Compress `data` at `level`
    fn encode(&self, data: &[u8], level: Level) -> ArchiveResult<Vec<u8>>;

    /// Decompress `data`, which must expand to exactly `real_size` bytes
    fn decode(&self, data: &[u8], real_size: usize) -> ArchiveResult<Vec<u8>>;

    /// Compress, returning `None` when the result is not worth keeping
    fn compress(&self, data: &[u8], level: Level) -> ArchiveResult<Option<Vec<u8>>> {
        if level.is_none() || data.is_empty() || !self.is_available() {
            return Ok(None);
        }
        let packed = self.encode(data, level)?;
        if packed.len() < data.len() {
            Ok(Some(packed))
        } else {
            Ok(None)
        }
    }
}

/// Pass-through codec; always available, never shrinks anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCompressor;

impl Compressor for StoreCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::None
    }

    fn encode(&self, data: &[u8], _level: Level) -> ArchiveResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8], real_size: usize) -> ArchiveResult<Vec<u8>> {
        check_size(data.to_vec(), real_size)
    }
}

/// Placeholder for algorithm ids this build has no backend for.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableCompressor(pub Algorithm);

impl Compressor for UnavailableCompressor {
    fn algorithm(&self) -> Algorithm {
        self.0
    }

    fn is_available(&self) -> bool {
        false
    }

    fn encode(&self, _data: &[u8], _level: Level) -> ArchiveResult<Vec<u8>> {
        Err(ArchiveError::UnsupportedAlgorithm(self.0))
    }

    fn decode(&self, _data: &[u8], _real_size: usize) -> ArchiveResult<Vec<u8>> {
        Err(ArchiveError::UnsupportedAlgorithm(self.0))
    }
}

/// Raw DEFLATE codec, the archive's `Deflate` algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Deflate
    }

    fn encode(&self, data: &[u8], level: Level) -> ArchiveResult<Vec<u8>> {
        let mut encoder =
            DeflateEncoder::new(Vec::new(), Compression::new(u32::from(level.clamped())));
        encoder
            .write_all(data)
            .and_then(|()| encoder.finish())
            .map_err(|e| ArchiveError::Compression(format!("deflate compression failed: {e}")))
    }

    fn decode(&self, data: &[u8], real_size: usize) -> ArchiveResult<Vec<u8>> {
        let out = read_bounded(DeflateDecoder::new(data), real_size, data.len(), "deflate")?;
        check_size(out, real_size)
    }
}

/// LZMA codec producing `.lzma` ("alone") streams.
///
/// The backend has a single preset, so the level only decides whether
/// compression happens at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaCompressor;

impl Compressor for LzmaCompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lzma
    }

    fn encode(&self, data: &[u8], _level: Level) -> ArchiveResult<Vec<u8>> {
        let mut input = data;
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        lzma_rs::lzma_compress(&mut input, &mut out)
            .map_err(|e| ArchiveError::Compression(format!("LZMA compression failed: {e}")))?;
        Ok(out)
    }

    fn decode(&self, data: &[u8], real_size: usize) -> ArchiveResult<Vec<u8>> {
        let mut input = data;
        // one extra byte reveals streams that expand past the declared size
        let limit = real_size.saturating_add(1);
        let options = lzma_rs::decompress::Options {
            memlimit: Some(limit),
            ..Default::default()
        };
        let mut out = BoundedWriter {
            out: Vec::with_capacity(initial_capacity(real_size, data.len())),
            limit,
        };
        lzma_rs::lzma_decompress_with_options(&mut input, &mut out, &options)
            .map_err(|e| ArchiveError::Compression(format!("LZMA decompression failed: {e}")))?;
        check_size(out.out, real_size)
    }
}

/// Largest expansion assumed when reserving decompression output up front
const MAX_EXPANSION: usize = 1032;

/// Capacity to reserve for `real_size` bytes unpacked from `packed_len`
/// bytes; a damaged size field must not trigger a huge allocation.
fn initial_capacity(real_size: usize, packed_len: usize) -> usize {
    real_size.min(packed_len.saturating_mul(MAX_EXPANSION))
}

/// Collects at most `limit` bytes and fails the write that would exceed it
struct BoundedWriter {
    out: Vec<u8>,
    limit: usize,
}

impl Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let room = self.limit - self.out.len();
        if room == 0 && !buf.is_empty() {
            return Err(std::io::Error::other(format!(
                "output exceeds {} bytes",
                self.limit
            )));
        }
        let n = buf.len().min(room);
        self.out.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn read_bounded(
    reader: impl Read,
    real_size: usize,
    packed_len: usize,
    codec: &str,
) -> ArchiveResult<Vec<u8>> {
    // one extra byte reveals streams that expand past the declared size
    let limit = real_size.saturating_add(1) as u64;
    let mut out = Vec::with_capacity(initial_capacity(real_size, packed_len));
    reader
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| ArchiveError::Compression(format!("{codec} decompression failed: {e}")))?;
    Ok(out)
}

fn check_size(out: Vec<u8>, real_size: usize) -> ArchiveResult<Vec<u8>> {
    if out.len() == real_size {
        Ok(out)
    } else {
        Err(ArchiveError::SizeMismatch {
            expected: real_size,
            actual: out.len(),
        })
    }
}

/// Whether this build has a backend for `algo`.
pub const fn is_supported(algo: Algorithm) -> bool {
    matches!(algo, Algorithm::None | Algorithm::Lzma | Algorithm::Deflate)
}

/// Pick the codec for an algorithm id.
///
/// `Inherit` resolves to the first supported real compressor in id order.
pub fn compressor_for(algo: Algorithm) -> Box<dyn Compressor> {
    match algo {
        Algorithm::None => Box::new(StoreCompressor),
        Algorithm::Lzma | Algorithm::Inherit => Box::new(LzmaCompressor),
        Algorithm::Deflate => Box::new(DeflateCompressor),
        Algorithm::Lzo | Algorithm::Lzf | Algorithm::Lzham => {
            Box::new(UnavailableCompressor(algo))
        }
    }
}

/// A byte buffer that knows whether it holds compressed data.
pub struct CompressBuffer {
    data: Vec<u8>,
    compressed: bool,
    real_size: usize,
    codec: Box<dyn Compressor>,
}

impl CompressBuffer {
    /// Uncompressed buffer holding `data`
    pub fn with_data(codec: Box<dyn Compressor>, data: Vec<u8>) -> Self {
        Self {
            data,
            compressed: false,
            real_size: 0,
            codec,
        }
    }

    /// Buffer holding bytes that unpack to `real_size` bytes
    pub fn from_compressed(codec: Box<dyn Compressor>, data: Vec<u8>, real_size: usize) -> Self {
        Self {
            data,
            compressed: true,
            real_size,
            codec,
        }
    }

    /// Current contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Whether the contents are compressed
    pub const fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Take the contents
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Compress in place.
    ///
    /// Does nothing for level 0, empty or already compressed buffers, and
    /// keeps the original bytes when the codec cannot make them smaller.
    /// Returns whether the buffer is now compressed.
    pub fn compress(&mut self, level: Level) -> ArchiveResult<bool> {
        if self.compressed {
            return Ok(true);
        }
        if !self.codec.is_available() && !level.is_none() {
            debug!(
                "{} is not available, storing {} bytes uncompressed",
                self.codec.algorithm(),
                self.data.len()
            );
        }
        if let Some(packed) = self.codec.compress(&self.data, level)? {
            self.real_size = self.data.len();
            self.data = packed;
            self.compressed = true;
        }
        Ok(self.compressed)
    }

    /// Decompress in place.
    ///
    /// On failure the buffer is left exactly as it was.
    pub fn decompress(&mut self) -> ArchiveResult<()> {
        if !self.compressed || self.real_size == 0 {
            return Ok(());
        }
        if self.real_size > MAX_DECOMPRESSION_SIZE {
            return Err(ArchiveError::TooLarge {
                what: "declared size",
                size: self.real_size as u64,
            });
        }
        let out = self.codec.decode(&self.data, self.real_size)?;
        self.data = out;
        self.compressed = false;
        Ok(())
    }
}

impl std::fmt::Debug for CompressBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressBuffer")
            .field("algorithm", &self.codec.algorithm())
            .field("len", &self.data.len())
            .field("compressed", &self.compressed)
            .field("real_size", &self.real_size)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repetitive(len: usize) -> Vec<u8> {
        b"LVPA archive test data "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn round_trip(codec: Box<dyn Compressor>, data: &[u8], level: Level) {
        let mut buf = CompressBuffer::with_data(codec, data.to_vec());
        assert!(buf.compress(level).expect("Test operation should succeed"));
        assert!(buf.as_slice().len() < data.len());
        assert_eq!(data.len(), buf.real_size);
        buf.decompress().expect("Test operation should succeed");
        assert!(!buf.is_compressed());
        assert_eq!(data, buf.as_slice());
    }

    #[test]
    fn test_lzma_round_trip() {
        round_trip(Box::new(LzmaCompressor), &repetitive(10_000), Level::NORMAL);
    }

    #[test]
    fn test_deflate_round_trip() {
        for level in [Level::FASTEST, Level::NORMAL, Level::ULTRA] {
            round_trip(Box::new(DeflateCompressor), &repetitive(5000), level);
        }
    }

    #[test]
    fn test_incompressible_data_is_kept() {
        let data = noise(256);
        let mut buf = CompressBuffer::with_data(Box::new(DeflateCompressor), data.clone());
        assert!(!buf.compress(Level::ULTRA).unwrap());
        assert_eq!(data, buf.as_slice());
        assert!(!buf.is_compressed());
    }

    #[test]
    fn test_compress_noops() {
        let mut empty = CompressBuffer::with_data(Box::new(LzmaCompressor), Vec::new());
        assert!(!empty.compress(Level::NORMAL).unwrap());

        let mut level_zero = CompressBuffer::with_data(Box::new(LzmaCompressor), repetitive(1000));
        assert!(!level_zero.compress(Level::NONE).unwrap());
        assert_eq!(1000, level_zero.as_slice().len());

        let mut twice = CompressBuffer::with_data(Box::new(LzmaCompressor), repetitive(1000));
        assert!(twice.compress(Level::NORMAL).unwrap());
        let len = twice.as_slice().len();
        assert!(twice.compress(Level::NORMAL).unwrap());
        assert_eq!(len, twice.as_slice().len());
    }

    #[test]
    fn test_size_mismatch_leaves_state() {
        let data = repetitive(2000);
        let packed = DeflateCompressor.encode(&data, Level::NORMAL).unwrap();
        let mut buf =
            CompressBuffer::from_compressed(Box::new(DeflateCompressor), packed.clone(), 1999);
        let err = buf.decompress().unwrap_err();
        assert!(matches!(err, ArchiveError::SizeMismatch { expected: 1999, .. }));
        assert!(buf.is_compressed());
        assert_eq!(packed, buf.as_slice());

        let packed = LzmaCompressor.encode(&data, Level::NORMAL).unwrap();
        let mut buf = CompressBuffer::from_compressed(Box::new(LzmaCompressor), packed, 2001);
        assert!(buf.decompress().is_err());
        assert!(buf.is_compressed());
    }

    #[test]
    fn test_lzma_output_is_capped_at_declared_size() {
        let packed = LzmaCompressor
            .encode(&vec![0u8; 1 << 20], Level::NORMAL)
            .unwrap();
        assert!(packed.len() < 1 << 20);

        let err = LzmaCompressor.decode(&packed, 10).unwrap_err();
        assert!(err.is_corruption());

        let mut buf = CompressBuffer::from_compressed(Box::new(LzmaCompressor), packed, 10);
        assert!(buf.decompress().unwrap_err().is_corruption());
        assert!(buf.is_compressed());
    }

    #[test]
    fn test_huge_declared_size_fails_without_reserving_it() {
        assert_eq!(10, initial_capacity(10, 4));
        assert_eq!(4 * MAX_EXPANSION, initial_capacity(u32::MAX as usize, 4));

        let packed = DeflateCompressor.encode(&repetitive(500), Level::NORMAL).unwrap();
        let mut buf =
            CompressBuffer::from_compressed(Box::new(DeflateCompressor), packed, u32::MAX as usize);
        assert!(matches!(
            buf.decompress(),
            Err(ArchiveError::SizeMismatch { actual: 500, .. })
        ));

        let packed = LzmaCompressor.encode(&repetitive(500), Level::NORMAL).unwrap();
        let mut buf =
            CompressBuffer::from_compressed(Box::new(LzmaCompressor), packed, u32::MAX as usize);
        assert!(buf.decompress().unwrap_err().is_corruption());
    }

    #[test]
    fn test_bounded_writer_stops_at_limit() {
        let mut out = BoundedWriter {
            out: Vec::new(),
            limit: 5,
        };
        assert_eq!(3, out.write(b"abc").unwrap());
        assert_eq!(2, out.write(b"defg").unwrap());
        assert!(out.write(b"h").is_err());
        assert!(out.write_all(b"").is_ok());
        assert_eq!(b"abcde", out.out.as_slice());
    }

    #[test]
    fn test_garbage_input_fails() {
        let mut buf = CompressBuffer::from_compressed(Box::new(DeflateCompressor), noise(100), 500);
        assert!(buf.decompress().is_err());
        assert_eq!(noise(100), buf.as_slice());
    }

    #[test]
    fn test_unavailable_algorithms() {
        for algo in [Algorithm::Lzo, Algorithm::Lzf, Algorithm::Lzham] {
            assert!(!is_supported(algo));
            let mut buf = CompressBuffer::with_data(compressor_for(algo), repetitive(1000));
            assert!(!buf.compress(Level::ULTRA).unwrap());
            assert_eq!(1000, buf.as_slice().len());

            let mut packed = CompressBuffer::from_compressed(compressor_for(algo), vec![1, 2, 3], 10);
            assert!(matches!(
                packed.decompress(),
                Err(ArchiveError::UnsupportedAlgorithm(a)) if a == algo
            ));
        }
    }

    #[test]
    fn test_inherit_picks_first_supported() {
        assert_eq!(Algorithm::Lzma, compressor_for(Algorithm::Inherit).algorithm());
        assert!(is_supported(Algorithm::None));
        assert!(is_supported(Algorithm::Deflate));
    }
}
