//! Archive error types

use thiserror::Error;

use crate::entry::Algorithm;

/// Errors produced while loading, saving or editing an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file does not start with the `LVPA` tag
    #[error("invalid archive magic: expected [4C 56 50 41], got {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// The master record declares a different format version
    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    /// The master record has zero entries or zero header sizes
    #[error("archive contains no valid data")]
    NoValidData,

    /// Header checksum mismatch
    #[error("archive header is damaged: {stage} crc expected {expected:08X}, got {actual:08X}")]
    HeaderDamaged {
        /// Which form of the header failed: "packed" or "unpacked"
        stage: &'static str,
        /// Checksum stored in the master record
        expected: u32,
        /// Checksum of the bytes read
        actual: u32,
    },

    /// Encrypted content without a master key
    #[error("headers are encrypted, but no master key is set")]
    MissingMasterKey,

    /// An entry header claims an impossible flag combination
    #[error("invalid entry flags 0x{0:02X}")]
    InvalidEntryFlags(u8),

    /// A solid member references a block that does not exist
    #[error("entry {entry} references missing solid block {block}")]
    InvalidBlockReference {
        /// Member entry id
        entry: u32,
        /// Referenced block id
        block: u32,
    },

    /// No entry with that name or id
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A solid block name is taken by a regular entry, or a regular entry
    /// would replace a solid block
    #[error("name is already used by an entry of another kind: {0}")]
    NameConflict(String),

    /// An encrypted solid block that cannot be decrypted had members added,
    /// overwritten or removed from the middle, so it cannot be copied as is
    #[error("solid block '{0}' cannot be decrypted and its members have changed")]
    LockedSolidBlock(String),

    /// Nothing to write
    #[error("archive has no entries to write")]
    NoEntries,

    /// Every entry was damaged or unreadable
    #[error("archive has entries, but none of them is usable")]
    NoValidEntries,

    /// No path to save to
    #[error("archive has no file name to save to")]
    NoPath,

    /// Algorithm id outside the known range
    #[error("unknown compression algorithm: 0x{0:02X}")]
    UnknownAlgorithm(u8),

    /// Known algorithm without a backend in this build
    #[error("compression algorithm {0} is not supported by this build")]
    UnsupportedAlgorithm(Algorithm),

    /// Codec failure
    #[error("compression error: {0}")]
    Compression(String),

    /// Decompressed byte count differs from the declared size
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Declared uncompressed size
        expected: usize,
        /// Size actually produced
        actual: usize,
    },

    /// A size does not fit the 32-bit on-disk fields
    #[error("{what} of {size} bytes exceeds the 4 GiB format limit")]
    TooLarge {
        /// What overflowed
        what: &'static str,
        /// Offending size
        size: u64,
    },

    /// Cipher setup failure
    #[error("cipher error: {0}")]
    Crypto(#[from] lvpa_crypto::CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl ArchiveError {
    /// Errors caused by a file that is not a readable archive of this version
    pub const fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::NoValidData
                | Self::InvalidEntryFlags(_)
                | Self::InvalidBlockReference { .. }
                | Self::UnknownAlgorithm(_)
                | Self::BinRw(_)
        )
    }

    /// Checksum and codec mismatches
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::HeaderDamaged { .. } | Self::SizeMismatch { .. } | Self::Compression(_)
        )
    }

    /// Operating system level failures
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Failures that may succeed after the caller changes configuration,
    /// such as supplying a master key
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingMasterKey | Self::NoPath | Self::LockedSolidBlock(_)
        )
    }
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ArchiveError::InvalidMagic(*b"ABCD").is_format_error());
        assert!(ArchiveError::UnsupportedVersion(3).is_format_error());
        assert!(!ArchiveError::UnsupportedVersion(3).is_corruption());

        let damaged = ArchiveError::HeaderDamaged {
            stage: "unpacked",
            expected: 1,
            actual: 2,
        };
        assert!(damaged.is_corruption());
        assert!(!damaged.is_format_error());

        assert!(ArchiveError::MissingMasterKey.is_configuration_error());
        assert!(ArchiveError::from(std::io::Error::other("disk full")).is_io_error());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            "invalid archive magic: expected [4C 56 50 41], got [41, 42, 43, 44]",
            ArchiveError::InvalidMagic(*b"ABCD").to_string()
        );
        assert_eq!(
            "compression algorithm LZO is not supported by this build",
            ArchiveError::UnsupportedAlgorithm(Algorithm::Lzo).to_string()
        );
    }
}
