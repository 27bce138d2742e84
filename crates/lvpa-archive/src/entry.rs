//! Entry records and the settings enums stored with them.

use std::fmt;

use lvpa_crypto::Digest256;

use crate::error::{ArchiveError, ArchiveResult};

/// Stable handle of an entry: its position in the archive's entry table.
pub type EntryId = u32;

/// Per-entry flag byte as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntryFlags(pub u8);

impl EntryFlags {
    /// Stored bytes are compressed
    pub const PACKED: u8 = 0x01;
    /// Entry lives inside a solid block
    pub const SOLID: u8 = 0x02;
    /// Entry is a solid block container
    pub const SOLID_BLOCK: u8 = 0x04;
    /// Stored bytes are encrypted with a master-key derived key
    pub const ENCRYPTED: u8 = 0x08;
    /// Name is stored only as a salted hash; contents keyed by the name
    pub const SCRAMBLED: u8 = 0x10;

    const KNOWN: u8 =
        Self::PACKED | Self::SOLID | Self::SOLID_BLOCK | Self::ENCRYPTED | Self::SCRAMBLED;

    /// Create flags from the raw byte
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Raw byte
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Check if any of the given flags is set
    pub const fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Set flags
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear flags
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Set or clear depending on `on`
    pub fn toggle(&mut self, flag: u8, on: bool) {
        if on {
            self.set(flag);
        } else {
            self.clear(flag);
        }
    }

    /// Whether the contents go through the cipher
    pub const fn is_crypted(&self) -> bool {
        self.has(Self::ENCRYPTED | Self::SCRAMBLED)
    }

    /// Reject combinations no writer produces.
    pub fn validate(&self) -> ArchiveResult<()> {
        let both = Self::SOLID | Self::SOLID_BLOCK;
        if (self.0 & both) == both
            || (self.0 & !Self::KNOWN) != 0
            || (self.has(Self::SOLID) && self.has(Self::SCRAMBLED))
        {
            return Err(ArchiveError::InvalidEntryFlags(self.0));
        }
        Ok(())
    }
}

impl fmt::Display for EntryFlags {
    /// One letter per flag, `-` when unset: packed, solid, block, encrypted, scrambled.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = [
            (Self::PACKED, 'P'),
            (Self::SOLID, 'S'),
            (Self::SOLID_BLOCK, 'B'),
            (Self::ENCRYPTED, 'E'),
            (Self::SCRAMBLED, 'X'),
        ];
        for (flag, letter) in letters {
            write!(f, "{}", if self.has(flag) { letter } else { '-' })?;
        }
        Ok(())
    }
}

/// Compression algorithm ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Algorithm {
    /// Stored
    #[default]
    None = 0,
    /// LZMA
    Lzma = 1,
    /// LZO1X
    Lzo = 2,
    /// Raw DEFLATE
    Deflate = 3,
    /// LZF
    Lzf = 4,
    /// LZHAM
    Lzham = 5,
    /// Use the enclosing setting (solid block or save call)
    Inherit = 0xFF,
}

impl Algorithm {
    /// All concrete algorithms in id order.
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::Lzma,
        Self::Lzo,
        Self::Deflate,
        Self::Lzf,
        Self::Lzham,
    ];

    /// Parse from byte value
    pub fn from_byte(byte: u8) -> ArchiveResult<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Lzma),
            2 => Ok(Self::Lzo),
            3 => Ok(Self::Deflate),
            4 => Ok(Self::Lzf),
            5 => Ok(Self::Lzham),
            0xFF => Ok(Self::Inherit),
            other => Err(ArchiveError::UnknownAlgorithm(other)),
        }
    }

    /// Byte value
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short display name
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lzma => "LZMA",
            Self::Lzo => "LZO",
            Self::Deflate => "deflate",
            Self::Lzf => "LZF",
            Self::Lzham => "LZHAM",
            Self::Inherit => "inherit",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Compression level. Values between the named presets are valid too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Level(pub u8);

impl Level {
    /// No compression
    pub const NONE: Self = Self(0);
    /// Fastest
    pub const FASTEST: Self = Self(1);
    /// Fast
    pub const FAST: Self = Self(2);
    /// Normal, the default
    pub const NORMAL: Self = Self(3);
    /// Good
    pub const GOOD: Self = Self(5);
    /// Better
    pub const BETTER: Self = Self(7);
    /// Ultra
    pub const ULTRA: Self = Self(9);
    /// Use the enclosing setting
    pub const INHERIT: Self = Self(0xFF);

    /// Whether this is the inherit sentinel
    pub const fn is_inherit(self) -> bool {
        self.0 == Self::INHERIT.0
    }

    /// Whether this disables compression
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Clamp to a real level `0..=9`
    pub const fn clamped(self) -> u8 {
        if self.0 > 9 { 9 } else { self.0 }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inherit() {
            f.pad("inherit")
        } else {
            f.pad(&self.0.to_string())
        }
    }
}

/// Per-entry encryption setting; resolved at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Encryption {
    /// Never encrypt
    None = 0,
    /// Always encrypt
    Enabled = 1,
    /// Follow the save call
    #[default]
    Inherit = 0xFF,
}

/// Location of a solid member's bytes inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSlice {
    /// Owning solid block
    pub block: EntryId,
    /// Byte offset inside the block's unpacked data
    pub offset: usize,
    /// Member length
    pub len: usize,
}

impl BlockSlice {
    /// Byte range inside the block
    pub const fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Resident contents of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DataSlot {
    /// Not loaded
    #[default]
    Empty,
    /// Bytes owned by the archive. May carry trailing padding beyond the
    /// entry's logical size.
    Owned(Vec<u8>),
    /// A view into the resident data of a solid block
    Borrowed(BlockSlice),
}

impl DataSlot {
    /// Whether anything is resident
    pub const fn is_resident(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// Persisted per-entry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryHeader {
    /// Stored flags
    pub flags: EntryFlags,
    /// Logical size
    pub real_size: u32,
    /// Stored size
    pub packed_size: u32,
    /// CRC-32 of the logical bytes
    pub crc_real: u32,
    /// CRC-32 of the stored bytes when packed, else 0
    pub crc_packed: u32,
    /// File name; empty while a scrambled entry has not been looked up
    pub name: String,
    /// Salted name hash of scrambled entries
    pub name_hash: Digest256,
    /// Compression algorithm
    pub algorithm: Algorithm,
    /// Compression level
    pub level: Level,
    /// Owning block of a solid member
    pub block_id: EntryId,
    /// Keystream bytes to discard before the contents; 0 until first save
    pub cipher_warmup: u16,
}

/// Requested storage settings of an entry; `Inherit` values are resolved
/// when saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySettings {
    /// Compression algorithm
    pub algorithm: Algorithm,
    /// Compression level
    pub level: Level,
    /// Encryption request
    pub encryption: Encryption,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Inherit,
            level: Level::INHERIT,
            encryption: Encryption::Inherit,
        }
    }
}

/// One logical file or solid block container.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Metadata as last read from or written to disk
    pub header: EntryHeader,
    /// Settings used by the next save
    pub settings: EntrySettings,
    /// Absolute file offset, or offset inside the block for solid members
    pub offset: u64,
    pub(crate) data: DataSlot,
    /// Where a dropped solid member's bytes were, for cheap re-resolution
    pub(crate) spare: Option<BlockSlice>,
    pub(crate) good: bool,
    /// Contents exist in the backing file at `offset`
    pub(crate) stored: bool,
    /// Taken out by `remove` or `delete`; never written again
    pub(crate) removed: bool,
}

impl Entry {
    pub(crate) fn new(name: String, flags: EntryFlags) -> Self {
        Self {
            header: EntryHeader {
                name,
                flags,
                ..EntryHeader::default()
            },
            good: true,
            ..Self::default()
        }
    }

    /// Entry name as known so far
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Stored flags
    pub const fn flags(&self) -> EntryFlags {
        self.header.flags
    }

    /// Whether the entry can still be read
    pub const fn is_good(&self) -> bool {
        self.good
    }

    /// Whether data is currently resident
    pub const fn is_resident(&self) -> bool {
        self.data.is_resident()
    }

    /// Whether this is a member of a solid block
    pub const fn is_solid_member(&self) -> bool {
        self.header.flags.has(EntryFlags::SOLID)
    }

    /// Whether this is a solid block container
    pub const fn is_solid_block(&self) -> bool {
        self.header.flags.has(EntryFlags::SOLID_BLOCK)
    }

    /// Owning block of a solid member
    pub const fn block_id(&self) -> Option<EntryId> {
        if self.is_solid_member() {
            Some(self.header.block_id)
        } else {
            None
        }
    }

    /// Logical size
    pub const fn real_size(&self) -> u32 {
        self.header.real_size
    }

    /// Stored size
    pub const fn packed_size(&self) -> u32 {
        self.header.packed_size
    }

    /// Stored-to-logical size ratio in percent, 100 for empty entries
    pub fn ratio(&self) -> f64 {
        if self.header.real_size == 0 {
            100.0
        } else {
            f64::from(self.header.packed_size) * 100.0 / f64::from(self.header.real_size)
        }
    }
}
