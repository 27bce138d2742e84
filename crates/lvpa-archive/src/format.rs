//! On-disk structures: the master record and the entry header table.
//!
//! Layout of an archive file:
//!
//! ```text
//! "LVPA" | master record (37 bytes) | header table | entry data ...
//! ```
//!
//! All integers are little-endian. The header table holds one serialized
//! [`EntryHeader`] per entry and may be compressed and encrypted as a whole.
//! When headers are encrypted, the master record is encrypted too, except for
//! its leading `version` and `flags` fields.

use binrw::io::{Cursor, Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

use lvpa_crypto::{DIGEST_SIZE, Digest256};

use crate::entry::{Algorithm, EntryFlags, EntryHeader, Level};
use crate::error::{ArchiveError, ArchiveResult};

/// Archive magic bytes
pub const LVPA_MAGIC: [u8; 4] = *b"LVPA";

/// The only format version this crate reads and writes
pub const LVPA_VERSION: u32 = 0;

/// Serialized size of [`MasterRecord`]
pub const MASTER_RECORD_SIZE: usize = 37;

/// Offset inside the master record where encryption starts
pub const MASTER_CRYPT_OFFSET: usize = 8;

/// Fixed warm-up for the header cipher. Not secret; it only has to be known
/// before any per-file key exists.
pub const HEADER_CIPHER_WARMUP: u32 = 1337;

/// Zero padding after each solid member and after unpacked buffers
pub const EXTRA_BUFSIZE: usize = 4;

/// Master record flags
pub mod master_flags {
    /// Header table is compressed
    pub const PACKED: u32 = 0x1;
    /// Header table and master record tail are encrypted
    pub const ENCRYPTED: u32 = 0x2;
}

/// Fixed-size record following the magic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct MasterRecord {
    /// Format version
    pub version: u32,
    /// [`master_flags`]
    pub flags: u32,
    /// Number of serialized entry headers
    pub header_entries: u32,
    /// Stored size of the header table
    pub packed_header_size: u32,
    /// Unpacked size of the header table
    pub real_header_size: u32,
    /// Absolute offset of the header table
    pub header_offset: u32,
    /// CRC-32 of the stored header table when packed
    pub header_crc_packed: u32,
    /// CRC-32 of the unpacked header table
    pub header_crc_real: u32,
    /// Compression algorithm of the header table
    pub algorithm: u8,
    /// Absolute offset of the first entry's data
    pub data_offset: u32,
}

impl MasterRecord {
    /// Check a master flag
    pub const fn has(&self, flag: u32) -> bool {
        (self.flags & flag) != 0
    }

    /// Serialize to the fixed-size byte form
    pub fn to_bytes(&self) -> ArchiveResult<[u8; MASTER_RECORD_SIZE]> {
        let mut cursor = Cursor::new([0u8; MASTER_RECORD_SIZE]);
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Parse from the fixed-size byte form
    pub fn from_bytes(bytes: &[u8; MASTER_RECORD_SIZE]) -> ArchiveResult<Self> {
        Ok(Self::read(&mut Cursor::new(&bytes[..]))?)
    }

    /// Read only the plaintext `version` and `flags` prefix
    pub fn peek_prefix(bytes: &[u8; MASTER_RECORD_SIZE]) -> (u32, u32) {
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        (word(0), word(4))
    }
}

fn custom_error(pos: u64, err: ArchiveError) -> binrw::Error {
    binrw::Error::Custom {
        pos,
        err: Box::new(err),
    }
}

impl BinRead for EntryHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let flags = EntryFlags::new(u8::read_options(reader, endian, ())?);
        flags.validate().map_err(|e| custom_error(pos, e))?;

        let real_size = u32::read_options(reader, endian, ())?;
        let crc_real = u32::read_options(reader, endian, ())?;

        let mut header = Self {
            flags,
            real_size,
            crc_real,
            packed_size: real_size,
            ..Self::default()
        };

        if flags.has(EntryFlags::SCRAMBLED) {
            let mut hash = [0u8; DIGEST_SIZE];
            reader.read_exact(&mut hash)?;
            header.name_hash = Digest256(hash);
        } else {
            let len = u32::read_options(reader, endian, ())?;
            // Grow with the bytes actually present; the length is untrusted
            let mut raw = Vec::new();
            reader.by_ref().take(u64::from(len)).read_to_end(&mut raw)?;
            if raw.len() != len as usize {
                return Err(binrw::Error::AssertFail {
                    pos,
                    message: format!(
                        "entry name of {len} bytes runs past the header table ({} left)",
                        raw.len()
                    ),
                });
            }
            header.name = String::from_utf8(raw).map_err(|e| binrw::Error::AssertFail {
                pos,
                message: format!("entry name is not UTF-8: {e}"),
            })?;
        }

        if flags.has(EntryFlags::PACKED) {
            header.packed_size = u32::read_options(reader, endian, ())?;
            header.crc_packed = u32::read_options(reader, endian, ())?;
            let algo = u8::read_options(reader, endian, ())?;
            header.algorithm = Algorithm::from_byte(algo).map_err(|e| custom_error(pos, e))?;
            header.level = Level(u8::read_options(reader, endian, ())?);
        } else {
            header.level = Level::NONE;
        }

        if flags.has(EntryFlags::SOLID) {
            header.block_id = u32::read_options(reader, endian, ())?;
        }

        if flags.is_crypted() {
            header.cipher_warmup = u16::read_options(reader, endian, ())?;
        }

        Ok(header)
    }
}

impl BinWrite for EntryHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let flags = self.flags;
        flags.value().write_options(writer, endian, ())?;
        self.real_size.write_options(writer, endian, ())?;
        self.crc_real.write_options(writer, endian, ())?;

        if flags.has(EntryFlags::SCRAMBLED) {
            writer.write_all(self.name_hash.as_bytes())?;
        } else {
            let len = u32::try_from(self.name.len()).map_err(|_| {
                custom_error(
                    0,
                    ArchiveError::TooLarge {
                        what: "entry name",
                        size: self.name.len() as u64,
                    },
                )
            })?;
            len.write_options(writer, endian, ())?;
            writer.write_all(self.name.as_bytes())?;
        }

        if flags.has(EntryFlags::PACKED) {
            self.packed_size.write_options(writer, endian, ())?;
            self.crc_packed.write_options(writer, endian, ())?;
            self.algorithm.as_byte().write_options(writer, endian, ())?;
            self.level.0.write_options(writer, endian, ())?;
        }

        if flags.has(EntryFlags::SOLID) {
            self.block_id.write_options(writer, endian, ())?;
        }

        if flags.is_crypted() {
            self.cipher_warmup.write_options(writer, endian, ())?;
        }

        Ok(())
    }
}

/// Serialize a header table
pub fn write_header_table<'a, I>(headers: I) -> ArchiveResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a EntryHeader>,
{
    let mut cursor = Cursor::new(Vec::new());
    for header in headers {
        header.write_le(&mut cursor)?;
    }
    Ok(cursor.into_inner())
}

/// Parse `count` headers from an unpacked header table
pub fn read_header_table(table: &[u8], count: u32) -> ArchiveResult<Vec<EntryHeader>> {
    let mut cursor = Cursor::new(table);
    let mut headers = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        headers.push(EntryHeader::read_le(&mut cursor)?);
    }
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_master() -> MasterRecord {
        MasterRecord {
            version: LVPA_VERSION,
            flags: master_flags::PACKED,
            header_entries: 3,
            packed_header_size: 40,
            real_header_size: 90,
            header_offset: 41,
            header_crc_packed: 0xDEAD_BEEF,
            header_crc_real: 0x0102_0304,
            algorithm: Algorithm::Lzma.as_byte(),
            data_offset: 81,
        }
    }

    #[test]
    fn test_master_record_layout() {
        let bytes = sample_master().to_bytes().unwrap();
        assert_eq!(MASTER_RECORD_SIZE, bytes.len());
        assert_eq!(&[0, 0, 0, 0], &bytes[0..4]);
        assert_eq!(&[1, 0, 0, 0], &bytes[4..8]);
        assert_eq!(&[3, 0, 0, 0], &bytes[8..12]);
        assert_eq!(1, bytes[32]);
        assert_eq!(&[81, 0, 0, 0], &bytes[33..37]);
        assert_eq!(sample_master(), MasterRecord::from_bytes(&bytes).unwrap());
        assert_eq!((0, 1), MasterRecord::peek_prefix(&bytes));
    }

    #[test]
    fn test_plain_header_layout() {
        let header = EntryHeader {
            flags: EntryFlags::default(),
            real_size: 5,
            packed_size: 5,
            crc_real: 7,
            name: "ab".to_string(),
            ..EntryHeader::default()
        };
        let table = write_header_table([&header]).unwrap();
        assert_eq!(
            vec![0, 5, 0, 0, 0, 7, 0, 0, 0, 2, 0, 0, 0, b'a', b'b'],
            table
        );
        let parsed = read_header_table(&table, 1).unwrap();
        assert_eq!(header.name, parsed[0].name);
        assert_eq!(5, parsed[0].packed_size);
        assert_eq!(Algorithm::None, parsed[0].algorithm);
    }

    #[test]
    fn test_full_header_fields() {
        let header = EntryHeader {
            flags: EntryFlags::new(
                EntryFlags::PACKED | EntryFlags::SCRAMBLED | EntryFlags::ENCRYPTED,
            ),
            real_size: 1000,
            packed_size: 100,
            crc_real: 1,
            crc_packed: 2,
            name: String::new(),
            name_hash: Digest256([9u8; 32]),
            algorithm: Algorithm::Deflate,
            level: Level::ULTRA,
            block_id: 0,
            cipher_warmup: 400,
        };
        let table = write_header_table([&header]).unwrap();
        // flags, sizes, hash, packed block, warm-up
        assert_eq!(1 + 4 + 4 + 32 + 10 + 2, table.len());
        let parsed = read_header_table(&table, 1).unwrap().remove(0);
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_solid_member_header() {
        let header = EntryHeader {
            flags: EntryFlags::new(EntryFlags::SOLID),
            real_size: 3,
            packed_size: 3,
            name: "x".to_string(),
            block_id: 4,
            ..EntryHeader::default()
        };
        let table = write_header_table([&header]).unwrap();
        let parsed = read_header_table(&table, 1).unwrap().remove(0);
        assert_eq!(4, parsed.block_id);
        assert_eq!(0, parsed.cipher_warmup);
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        let table = [EntryFlags::SOLID | EntryFlags::SOLID_BLOCK, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(read_header_table(&table, 1).is_err());
    }

    #[test]
    fn test_truncated_table_rejected() {
        let header = EntryHeader {
            name: "long name".to_string(),
            ..EntryHeader::default()
        };
        let table = write_header_table([&header]).unwrap();
        assert!(read_header_table(&table[..table.len() - 1], 1).is_err());
        assert!(read_header_table(&table, 2).is_err());
    }

    #[test]
    fn test_oversized_name_length_rejected() {
        let mut table = vec![0u8; 9];
        table.extend_from_slice(&u32::MAX.to_le_bytes());
        table.extend_from_slice(b"abc");
        let err = read_header_table(&table, 1).unwrap_err();
        assert!(err.is_format_error());
        assert!(err.to_string().contains("runs past the header table"));
    }
}
