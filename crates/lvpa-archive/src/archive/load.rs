//! Opening archives: master record, header table, offsets.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use lvpa_crypto::{KeystreamCipher, crc32};
use tracing::{debug, info, warn};

use super::Archive;
use crate::compression::{CompressBuffer, compressor_for};
use crate::config::LoadMode;
use crate::entry::{
    Algorithm, Encryption, Entry, EntryFlags, EntryHeader, EntryId, EntrySettings, Level,
};
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{
    EXTRA_BUFSIZE, LVPA_MAGIC, LVPA_VERSION, MASTER_CRYPT_OFFSET, MASTER_RECORD_SIZE,
    MasterRecord, master_flags, read_header_table,
};

impl Archive {
    /// Open an archive file.
    ///
    /// # Errors
    ///
    /// See [`Archive::load_from`].
    pub fn open(path: impl AsRef<Path>, key: Option<&[u8]>, mode: LoadMode) -> ArchiveResult<Self> {
        let mut archive = Self::new();
        if let Some(key) = key {
            archive.set_master_key(key);
        }
        archive.load_from(path, mode)?;
        Ok(archive)
    }

    /// Replace the contents of this archive with the archive at `path`.
    ///
    /// Only the headers are read unless `mode` asks for more. Entries that
    /// fail eager loading are reported in the log and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not an archive of the
    /// supported version, has damaged headers, or has encrypted headers and no
    /// master key is set.
    pub fn load_from(&mut self, path: impl AsRef<Path>, mode: LoadMode) -> ArchiveResult<()> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let (master, table) = self.read_headers(&mut file)?;
        let headers = read_header_table(&table, master.header_entries)?;

        self.clear();
        let data_offset = u64::from(master.data_offset);
        let entries = build_entries(headers, data_offset)?;
        self.entries = entries;
        self.index.rebuild(&self.entries);
        self.compute_totals();
        self.file = Some(file);
        self.path = Some(path.to_path_buf());

        info!(
            "loaded {} with {} entries, {} bytes ({} stored)",
            path.display(),
            self.entries.len(),
            self.real_size,
            self.packed_size
        );

        match mode {
            LoadMode::Lazy => {}
            LoadMode::Solid => self.load_eagerly(|e| e.is_solid_member()),
            LoadMode::All => {
                self.load_eagerly(|e| !e.name().is_empty());
                self.file = None;
            }
        }
        Ok(())
    }

    fn read_headers(&self, file: &mut File) -> ArchiveResult<(MasterRecord, Vec<u8>)> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != LVPA_MAGIC {
            return Err(ArchiveError::InvalidMagic(magic));
        }

        let mut raw = [0u8; MASTER_RECORD_SIZE];
        reader.read_exact(&mut raw)?;
        let (version, flags) = MasterRecord::peek_prefix(&raw);
        if version != LVPA_VERSION {
            return Err(ArchiveError::UnsupportedVersion(version));
        }

        let mut cipher = None;
        if flags & master_flags::ENCRYPTED != 0 {
            let mut header_cipher = self.keys.header_cipher()?;
            header_cipher.apply(&mut raw[MASTER_CRYPT_OFFSET..]);
            cipher = Some(header_cipher);
        }
        let master = MasterRecord::from_bytes(&raw)?;
        debug!(
            "master record: version {}, flags {:#x}, {} headers, {}/{} bytes at {}, data at {}, algorithm {}",
            master.version,
            master.flags,
            master.header_entries,
            master.packed_header_size,
            master.real_header_size,
            master.header_offset,
            master.data_offset,
            master.algorithm
        );

        if master.header_entries == 0
            || master.packed_header_size == 0
            || master.real_header_size == 0
        {
            return Err(ArchiveError::NoValidData);
        }
        let table_end = u64::from(master.header_offset) + u64::from(master.packed_header_size);
        if table_end > file_len {
            warn!(
                "header table ends at {} beyond the end of the file ({} bytes)",
                table_end, file_len
            );
            return Err(ArchiveError::NoValidData);
        }

        reader.seek(SeekFrom::Start(u64::from(master.header_offset)))?;
        let mut table = vec![0u8; master.packed_header_size as usize];
        reader.read_exact(&mut table)?;
        if let Some(cipher) = cipher.as_mut() {
            cipher.apply(&mut table);
        }

        if master.has(master_flags::PACKED) {
            let actual = crc32(&table);
            if actual != master.header_crc_packed {
                return Err(ArchiveError::HeaderDamaged {
                    stage: "packed",
                    expected: master.header_crc_packed,
                    actual,
                });
            }
            let algorithm = Algorithm::from_byte(master.algorithm)?;
            let mut buf = CompressBuffer::from_compressed(
                compressor_for(algorithm),
                table,
                master.real_header_size as usize,
            );
            buf.decompress()?;
            table = buf.into_inner();
        }

        let actual = crc32(&table);
        if actual != master.header_crc_real {
            return Err(ArchiveError::HeaderDamaged {
                stage: "unpacked",
                expected: master.header_crc_real,
                actual,
            });
        }
        Ok((master, table))
    }

    pub(crate) fn compute_totals(&mut self) {
        let (real, packed) = self
            .entries
            .iter()
            .filter(|e| !e.removed)
            .fold((0u64, 0u64), |(real, packed), e| {
                let real = if e.is_solid_block() {
                    real
                } else {
                    real + u64::from(e.real_size())
                };
                let packed = if e.is_solid_member() {
                    packed
                } else {
                    packed + u64::from(e.packed_size())
                };
                (real, packed)
            });
        self.real_size = real;
        self.packed_size = packed;
    }

    fn load_eagerly(&mut self, wanted: impl Fn(&Entry) -> bool) {
        let ids: Vec<EntryId> = self
            .entries()
            .filter(|(_, e)| !e.is_solid_block() && wanted(*e))
            .map(|(id, _)| id)
            .collect();
        let mut failed = 0usize;
        for id in ids {
            if !self.resolve(id, true) {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("{} entries could not be loaded", failed);
        }
    }
}

/// Turn parsed headers into entries with their data offsets.
///
/// Solid members get offsets relative to their block, advanced by each
/// member's size plus padding. Everything else is laid out back to back from
/// `data_offset`.
pub(crate) fn build_entries(headers: Vec<EntryHeader>, data_offset: u64) -> ArchiveResult<Vec<Entry>> {
    let count = headers.len();
    let mut block_offsets: HashMap<EntryId, u64> = HashMap::new();
    let mut offset = data_offset;
    let mut entries = Vec::with_capacity(count);

    for (id, header) in (0..).zip(headers) {
        let mut entry = Entry::new(String::new(), header.flags);
        if header.flags.has(EntryFlags::SOLID) {
            let block = header.block_id;
            if block as usize >= count {
                return Err(ArchiveError::InvalidBlockReference { entry: id, block });
            }
            let relative = block_offsets.entry(block).or_insert(0);
            entry.offset = *relative;
            *relative += u64::from(header.real_size) + EXTRA_BUFSIZE as u64;
        } else {
            entry.offset = offset;
            offset += u64::from(header.packed_size);
        }
        entry.settings = stored_settings(&header);
        entry.header = header;
        entry.stored = true;
        entries.push(entry);
    }
    Ok(entries)
}

/// Settings that reproduce a stored header when the entry is written again
fn stored_settings(header: &EntryHeader) -> EntrySettings {
    let packed = header.flags.has(EntryFlags::PACKED);
    EntrySettings {
        algorithm: if packed { header.algorithm } else { Algorithm::None },
        level: if packed { header.level } else { Level::NONE },
        encryption: if header.flags.has(EntryFlags::ENCRYPTED) {
            Encryption::Enabled
        } else {
            Encryption::None
        },
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header(flags: u8, real_size: u32, packed_size: u32, block_id: u32) -> EntryHeader {
        EntryHeader {
            flags: EntryFlags::new(flags),
            real_size,
            packed_size,
            block_id,
            ..EntryHeader::default()
        }
    }

    #[test]
    fn test_offsets() {
        let headers = vec![
            header(EntryFlags::SOLID_BLOCK | EntryFlags::PACKED, 30, 12, 0),
            header(0, 7, 7, 0),
            header(EntryFlags::SOLID, 10, 10, 0),
            header(EntryFlags::SOLID, 12, 12, 0),
            header(EntryFlags::PACKED, 100, 40, 0),
        ];
        let entries = build_entries(headers, 50).unwrap();
        let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(vec![50, 62, 0, 14, 69], offsets);
        assert!(entries.iter().all(|e| e.stored && e.good));
    }

    #[test]
    fn test_dangling_block_reference() {
        let headers = vec![header(EntryFlags::SOLID, 1, 1, 5)];
        assert!(matches!(
            build_entries(headers, 0),
            Err(ArchiveError::InvalidBlockReference { entry: 0, block: 5 })
        ));
    }

    #[test]
    fn test_loaded_settings_follow_headers() {
        let mut packed = header(EntryFlags::PACKED, 10, 5, 0);
        packed.algorithm = Algorithm::Deflate;
        packed.level = Level::GOOD;
        let mut encrypted = header(EntryFlags::ENCRYPTED, 3, 3, 0);
        encrypted.level = Level::BETTER;
        let headers = vec![packed, header(0, 3, 3, 0), encrypted];
        let entries = build_entries(headers, 0).unwrap();

        assert_eq!(Algorithm::Deflate, entries[0].settings.algorithm);
        assert_eq!(Level::GOOD, entries[0].settings.level);
        assert_eq!(Encryption::None, entries[0].settings.encryption);
        assert_eq!(Algorithm::None, entries[1].settings.algorithm);
        assert!(entries[1].settings.level.is_none());
        assert_eq!(Encryption::None, entries[1].settings.encryption);
        assert!(entries[2].settings.level.is_none());
        assert_eq!(Encryption::Enabled, entries[2].settings.encryption);
    }
}
