//! Lazy entry resolution: disk, cipher, codec, checksum.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use lvpa_crypto::crc32;
use tracing::{debug, error, warn};

use super::Archive;
use crate::compression::{CompressBuffer, compressor_for};
use crate::entry::{BlockSlice, DataSlot, EntryFlags, EntryId};
use crate::format::EXTRA_BUFSIZE;
use crate::keys::KeyFailure;

/// Outcome of a failed attempt to bring an entry into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryFailure {
    /// Not readable right now; a different key or name may help
    Unavailable,
    /// The stored bytes are damaged; the entry is marked bad
    Damaged,
}

impl Archive {
    /// Contents of an entry, read and verified on first access.
    ///
    /// Returns `None` for unknown names, damaged entries, and encrypted
    /// entries that do not decrypt with the current master key.
    pub fn get(&mut self, name: &str) -> Option<&[u8]> {
        let id = self.get_id(name)?;
        self.get_by_id(id, true)
    }

    /// Contents of an entry by id, optionally skipping the checksum of the
    /// logical bytes.
    pub fn get_by_id(&mut self, id: EntryId, check_crc: bool) -> Option<&[u8]> {
        if self.resolve(id, check_crc) {
            self.resident_bytes(id)
        } else {
            None
        }
    }

    /// Make an entry resident and optionally verify it.
    pub(crate) fn resolve(&mut self, id: EntryId, check_crc: bool) -> bool {
        let Some(entry) = self.file_info(id) else {
            return false;
        };
        if !entry.good {
            return false;
        }

        if !entry.is_resident() {
            let loaded = if entry.is_solid_member() {
                self.resolve_member(id, check_crc)
            } else {
                self.resolve_stored(id)
            };
            if !loaded {
                return false;
            }
        }

        !check_crc || self.verify(id)
    }

    fn resolve_member(&mut self, id: EntryId, check_crc: bool) -> bool {
        let entry = &mut self.entries[id as usize];
        entry
            .header
            .flags
            .clear(EntryFlags::PACKED | EntryFlags::ENCRYPTED | EntryFlags::SCRAMBLED);
        let block = entry.header.block_id;
        let spare = entry.spare.take();

        if !self.file_info(block).is_some_and(|b| b.is_solid_block()) {
            error!("entry {} references missing solid block {}", id, block);
            self.entries[id as usize].good = false;
            return false;
        }

        let block_resident = self.entries[block as usize].is_resident();
        if let Some(slice) = spare
            && slice.block == block
            && block_resident
        {
            self.entries[id as usize].data = DataSlot::Borrowed(slice);
            return true;
        }

        if !self.resolve(block, check_crc) {
            warn!("unable to load solid block {} for entry {}", block, id);
            return false;
        }

        let block_size = u64::from(self.entries[block as usize].header.real_size);
        let entry = &mut self.entries[id as usize];
        let end = entry.offset + u64::from(entry.header.packed_size);
        if end > block_size {
            error!(
                "entry '{}' ends at {} beyond its solid block of {} bytes",
                entry.header.name, end, block_size
            );
            entry.good = false;
            return false;
        }

        let slice = BlockSlice {
            block,
            offset: entry.offset as usize,
            len: entry.header.real_size as usize,
        };
        entry.data = DataSlot::Borrowed(slice);
        true
    }

    fn resolve_stored(&mut self, id: EntryId) -> bool {
        match self.load_entry(id) {
            Ok(data) => {
                self.entries[id as usize].data = DataSlot::Owned(data);
                true
            }
            Err(EntryFailure::Damaged) => {
                self.entries[id as usize].good = false;
                false
            }
            Err(EntryFailure::Unavailable) => false,
        }
    }

    /// Read, decrypt and unpack an entry that is not a solid member.
    fn load_entry(&mut self, id: EntryId) -> Result<Vec<u8>, EntryFailure> {
        let entry = &self.entries[id as usize];
        if !entry.stored {
            debug!("entry '{}' has no stored contents", entry.header.name);
            return Err(EntryFailure::Unavailable);
        }
        let header = entry.header.clone();
        let offset = entry.offset;

        let mut raw = self.read_stored(offset, header.packed_size)?;

        if let Err(failure) = self.keys.decrypt_entry(&header, &mut raw) {
            match failure {
                KeyFailure::NoMasterKey => warn!("entry {} is encrypted, but no master key is set", id),
                KeyFailure::UnknownName => debug!("entry {} is scrambled and its name is not known", id),
                KeyFailure::NameMismatch => warn!("entry '{}' does not match its stored name hash", header.name),
            }
            return Err(EntryFailure::Unavailable);
        }

        // a wrong key garbles everything after this point
        let encrypted = header.flags.has(EntryFlags::ENCRYPTED);
        let failure = if encrypted {
            EntryFailure::Unavailable
        } else {
            EntryFailure::Damaged
        };

        let mut data = if header.flags.has(EntryFlags::PACKED) && header.real_size > 0 {
            let actual = crc32(&raw);
            if actual != header.crc_packed {
                error!(
                    "packed crc mismatch for entry {} '{}': expected {:08X}, got {:08X}",
                    id, header.name, header.crc_packed, actual
                );
                return Err(failure);
            }

            let mut buf = CompressBuffer::from_compressed(
                compressor_for(header.algorithm),
                raw,
                header.real_size as usize,
            );
            if let Err(err) = buf.decompress() {
                error!("unable to unpack entry {} '{}': {}", id, header.name, err);
                return Err(failure);
            }
            buf.into_inner()
        } else {
            raw
        };

        data.resize(data.len() + EXTRA_BUFSIZE, 0);
        Ok(data)
    }

    /// Read `len` stored bytes at `offset` from the backing file.
    pub(crate) fn read_stored(&mut self, offset: u64, len: u32) -> Result<Vec<u8>, EntryFailure> {
        let file = match self.backing_file() {
            Ok(file) => file,
            Err(err) => {
                warn!("unable to open archive file: {}", err);
                return Err(EntryFailure::Unavailable);
            }
        };

        let mut raw = vec![0u8; len as usize];
        let read = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut raw));
        if let Err(err) = read {
            error!("unable to read {} bytes at offset {}: {}", len, offset, err);
            return Err(EntryFailure::Damaged);
        }
        Ok(raw)
    }

    fn backing_file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let path = self.path.as_ref().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "archive has no backing file")
                })?;
                debug!("reopening {}", path.display());
                File::open(path)?
            }
        };
        Ok(self.file.insert(file))
    }

    /// Compare the logical bytes with the stored checksum.
    ///
    /// A mismatch discards the resident data. It marks the entry bad unless
    /// its bytes were encrypted, since a wrong key looks the same.
    fn verify(&mut self, id: EntryId) -> bool {
        let Some(bytes) = self.resident_bytes(id) else {
            return false;
        };
        let actual = crc32(bytes);
        let entry = &self.entries[id as usize];
        let expected = entry.header.crc_real;
        if actual == expected {
            return true;
        }

        let block = entry.block_id();
        let encrypted = match block {
            Some(block) => self.entries[block as usize]
                .flags()
                .has(EntryFlags::ENCRYPTED),
            None => entry.flags().has(EntryFlags::ENCRYPTED),
        };

        if encrypted {
            warn!(
                "crc mismatch for encrypted entry {} '{}', wrong master key?",
                id,
                entry.name()
            );
            match block {
                Some(block) => {
                    self.free_id(block);
                }
                None => {
                    self.entries[id as usize].data = DataSlot::Empty;
                }
            }
        } else {
            error!(
                "crc mismatch for entry {} '{}': expected {:08X}, got {:08X}",
                id,
                entry.name(),
                expected,
                actual
            );
            let entry = &mut self.entries[id as usize];
            entry.data = DataSlot::Empty;
            entry.good = false;
        }
        false
    }
}
