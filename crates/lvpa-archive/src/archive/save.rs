//! Writing archives.
//!
//! Saving works on copies of the entry headers. Every entry that will be
//! written is first made resident, then staged: solid members are appended to
//! their block's buffer, every other entry is checksummed, compressed and
//! encrypted into its own blob. Live entries are only updated once the file
//! has been written completely.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use lvpa_crypto::{KeystreamCipher, crc32};
use tracing::{debug, error, info, warn};

use super::{Archive, resident_in};
use crate::compression::{CompressBuffer, compressor_for};
use crate::config::SaveOptions;
use crate::entry::{
    Algorithm, Encryption, EntryFlags, EntryHeader, EntryId, EntrySettings, Level,
};
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{
    EXTRA_BUFSIZE, LVPA_MAGIC, LVPA_VERSION, MASTER_CRYPT_OFFSET, MASTER_RECORD_SIZE,
    MasterRecord, master_flags, write_header_table,
};
use crate::keys::KeyFailure;

/// Offset of the header table: right after the magic and the master record
const HEADER_OFFSET: u32 = (LVPA_MAGIC.len() + MASTER_RECORD_SIZE) as u32;

/// Save-wide settings after resolving `Inherit`
#[derive(Debug, Clone, Copy)]
struct Globals {
    level: Level,
    algorithm: Algorithm,
    encrypt: bool,
    has_key: bool,
}

impl Globals {
    /// Concrete level, algorithm and encryption of one entry
    fn resolve(&self, settings: EntrySettings) -> (Level, Algorithm, bool) {
        let mut level = if settings.level.is_inherit() {
            self.level
        } else {
            settings.level
        };
        let mut algorithm = match settings.algorithm {
            Algorithm::Inherit => self.algorithm,
            other => other,
        };
        if algorithm == Algorithm::None {
            level = Level::NONE;
        }
        if level.is_none() {
            algorithm = Algorithm::None;
        }
        (level, algorithm, self.wants_encryption(settings.encryption))
    }

    fn wants_encryption(&self, encryption: Encryption) -> bool {
        match encryption {
            Encryption::None => false,
            Encryption::Enabled => true,
            Encryption::Inherit => self.encrypt,
        }
    }
}

/// Where the bytes of an entry come from
#[derive(Debug)]
enum Source {
    /// Not written
    Skip,
    /// Resident contents, encoded anew
    Fresh,
    /// Stored bytes that could not be decoded, copied as they are
    Raw(Vec<u8>),
    /// Solid member whose bytes stay inside a block copied as stored
    Carried,
}

/// An entry ready to be written
#[derive(Debug)]
struct Staged {
    id: EntryId,
    header: EntryHeader,
    blob: Vec<u8>,
}

impl Staged {
    fn is_member(&self) -> bool {
        self.header.flags.has(EntryFlags::SOLID)
    }
}

impl Archive {
    /// Write the archive back to the path it was loaded from or last saved
    /// to.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::NoPath`] if the archive was never loaded or
    /// saved, otherwise the errors of [`Archive::save_as`].
    pub fn save(&mut self, options: &SaveOptions) -> ArchiveResult<()> {
        let path = self.path.clone().ok_or(ArchiveError::NoPath)?;
        self.save_as(path, options)
    }

    /// Write the archive to `path`.
    ///
    /// Entries that are not resident are read from the current backing file
    /// first, so the target may be that same file. Damaged entries are left
    /// out. Encrypted entries that cannot be decrypted with the current key
    /// are copied as stored; for a solid block that includes its members,
    /// which keep their headers and positions.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to write, if every entry is
    /// unusable, if a size exceeds the format's 32-bit fields, or on I/O
    /// failure. [`ArchiveError::LockedSolidBlock`] is returned when a block
    /// that cannot be decrypted would have to be rebuilt.
    pub fn save_as(&mut self, path: impl AsRef<Path>, options: &SaveOptions) -> ArchiveResult<()> {
        let path = path.as_ref();
        if self.header_count() == 0 {
            return Err(ArchiveError::NoEntries);
        }

        let mut encrypt = options.encrypt;
        if encrypt && !self.keys.has_master_key() {
            warn!("encryption requested, but no master key is set; saving unencrypted");
            encrypt = false;
        }
        let globals = Globals {
            level: if options.level.is_inherit() {
                Level::NORMAL
            } else {
                options.level
            },
            algorithm: match options.algorithm {
                Algorithm::Inherit => Algorithm::Lzma,
                other => other,
            },
            encrypt,
            has_key: self.keys.has_master_key(),
        };

        let sources = self.gather_sources()?;
        let staged = self.stage(sources, &globals)?;
        if staged.is_empty() {
            return Err(ArchiveError::NoValidEntries);
        }

        let table = write_header_table(staged.iter().map(|s| &s.header))?;
        let (master, mut table) = pack_header_table(table, staged.len(), &globals)?;
        let mut master_bytes = master.to_bytes()?;
        if globals.encrypt {
            let mut cipher = self.keys.header_cipher()?;
            cipher.apply(&mut master_bytes[MASTER_CRYPT_OFFSET..]);
            cipher.apply(&mut table);
        }

        // the target may be the file we have been reading from
        self.file = None;
        write_archive(path, &master_bytes, &table, &staged)?;

        self.commit(path, staged, u64::from(master.data_offset));
        info!(
            "saved {} with {} entries, {} bytes ({} stored)",
            path.display(),
            self.header_count(),
            self.real_size,
            self.packed_size
        );
        Ok(())
    }

    /// Decide for every entry whether and how it is written, making entries
    /// resident on the way.
    fn gather_sources(&mut self) -> ArchiveResult<Vec<Source>> {
        let count = self.entries.len();
        let mut sources = Vec::with_capacity(count);

        for (id, idx) in (0..).zip(0..count) {
            let entry = &self.entries[idx];
            let source = if entry.removed || !entry.good {
                Source::Skip
            } else if entry.is_solid_block() || entry.is_resident() {
                Source::Fresh
            } else if !entry.stored {
                warn!("entry '{}' was freed before it was ever saved, skipping", entry.name());
                Source::Skip
            } else if self.resolve(id, true) {
                Source::Fresh
            } else {
                self.raw_source(id)
            };
            sources.push(source);
        }

        // resolving one member may have released a block other members borrowed from
        for (idx, source) in sources.iter_mut().enumerate() {
            let entry = &self.entries[idx];
            if matches!(source, Source::Fresh) && !entry.is_solid_block() && !entry.is_resident() {
                error!("entry '{}' lost its data while saving, skipping", entry.name());
                *source = Source::Skip;
            }
        }

        let locked: BTreeSet<EntryId> = self
            .entries
            .iter()
            .zip(&sources)
            .filter(|(_, source)| matches!(source, Source::Carried))
            .filter_map(|(e, _)| e.block_id())
            .collect();
        for block in locked {
            self.check_locked_layout(block, &sources)?;
            let entry = &self.entries[block as usize];
            let (offset, len) = (entry.offset, entry.header.packed_size);
            match self.read_stored(offset, len) {
                Ok(raw) => {
                    debug!("copying undecodable solid block {} as stored", block);
                    sources[block as usize] = Source::Raw(raw);
                }
                Err(_) => {
                    error!("solid block {} is unreadable, skipping its members", block);
                    sources[block as usize] = Source::Skip;
                }
            }
        }

        let usable_blocks: Vec<bool> = self
            .entries
            .iter()
            .zip(&sources)
            .map(|(e, source)| {
                e.is_solid_block() && matches!(source, Source::Fresh | Source::Raw(_))
            })
            .collect();
        let mut used_blocks = vec![false; count];
        for (idx, source) in sources.iter_mut().enumerate() {
            let Some(block) = self.entries[idx].block_id() else {
                continue;
            };
            if !matches!(source, Source::Fresh | Source::Carried) {
                continue;
            }
            let block = block as usize;
            if usable_blocks.get(block).copied().unwrap_or(false) {
                used_blocks[block] = true;
            } else {
                error!("entry '{}' has no usable solid block, skipping", self.entries[idx].name());
                *source = Source::Skip;
            }
        }

        for (idx, source) in sources.iter_mut().enumerate() {
            if self.entries[idx].is_solid_block() && !used_blocks[idx] {
                if matches!(source, Source::Fresh) {
                    debug!("dropping empty solid block '{}'", self.entries[idx].name());
                }
                *source = Source::Skip;
            }
        }
        Ok(sources)
    }

    /// Fallback for stored entries that did not resolve: encrypted contents
    /// are kept verbatim, anything else is dropped.
    fn raw_source(&mut self, id: EntryId) -> Source {
        let entry = &self.entries[id as usize];
        let name = entry.name().to_string();
        if entry.good && entry.is_solid_member() && self.is_locked_block(entry.header.block_id) {
            debug!("keeping entry {} '{}' inside its undecodable block", id, name);
            return Source::Carried;
        }
        if !entry.good || entry.is_solid_member() || !entry.flags().is_crypted() {
            error!("entry {} '{}' is unreadable, skipping", id, name);
            return Source::Skip;
        }
        let (offset, len) = (entry.offset, entry.header.packed_size);
        match self.read_stored(offset, len) {
            Ok(raw) => {
                debug!("copying undecodable entry {} '{}' as stored", id, name);
                Source::Raw(raw)
            }
            Err(_) => {
                error!("entry {} '{}' is unreadable, skipping", id, name);
                Source::Skip
            }
        }
    }

    /// Whether `block` is a stored, encrypted solid block that did not
    /// decrypt
    fn is_locked_block(&self, block: EntryId) -> bool {
        self.file_info(block).is_some_and(|b| {
            b.is_solid_block() && b.good && b.stored && !b.is_resident() && b.flags().is_crypted()
        })
    }

    /// A block copied as stored only stays readable if its live members
    /// still sit where the stored layout puts them.
    fn check_locked_layout(&self, block: EntryId, sources: &[Source]) -> ArchiveResult<()> {
        let mut expected = 0u64;
        for (entry, source) in self.entries.iter().zip(sources) {
            if entry.removed || entry.block_id() != Some(block) {
                continue;
            }
            if !matches!(source, Source::Carried) || entry.offset != expected {
                let name = self.entries[block as usize].name();
                error!(
                    "entry '{}' no longer fits the stored layout of solid block '{}'",
                    entry.name(),
                    name
                );
                return Err(ArchiveError::LockedSolidBlock(name.to_string()));
            }
            expected += u64::from(entry.header.real_size) + EXTRA_BUFSIZE as u64;
        }
        Ok(())
    }

    /// Encode every written entry into its final header and blob.
    fn stage(&mut self, sources: Vec<Source>, globals: &Globals) -> ArchiveResult<Vec<Staged>> {
        let entries = &self.entries;
        let keys = &self.keys;
        let rng = &mut self.rng;

        let mut new_ids: Vec<Option<EntryId>> = Vec::with_capacity(sources.len());
        let mut next: EntryId = 0;
        for source in &sources {
            if matches!(source, Source::Skip) {
                new_ids.push(None);
            } else {
                new_ids.push(Some(next));
                next += 1;
            }
        }

        // block contents and encryption requests, collected from members in order
        let mut block_data: HashMap<EntryId, Vec<u8>> = HashMap::new();
        let mut block_encrypted: HashSet<EntryId> = HashSet::new();
        for ((id, entry), source) in (0..).zip(entries.iter()).zip(&sources) {
            let (Source::Fresh, Some(block)) = (source, entry.block_id()) else {
                continue;
            };
            let bytes = resident_in(entries, id).unwrap_or_default();
            let buffer = block_data.entry(block).or_default();
            buffer.extend_from_slice(bytes);
            buffer.extend_from_slice(&[0u8; EXTRA_BUFSIZE]);
            if globals.wants_encryption(entry.settings.encryption) {
                block_encrypted.insert(block);
            }
        }

        let mut staged = Vec::with_capacity(next as usize);
        for ((id, entry), source) in (0..).zip(entries.iter()).zip(sources) {
            let mut header = entry.header.clone();
            let blob = match source {
                Source::Skip => continue,
                // stored bytes went through the cipher when they were first written
                Source::Raw(raw) => raw,
                Source::Carried => {
                    header.block_id = new_ids[entry.header.block_id as usize].unwrap_or_default();
                    Vec::new()
                }
                Source::Fresh if entry.is_solid_member() => {
                    let bytes = resident_in(entries, id).unwrap_or_default();
                    let real_size = fit_u32("entry", bytes.len())?;
                    header.flags = EntryFlags::new(EntryFlags::SOLID);
                    header.real_size = real_size;
                    header.packed_size = real_size;
                    header.crc_real = crc32(bytes);
                    header.crc_packed = 0;
                    header.algorithm = Algorithm::None;
                    header.level = Level::NONE;
                    header.cipher_warmup = 0;
                    header.block_id = new_ids[entry.header.block_id as usize].unwrap_or_default();
                    Vec::new()
                }
                Source::Fresh => {
                    let (level, algorithm, mut encrypt) = globals.resolve(entry.settings);
                    let data = if entry.is_solid_block() {
                        encrypt |= block_encrypted.contains(&id);
                        block_data.remove(&id).unwrap_or_default()
                    } else {
                        resident_in(entries, id).unwrap_or_default().to_vec()
                    };
                    if encrypt && !globals.has_key {
                        warn!(
                            "entry '{}' asks for encryption, but no master key is set",
                            entry.name()
                        );
                        encrypt = false;
                    }

                    header.flags = EntryFlags::new(
                        entry.header.flags.value() & (EntryFlags::SCRAMBLED | EntryFlags::SOLID_BLOCK),
                    );
                    header.flags.toggle(EntryFlags::ENCRYPTED, encrypt);
                    let mut blob = encode_entry(&mut header, data, level, algorithm)?;
                    // scrambled entries get their name hash here, even when empty
                    keys.encrypt_entry(&mut header, &mut blob, rng)
                        .map_err(|failure| key_error(failure, &header.name))?;
                    blob
                }
            };
            staged.push(Staged { id, header, blob });
        }
        Ok(staged)
    }

    /// Make the live entries describe the file that was just written.
    fn commit(&mut self, path: &Path, staged: Vec<Staged>, data_offset: u64) {
        let mut written = vec![false; self.entries.len()];
        let mut offset = data_offset;
        let mut block_offsets: HashMap<EntryId, u64> = HashMap::new();

        for Staged { id, mut header, .. } in staged {
            let entry = &mut self.entries[id as usize];
            if header.flags.has(EntryFlags::SOLID) {
                // live entries keep addressing blocks by their in-memory id
                header.block_id = entry.header.block_id;
                let relative = block_offsets.entry(header.block_id).or_insert(0);
                entry.offset = *relative;
                *relative += u64::from(header.real_size) + EXTRA_BUFSIZE as u64;
            } else {
                entry.offset = offset;
                offset += u64::from(header.packed_size);
            }
            entry.header = header;
            entry.stored = true;
            written[id as usize] = true;
        }

        let mut blocks = Vec::new();
        for ((id, entry), written) in (0..).zip(self.entries.iter_mut()).zip(written) {
            if !written {
                entry.stored = false;
            }
            if entry.is_solid_block() {
                blocks.push(id);
            }
        }
        // block buffers describe the old layout
        for id in blocks {
            self.free_id(id);
        }

        self.path = Some(path.to_path_buf());
        self.compute_totals();
    }
}

/// Serialize and optionally compress the header table.
fn pack_header_table(
    table: Vec<u8>,
    count: usize,
    globals: &Globals,
) -> ArchiveResult<(MasterRecord, Vec<u8>)> {
    let real_header_size = fit_u32("header table", table.len())?;
    let header_crc_real = crc32(&table);

    let mut buf = CompressBuffer::with_data(compressor_for(globals.algorithm), table);
    if let Err(err) = buf.compress(globals.level) {
        warn!("unable to compress headers, storing them: {}", err);
    }
    let packed = buf.is_compressed();
    let header_crc_packed = if packed { crc32(buf.as_slice()) } else { 0 };
    let table = buf.into_inner();
    let packed_header_size = fit_u32("header table", table.len())?;

    let mut flags = 0;
    if packed {
        flags |= master_flags::PACKED;
    }
    if globals.encrypt {
        flags |= master_flags::ENCRYPTED;
    }

    let data_offset = u64::from(HEADER_OFFSET) + u64::from(packed_header_size);
    let master = MasterRecord {
        version: LVPA_VERSION,
        flags,
        header_entries: fit_u32("entry table", count)?,
        packed_header_size,
        real_header_size,
        header_offset: HEADER_OFFSET,
        header_crc_packed,
        header_crc_real,
        algorithm: globals.algorithm.as_byte(),
        data_offset: u32::try_from(data_offset).map_err(|_| ArchiveError::TooLarge {
            what: "header table",
            size: data_offset,
        })?,
    };
    Ok((master, table))
}

/// Checksum, compress and size one entry, filling in its header.
fn encode_entry(
    header: &mut EntryHeader,
    data: Vec<u8>,
    level: Level,
    algorithm: Algorithm,
) -> ArchiveResult<Vec<u8>> {
    header.real_size = fit_u32("entry", data.len())?;
    header.crc_real = crc32(&data);

    let mut buf = CompressBuffer::with_data(compressor_for(algorithm), data);
    if let Err(err) = buf.compress(level) {
        warn!("unable to compress '{}', storing it: {}", header.name, err);
    }
    if buf.is_compressed() {
        header.flags.set(EntryFlags::PACKED);
        header.algorithm = algorithm;
        header.level = level;
        header.crc_packed = crc32(buf.as_slice());
    } else {
        header.algorithm = Algorithm::None;
        header.level = Level::NONE;
        header.crc_packed = 0;
    }
    let blob = buf.into_inner();
    header.packed_size = fit_u32("entry", blob.len())?;
    Ok(blob)
}

fn write_archive(path: &Path, master: &[u8], table: &[u8], staged: &[Staged]) -> ArchiveResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&LVPA_MAGIC)?;
    writer.write_all(master)?;
    writer.write_all(table)?;
    for entry in staged.iter().filter(|s| !s.is_member()) {
        writer.write_all(&entry.blob)?;
    }
    writer.flush()?;
    Ok(())
}

fn fit_u32(what: &'static str, size: usize) -> ArchiveResult<u32> {
    u32::try_from(size).map_err(|_| ArchiveError::TooLarge {
        what,
        size: size as u64,
    })
}

fn key_error(failure: KeyFailure, name: &str) -> ArchiveError {
    match failure {
        KeyFailure::NoMasterKey => ArchiveError::MissingMasterKey,
        KeyFailure::UnknownName | KeyFailure::NameMismatch => {
            ArchiveError::EntryNotFound(name.to_string())
        }
    }
}
