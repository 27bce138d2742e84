//! The archive engine.
//!
//! [`Archive`] owns every entry record, the name index, the backing file and
//! the master key. Entries are addressed by [`EntryId`], their position in the
//! entry table, which never changes while the archive is in memory. Removed
//! entries keep their slot so that ids and solid block references stay valid.
//!
//! Reading is lazy: [`Archive::load_from`] parses only the headers, and
//! [`Archive::get`] pulls an entry off disk the first time it is requested.
//! Solid members borrow a slice of their block's resident buffer; releasing a
//! block resets every member that borrowed from it.

mod load;
mod read;
mod save;

use std::collections::HashSet;
use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};

use lvpa_crypto::{Mt19937, crc32};
use tracing::debug;

use crate::config::AddOptions;
use crate::entry::{Algorithm, DataSlot, Entry, EntryFlags, EntryHeader, EntryId, Level};
use crate::error::{ArchiveError, ArchiveResult};
use crate::index::ArchiveIndex;
use crate::keys::KeyRing;

/// Suffix that turns a caller's block name into the block entry's name
pub const SOLID_BLOCK_SUFFIX: char = '*';

/// An LVPA archive held in memory.
pub struct Archive {
    entries: Vec<Entry>,
    index: ArchiveIndex,
    path: Option<PathBuf>,
    file: Option<File>,
    keys: KeyRing,
    rng: Mt19937,
    real_size: u64,
    packed_size: u64,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("file_open", &self.file.is_some())
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Empty archive with a randomly seeded warm-up generator
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: ArchiveIndex::new(),
            path: None,
            file: None,
            keys: KeyRing::new(),
            rng: Mt19937::new(rand::random::<u32>()),
            real_size: 0,
            packed_size: 0,
        }
    }

    /// Set the master key used for encrypted entries, encrypted headers and
    /// the scrambled name salt. An empty key removes it.
    pub fn set_master_key(&mut self, key: &[u8]) {
        self.keys.set_master_key(key);
    }

    /// Whether a master key is set
    pub fn has_master_key(&self) -> bool {
        self.keys.has_master_key()
    }

    /// Reseed the generator that picks per-entry cipher warm-ups
    pub fn random_seed(&mut self, seed: u32) {
        self.rng = Mt19937::new(seed);
    }

    /// Path the archive was loaded from or last saved to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drop every entry and the index. The master key and path are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.file = None;
        self.real_size = 0;
        self.packed_size = 0;
    }

    /// Number of indexed names, solid blocks included
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Number of live entries, solid blocks and unresolved scrambled
    /// entries included
    pub fn header_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    /// Sum of logical entry sizes, computed on load and save
    pub const fn real_size(&self) -> u64 {
        self.real_size
    }

    /// Sum of stored entry sizes, computed on load and save
    pub const fn packed_size(&self) -> u64 {
        self.packed_size
    }

    /// Metadata of a live entry
    pub fn file_info(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id as usize).filter(|e| !e.removed)
    }

    /// Live entries with their ids, in table order
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        (0..)
            .zip(self.entries.iter())
            .filter(|(_, entry)| !entry.removed)
    }

    /// Whether no live entry has been marked damaged
    pub fn all_good(&self) -> bool {
        self.entries.iter().all(|e| e.removed || e.good)
    }

    /// Look up an entry id by name.
    ///
    /// Names missing from the index are hashed and matched against the
    /// stored hashes of scrambled entries; a hit caches the name in the entry
    /// and the index.
    pub fn get_id(&mut self, name: &str) -> Option<EntryId> {
        if let Some(id) = self.index.get(name) {
            return Some(id);
        }

        let hash = self.keys.scrambled_hash(name);
        let (id, entry) = (0..).zip(self.entries.iter_mut()).find(|(_, e)| {
            !e.removed && e.flags().has(EntryFlags::SCRAMBLED) && e.header.name_hash == hash
        })?;
        debug!("resolved scrambled entry {} as '{}'", id, name);
        entry.header.name = name.to_string();
        self.index.insert(name, id);
        Some(id)
    }

    /// Add a file, or overwrite the contents and settings of an existing one.
    ///
    /// Overwriting keeps the entry id. Entries added to a solid block lose
    /// the scramble setting, because member keys cannot depend on names.
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not fit the 32-bit size fields,
    /// if `name` is a solid block, or if the block name is taken by a
    /// regular entry.
    pub fn add(&mut self, name: &str, data: Vec<u8>, options: &AddOptions) -> ArchiveResult<EntryId> {
        let real_size = u32::try_from(data.len()).map_err(|_| ArchiveError::TooLarge {
            what: "entry",
            size: data.len() as u64,
        })?;

        let id = match self.get_id(name) {
            // members would be left pointing at a regular entry
            Some(id) if self.entries[id as usize].is_solid_block() => {
                return Err(ArchiveError::NameConflict(name.to_string()));
            }
            Some(id) => {
                self.free_id(id);
                id
            }
            None => self.push_entry(Entry::new(name.to_string(), EntryFlags::default()))?,
        };

        let mut flags = EntryFlags::default();
        flags.toggle(EntryFlags::SCRAMBLED, options.scramble);

        let entry = &mut self.entries[id as usize];
        entry.header = EntryHeader {
            flags,
            real_size,
            packed_size: real_size,
            crc_real: crc32(&data),
            name: name.to_string(),
            ..EntryHeader::default()
        };
        entry.settings = options.settings();
        entry.offset = 0;
        entry.data = DataSlot::Owned(data);
        entry.spare = None;
        entry.good = true;
        entry.stored = false;
        entry.removed = false;

        if let Some(block) = &options.solid_block {
            self.make_solid(id, block)?;
        }
        Ok(id)
    }

    fn make_solid(&mut self, id: EntryId, block_name: &str) -> ArchiveResult<()> {
        let block_id = match self.live_block(block_name) {
            Some(block_id) => block_id,
            None => self.set_solid_block(block_name, Level::INHERIT, Algorithm::Inherit)?,
        };

        let entry = &mut self.entries[id as usize];
        if entry.header.flags.has(EntryFlags::SCRAMBLED) {
            debug!(
                "solid entry '{}' cannot be scrambled, clearing the flag",
                entry.header.name
            );
            entry.header.flags.clear(EntryFlags::SCRAMBLED);
        }
        entry.header.flags.set(EntryFlags::SOLID);
        entry.header.block_id = block_id;
        Ok(())
    }

    fn live_block(&self, block_name: &str) -> Option<EntryId> {
        let id = self.index.get(&format!("{block_name}{SOLID_BLOCK_SUFFIX}"))?;
        self.file_info(id)
            .filter(|e| e.is_solid_block())
            .map(|_| id)
    }

    /// Create the solid block `block_name` or update its settings.
    ///
    /// The block entry is stored under `block_name` plus `*`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::NameConflict`] if a regular entry already uses
    /// the block entry's name.
    pub fn set_solid_block(
        &mut self,
        block_name: &str,
        level: Level,
        algorithm: Algorithm,
    ) -> ArchiveResult<EntryId> {
        let full_name = format!("{block_name}{SOLID_BLOCK_SUFFIX}");
        let id = match self.index.get(&full_name) {
            Some(id) if self.entries[id as usize].is_solid_block() => id,
            Some(_) => return Err(ArchiveError::NameConflict(full_name)),
            None => {
                let block = Entry::new(full_name, EntryFlags::new(EntryFlags::SOLID_BLOCK));
                self.push_entry(block)?
            }
        };

        let settings = &mut self.entries[id as usize].settings;
        settings.level = level;
        settings.algorithm = algorithm;
        Ok(id)
    }

    fn push_entry(&mut self, entry: Entry) -> ArchiveResult<EntryId> {
        let id = EntryId::try_from(self.entries.len()).map_err(|_| ArchiveError::TooLarge {
            what: "entry table",
            size: self.entries.len() as u64,
        })?;
        self.index.insert(entry.name(), id);
        self.entries.push(entry);
        Ok(id)
    }

    /// Take an entry out of the archive and hand its contents to the caller.
    ///
    /// Contents that are not resident are read first; the entry is removed
    /// even when that fails.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        let id = self.get_id(name)?;
        self.resolve(id, true);

        let borrowed = match &self.entries[id as usize].data {
            DataSlot::Borrowed(_) => self.resident_bytes(id).map(<[u8]>::to_vec),
            _ => None,
        };
        match self.take_entry(id, name) {
            DataSlot::Owned(mut bytes) => {
                bytes.truncate(self.entries[id as usize].header.real_size as usize);
                Some(bytes)
            }
            _ => borrowed,
        }
    }

    /// Remove an entry and discard its contents. Returns whether it existed.
    pub fn delete(&mut self, name: &str) -> bool {
        match self.get_id(name) {
            Some(id) => {
                self.take_entry(id, name);
                true
            }
            None => false,
        }
    }

    fn take_entry(&mut self, id: EntryId, name: &str) -> DataSlot {
        let entry = &mut self.entries[id as usize];
        let data = mem::take(&mut entry.data);
        entry.spare = None;
        entry.removed = true;
        let is_block = entry.is_solid_block();
        if is_block {
            self.invalidate_members(id);
        }
        self.index.remove(name);
        data
    }

    /// Release the resident data of an entry by name.
    ///
    /// Returns `true` if memory was deallocated, or if no such entry exists.
    /// Freeing a solid member never deallocates; freeing a block resets all
    /// of its members.
    pub fn free(&mut self, name: &str) -> bool {
        match self.get_id(name) {
            Some(id) => self.free_id(id),
            None => true,
        }
    }

    /// [`Archive::free`] by id
    pub fn free_id(&mut self, id: EntryId) -> bool {
        let Some(entry) = self.entries.get_mut(id as usize) else {
            return true;
        };
        entry.spare = None;
        let released = mem::take(&mut entry.data);
        if entry.is_solid_block() {
            self.invalidate_members(id);
        }
        matches!(released, DataSlot::Owned(_))
    }

    /// Let go of an entry's data while remembering where a solid member's
    /// bytes were, so that it can be re-resolved cheaply while the block
    /// stays resident.
    ///
    /// Returns `true` unless the data belongs to a solid block, which is
    /// also the result for unknown names.
    pub fn drop_data(&mut self, name: &str) -> bool {
        match self.get_id(name) {
            Some(id) => self.drop_id(id),
            None => true,
        }
    }

    /// [`Archive::drop_data`] by id
    pub fn drop_id(&mut self, id: EntryId) -> bool {
        let Some(entry) = self.entries.get_mut(id as usize) else {
            return true;
        };
        match mem::take(&mut entry.data) {
            DataSlot::Borrowed(slice) => {
                entry.spare = Some(slice);
                false
            }
            DataSlot::Owned(_) => {
                if entry.is_solid_block() {
                    self.invalidate_members(id);
                }
                true
            }
            DataSlot::Empty => true,
        }
    }

    /// Release every resident solid block that no member currently borrows
    /// from. Returns how many blocks were released.
    pub fn free_unused(&mut self) -> usize {
        let pinned: HashSet<EntryId> = self
            .entries
            .iter()
            .filter_map(|e| match e.data {
                DataSlot::Borrowed(slice) => Some(slice.block),
                _ => None,
            })
            .collect();

        let unused: Vec<EntryId> = self
            .entries()
            .filter(|(id, e)| {
                e.is_solid_block() && matches!(e.data, DataSlot::Owned(_)) && !pinned.contains(id)
            })
            .map(|(id, _)| id)
            .collect();

        for &id in &unused {
            self.free_id(id);
        }
        debug!("released {} unused solid blocks", unused.len());
        unused.len()
    }

    /// Reset the borrowed data and recovery slices of a block's members.
    fn invalidate_members(&mut self, block: EntryId) {
        for entry in &mut self.entries {
            if matches!(entry.data, DataSlot::Borrowed(slice) if slice.block == block) {
                entry.data = DataSlot::Empty;
            }
            if entry.spare.is_some_and(|slice| slice.block == block) {
                entry.spare = None;
            }
        }
    }

    /// Logical bytes of a resident entry
    pub(crate) fn resident_bytes(&self, id: EntryId) -> Option<&[u8]> {
        resident_in(&self.entries, id)
    }

    /// Caller-facing name of the solid block owning `id`
    pub(crate) fn block_name_of(&self, id: EntryId) -> Option<String> {
        let block = self.file_info(id)?.block_id()?;
        let name = self.file_info(block)?.name();
        Some(name.strip_suffix(SOLID_BLOCK_SUFFIX).unwrap_or(name).to_string())
    }
}

/// Logical bytes of a resident entry in `entries`
fn resident_in(entries: &[Entry], id: EntryId) -> Option<&[u8]> {
    let entry = entries.get(id as usize)?;
    match &entry.data {
        DataSlot::Empty => None,
        DataSlot::Owned(bytes) => {
            let len = bytes.len().min(entry.header.real_size as usize);
            Some(&bytes[..len])
        }
        DataSlot::Borrowed(slice) => match &entries.get(slice.block as usize)?.data {
            DataSlot::Owned(block) => block.get(slice.range()),
            _ => None,
        },
    }
}
