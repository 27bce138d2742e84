//! An archive handle without any way to modify or write the archive.

use std::path::Path;

use crate::archive::Archive;
use crate::config::LoadMode;
use crate::entry::{Entry, EntryId};
use crate::error::ArchiveResult;
use crate::view::EntryView;

/// Read access to an archive.
///
/// Wraps [`Archive`] and exposes loading, lookup and memory management only.
#[derive(Debug, Default)]
pub struct ReadOnlyArchive {
    inner: Archive,
}

impl ReadOnlyArchive {
    /// Empty handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an archive file
    ///
    /// # Errors
    ///
    /// See [`Archive::load_from`].
    pub fn open(path: impl AsRef<Path>, key: Option<&[u8]>, mode: LoadMode) -> ArchiveResult<Self> {
        Archive::open(path, key, mode).map(Self::from)
    }

    /// See [`Archive::load_from`]
    ///
    /// # Errors
    ///
    /// See [`Archive::load_from`].
    pub fn load_from(&mut self, path: impl AsRef<Path>, mode: LoadMode) -> ArchiveResult<()> {
        self.inner.load_from(path, mode)
    }

    /// See [`Archive::set_master_key`]
    pub fn set_master_key(&mut self, key: &[u8]) {
        self.inner.set_master_key(key);
    }

    /// See [`Archive::get`]
    pub fn get(&mut self, name: &str) -> Option<&[u8]> {
        self.inner.get(name)
    }

    /// See [`Archive::get_by_id`]
    pub fn get_by_id(&mut self, id: EntryId, check_crc: bool) -> Option<&[u8]> {
        self.inner.get_by_id(id, check_crc)
    }

    /// See [`Archive::get_id`]
    pub fn get_id(&mut self, name: &str) -> Option<EntryId> {
        self.inner.get_id(name)
    }

    /// Seekable reader over one entry. The view's writing methods act on the
    /// in-memory copy only, which can never be saved from here.
    pub fn open_entry(&mut self, name: &str) -> Option<EntryView<'_>> {
        self.inner.open_entry(name)
    }

    /// See [`Archive::free`]
    pub fn free(&mut self, name: &str) -> bool {
        self.inner.free(name)
    }

    /// See [`Archive::drop_data`]
    pub fn drop_data(&mut self, name: &str) -> bool {
        self.inner.drop_data(name)
    }

    /// See [`Archive::free_unused`]
    pub fn free_unused(&mut self) -> usize {
        self.inner.free_unused()
    }

    /// See [`Archive::count`]
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    /// See [`Archive::header_count`]
    pub fn header_count(&self) -> usize {
        self.inner.header_count()
    }

    /// See [`Archive::file_info`]
    pub fn file_info(&self, id: EntryId) -> Option<&Entry> {
        self.inner.file_info(id)
    }

    /// See [`Archive::entries`]
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.inner.entries()
    }

    /// See [`Archive::all_good`]
    pub fn all_good(&self) -> bool {
        self.inner.all_good()
    }

    /// See [`Archive::real_size`]
    pub const fn real_size(&self) -> u64 {
        self.inner.real_size()
    }

    /// See [`Archive::packed_size`]
    pub const fn packed_size(&self) -> u64 {
        self.inner.packed_size()
    }

    /// See [`Archive::path`]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path()
    }
}

impl From<Archive> for ReadOnlyArchive {
    fn from(inner: Archive) -> Self {
        Self { inner }
    }
}
