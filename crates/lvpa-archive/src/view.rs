//! Byte-view access to a single entry, for file-system style adapters.

use std::io::{self, Read, Seek, SeekFrom};

use crate::archive::Archive;
use crate::config::AddOptions;
use crate::entry::{EntryFlags, EntryId};
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::EXTRA_BUFSIZE;

impl Archive {
    /// Open a view on an entry by name
    pub fn open_entry(&mut self, name: &str) -> Option<EntryView<'_>> {
        let id = self.get_id(name)?;
        self.open_entry_id(id)
    }

    /// Open a view on an entry by id. Solid blocks cannot be opened.
    pub fn open_entry_id(&mut self, id: EntryId) -> Option<EntryView<'_>> {
        if self.file_info(id)?.is_solid_block() {
            return None;
        }
        Some(EntryView {
            archive: self,
            id,
            position: 0,
            verified: false,
        })
    }
}

/// A seekable view on one entry.
///
/// Reads resolve the entry on first use. Writes replace the entry's contents
/// through [`Archive::add`], keeping its solid block and settings.
#[derive(Debug)]
pub struct EntryView<'a> {
    archive: &'a mut Archive,
    id: EntryId,
    position: u64,
    verified: bool,
}

impl EntryView<'_> {
    /// Entry id
    pub const fn id(&self) -> EntryId {
        self.id
    }

    /// Full entry name
    pub fn full_name(&self) -> &str {
        self.archive
            .file_info(self.id)
            .map_or("", |entry| entry.name())
    }

    /// Last path component of the entry name
    pub fn name(&self) -> &str {
        let full = self.full_name();
        full.rsplit('/').next().unwrap_or(full)
    }

    /// Logical size in bytes
    pub fn size(&self) -> u64 {
        self.archive
            .file_info(self.id)
            .map_or(0, |entry| u64::from(entry.real_size()))
    }

    /// Up to `len` bytes starting at `offset`, clamped to the entry size.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Option<&[u8]> {
        let check_crc = !self.verified;
        let bytes = self.archive.get_by_id(self.id, check_crc)?;
        self.verified = true;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
        let end = start.saturating_add(len).min(bytes.len());
        Some(&bytes[start..end])
    }

    /// Truncate or zero-extend the entry to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the current contents cannot be read or the new
    /// size exceeds the format limit.
    pub fn resize(&mut self, new_size: u64) -> ArchiveResult<()> {
        let new_size = usize::try_from(new_size).map_err(|_| ArchiveError::TooLarge {
            what: "entry",
            size: new_size,
        })?;
        let mut data = self.contents()?;
        if new_size <= data.len() {
            data.truncate(new_size);
        } else {
            data.reserve(new_size - data.len() + EXTRA_BUFSIZE);
            data.resize(new_size, 0);
        }
        self.replace(data)
    }

    /// Write `bytes` at `offset`, growing the entry as needed.
    ///
    /// # Errors
    ///
    /// Same as [`EntryView::resize`].
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> ArchiveResult<()> {
        let too_large = |size| ArchiveError::TooLarge {
            what: "entry",
            size,
        };
        let start = usize::try_from(offset).map_err(|_| too_large(offset))?;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| too_large(u64::MAX))?;

        let mut data = self.contents()?;
        if data.len() < end {
            data.reserve(end - data.len() + EXTRA_BUFSIZE);
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        self.replace(data)
    }

    /// Release the entry's resident data. See [`Archive::free_id`].
    pub fn free(&mut self) -> bool {
        self.verified = false;
        self.archive.free_id(self.id)
    }

    /// Let go of the entry's data. See [`Archive::drop_id`].
    pub fn drop_data(&mut self) -> bool {
        self.verified = false;
        self.archive.drop_id(self.id)
    }

    fn contents(&mut self) -> ArchiveResult<Vec<u8>> {
        let name = self.full_name().to_string();
        self.read_at(0, usize::MAX)
            .map(<[u8]>::to_vec)
            .ok_or(ArchiveError::EntryNotFound(name))
    }

    fn replace(&mut self, data: Vec<u8>) -> ArchiveResult<()> {
        let entry = self
            .archive
            .file_info(self.id)
            .ok_or_else(|| ArchiveError::EntryNotFound(self.id.to_string()))?;
        let name = entry.name().to_string();
        if name.is_empty() {
            return Err(ArchiveError::EntryNotFound(self.id.to_string()));
        }

        let settings = entry.settings;
        let mut options = AddOptions::new()
            .with_algorithm(settings.algorithm)
            .with_level(settings.level)
            .with_encryption(settings.encryption)
            .with_scramble(entry.flags().has(EntryFlags::SCRAMBLED));
        options.solid_block = self.archive.block_name_of(self.id);

        self.id = self.archive.add(&name, data, &options)?;
        self.verified = true;
        Ok(())
    }
}

impl Read for EntryView<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let bytes = self
            .read_at(position, buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "entry is not readable"))?;
        let n = bytes.len();
        buf[..n].copy_from_slice(bytes);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for EntryView<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn archive_with(name: &str, data: &[u8]) -> Archive {
        let mut archive = Archive::new();
        archive.add(name, data.to_vec(), &AddOptions::new()).unwrap();
        archive
    }

    #[test]
    fn test_name_is_basename() {
        let mut archive = archive_with("dir/sub/file.txt", b"x");
        let view = archive.open_entry("dir/sub/file.txt").unwrap();
        assert_eq!("file.txt", view.name());
        assert_eq!("dir/sub/file.txt", view.full_name());
        assert_eq!(1, view.size());
    }

    #[test]
    fn test_read_at_clamps() {
        let mut archive = archive_with("f", b"hello world");
        let mut view = archive.open_entry("f").unwrap();
        assert_eq!(Some(&b"world"[..]), view.read_at(6, 100));
        assert_eq!(Some(&b""[..]), view.read_at(50, 3));
    }

    #[test]
    fn test_resize_and_write() {
        let mut archive = archive_with("f", b"hello world");
        let mut view = archive.open_entry("f").unwrap();
        view.resize(5).unwrap();
        assert_eq!(5, view.size());
        view.resize(8).unwrap();
        assert_eq!(Some(&b"hello\0\0\0"[..]), view.read_at(0, 100));
        view.write_at(6, b"XYZ").unwrap();
        assert_eq!(Some(&b"hello\0XYZ"[..]), view.read_at(0, 100));
    }

    #[test]
    fn test_resize_shrinks_and_grows() {
        let mut archive = archive_with("f", b"abcdef");
        let mut view = archive.open_entry("f").unwrap();
        view.resize(6).unwrap();
        assert_eq!(Some(&b"abcdef"[..]), view.read_at(0, 100));
        view.resize(2).unwrap();
        assert_eq!(Some(&b"ab"[..]), view.read_at(0, 100));
        view.resize(0).unwrap();
        assert_eq!(0, view.size());
        view.resize(3).unwrap();
        assert_eq!(Some(&b"\0\0\0"[..]), view.read_at(0, 100));
        assert_eq!(Some(&b"\0\0\0"[..]), archive.get("f"));
    }

    #[test]
    fn test_resize_keeps_solid_block() {
        let mut archive = Archive::new();
        let options = AddOptions::new().with_solid_block("blk");
        let id = archive.add("m", b"member".to_vec(), &options).unwrap();
        let block = archive.file_info(id).unwrap().block_id();

        let mut view = archive.open_entry_id(id).unwrap();
        view.resize(3).unwrap();
        assert_eq!(id, view.id());
        assert_eq!(block, archive.file_info(id).unwrap().block_id());
        assert_eq!(Some(&b"mem"[..]), archive.get("m"));
    }

    #[test]
    fn test_read_and_seek() {
        let mut archive = archive_with("f", b"0123456789");
        let mut view = archive.open_entry("f").unwrap();
        let mut buf = [0u8; 4];
        view.seek(SeekFrom::Start(3)).unwrap();
        view.read_exact(&mut buf).unwrap();
        assert_eq!(b"3456", &buf);
        view.seek(SeekFrom::End(-2)).unwrap();
        let mut rest = Vec::new();
        view.read_to_end(&mut rest).unwrap();
        assert_eq!(b"89".to_vec(), rest);
        assert!(view.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_blocks_cannot_be_opened() {
        let mut archive = Archive::new();
        archive
            .add("m", vec![1], &AddOptions::new().with_solid_block("blk"))
            .unwrap();
        assert!(archive.open_entry("blk*").is_none());
    }
}
