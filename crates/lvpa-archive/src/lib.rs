//! Reader and writer for LVPA archives
//!
//! An LVPA file holds many named entries. Each entry can be compressed on its
//! own, grouped with others into a solid block sharing one compressed stream,
//! encrypted with a master-key derived keystream, and scrambled so that only a
//! salted hash of its name is stored.
//!
//! # Components
//!
//! - **[`Archive`]**: the engine. Loads headers, resolves entries lazily,
//!   manages solid block memory and writes archives
//! - **[`ReadOnlyArchive`]**: the same engine without any way to save
//! - **[`EntryView`]**: seekable byte access to a single entry
//! - **[`format`]**: the master record and entry header layouts
//! - **[`compression`]**: the codecs behind the algorithm ids
//!
//! # Examples
//!
//! ```no_run
//! use lvpa_archive::{AddOptions, Archive, LoadMode, SaveOptions};
//!
//! let mut archive = Archive::new();
//! archive.add("readme.txt", b"hello".to_vec(), &AddOptions::new())?;
//! archive.add(
//!     "data/level1.bin",
//!     vec![0u8; 4096],
//!     &AddOptions::new().with_solid_block("levels"),
//! )?;
//! archive.save_as("game.lvpa", &SaveOptions::default())?;
//!
//! let mut loaded = Archive::open("game.lvpa", None, LoadMode::Lazy)?;
//! assert_eq!(Some(&b"hello"[..]), loaded.get("readme.txt"));
//! # Ok::<(), lvpa_archive::ArchiveError>(())
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod format;
pub mod index;
pub mod keys;
pub mod readonly;
pub mod view;

pub use error::{ArchiveError, ArchiveResult};

// Re-export commonly used types
pub use archive::{Archive, SOLID_BLOCK_SUFFIX};
pub use compression::{CompressBuffer, Compressor, compressor_for, is_supported};
pub use config::{AddOptions, LoadMode, SaveOptions};
pub use entry::{
    Algorithm, Encryption, Entry, EntryFlags, EntryHeader, EntryId, EntrySettings, Level,
};
pub use index::ArchiveIndex;
pub use keys::KeyRing;
pub use readonly::ReadOnlyArchive;
pub use view::EntryView;
