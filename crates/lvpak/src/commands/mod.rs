pub mod extract;
pub mod list;
pub mod pack;
pub mod verify;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lvpa_archive::{Archive, LoadMode};
use tracing::debug;

use crate::KeyArgs;

/// Open an archive lazily with the key from the command line
pub fn open_archive(path: &Path, key: &KeyArgs) -> Result<Archive> {
    let master_key = key.master_key();
    Archive::open(path, master_key.as_deref(), LoadMode::Lazy)
        .with_context(|| format!("Failed to open archive {}", path.display()))
}

/// Non-empty, trimmed lines of a list file
pub fn read_listfile(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read list file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Look up every name of a list file so scrambled entries get their names
/// back. Returns how many names matched an entry.
pub fn resolve_listfile(archive: &mut Archive, listfile: Option<&Path>) -> Result<usize> {
    let Some(path) = listfile else {
        return Ok(0);
    };
    let names = read_listfile(path)?;
    let found = names
        .iter()
        .filter(|name| archive.get_id(name).is_some())
        .count();
    debug!("{} of {} list file names found in the archive", found, names.len());
    Ok(found)
}
