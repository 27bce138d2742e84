use std::path::Path;

use anyhow::Result;
use lvpa_archive::{Algorithm, Entry, EntryFlags, EntryId};

use super::{open_archive, resolve_listfile};
use crate::KeyArgs;

pub fn handle(archive_path: &Path, listfile: Option<&Path>, key: &KeyArgs) -> Result<()> {
    let mut archive = open_archive(archive_path, key)?;
    resolve_listfile(&mut archive, listfile)?;

    println!(
        "{:<5} {:<5} {:<7} {:>3} {:>10} {:>10} {:>7}  Name",
        "Id", "Flags", "Algo", "Lvl", "Size", "Packed", "Ratio"
    );
    for (id, entry) in archive.entries() {
        println!("{}", format_entry(id, entry));
    }
    println!(
        "{} entries, {} bytes, {} stored",
        archive.header_count(),
        archive.real_size(),
        archive.packed_size()
    );
    Ok(())
}

fn display_name(id: EntryId, entry: &Entry) -> String {
    if entry.name().is_empty() {
        format!("<scrambled #{id}>")
    } else if let Some(block) = entry.block_id() {
        format!("{} [block {}]", entry.name(), block)
    } else {
        entry.name().to_string()
    }
}

fn format_entry(id: EntryId, entry: &Entry) -> String {
    let algorithm = if entry.flags().has(EntryFlags::PACKED) {
        entry.header.algorithm
    } else {
        Algorithm::None
    };
    format!(
        "{:<5} {:<5} {:<7} {:>3} {:>10} {:>10} {:>6.1}%  {}",
        id,
        entry.flags(),
        algorithm.name(),
        entry.header.level,
        entry.real_size(),
        entry.packed_size(),
        entry.ratio(),
        display_name(id, entry)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, flags: u8, block_id: EntryId) -> Entry {
        let mut entry = Entry::default();
        entry.header.name = name.to_string();
        entry.header.flags = EntryFlags::new(flags);
        entry.header.block_id = block_id;
        entry
    }

    #[test]
    fn test_display_name() {
        assert_eq!("<scrambled #4>", display_name(4, &entry("", EntryFlags::SCRAMBLED, 0)));
        assert_eq!("a/b", display_name(1, &entry("a/b", 0, 0)));
        assert_eq!("m [block 2]", display_name(0, &entry("m", EntryFlags::SOLID, 2)));
    }

    #[test]
    fn test_format_entry_columns() {
        let mut stored = entry("file.txt", EntryFlags::PACKED, 0);
        stored.header.algorithm = Algorithm::Lzma;
        stored.header.real_size = 200;
        stored.header.packed_size = 50;
        let line = format_entry(7, &stored);
        assert!(line.starts_with("7     P---- LZMA"), "{line}");
        assert!(line.contains(" 25.0%"), "{line}");
        assert!(line.ends_with("file.txt"), "{line}");
    }
}
