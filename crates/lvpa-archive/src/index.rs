//! Name to entry id lookup.

use std::collections::HashMap;

use crate::entry::{Entry, EntryFlags, EntryId};

/// Maps known entry names to their ids.
///
/// Scrambled entries stay out of the index until a lookup resolves their
/// name through the stored hash.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    names: HashMap<String, EntryId>,
}

impl ArchiveIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every live entry with a known name.
    pub fn rebuild(&mut self, entries: &[Entry]) {
        self.names.clear();
        for (id, entry) in (0..).zip(entries) {
            let unresolved = entry.flags().has(EntryFlags::SCRAMBLED) && entry.name().is_empty();
            if !unresolved && !entry.removed {
                self.names.insert(entry.name().to_string(), id);
            }
        }
    }

    /// Look up an id
    pub fn get(&self, name: &str) -> Option<EntryId> {
        self.names.get(name).copied()
    }

    /// Add or replace a mapping
    pub fn insert(&mut self, name: impl Into<String>, id: EntryId) {
        self.names.insert(name.into(), id);
    }

    /// Remove a mapping, returning the id it pointed to
    pub fn remove(&mut self, name: &str) -> Option<EntryId> {
        self.names.remove(name)
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Number of indexed names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Indexed names in arbitrary order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_skips_unresolved_scrambled() {
        let entries = vec![
            Entry::new("a".to_string(), EntryFlags::default()),
            Entry::new(String::new(), EntryFlags::new(EntryFlags::SCRAMBLED)),
            Entry::new("c".to_string(), EntryFlags::new(EntryFlags::SCRAMBLED)),
        ];
        let mut index = ArchiveIndex::new();
        index.rebuild(&entries);
        assert_eq!(2, index.len());
        assert_eq!(Some(0), index.get("a"));
        assert_eq!(Some(2), index.get("c"));
        assert_eq!(None, index.get(""));
    }

    #[test]
    fn test_insert_remove() {
        let mut index = ArchiveIndex::new();
        index.insert("x", 4);
        assert_eq!(Some(4), index.remove("x"));
        assert!(index.is_empty());
    }
}
