//! Options for loading, adding and saving

use crate::entry::{Algorithm, Encryption, EntrySettings, Level};

/// How much of an archive is read into memory by `load_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Read only the headers; entries are resolved on first access
    #[default]
    Lazy,
    /// Also resolve every solid member, and with it every solid block
    Solid,
    /// Resolve every entry whose name is known, then close the file
    All,
}

/// Global settings of a save call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Level for entries and headers left at `Inherit`
    pub level: Level,

    /// Algorithm for entries and headers left at `Inherit`
    pub algorithm: Algorithm,

    /// Encrypt headers and entries left at `Encryption::Inherit`
    pub encrypt: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            level: Level::NORMAL,
            algorithm: Algorithm::Inherit,
            encrypt: false,
        }
    }
}

impl SaveOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default compression level
    #[must_use]
    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the default algorithm
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Enable or disable encryption
    #[must_use]
    pub const fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }
}

/// Per-entry settings of an add call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOptions {
    /// Put the entry into this solid block; `None` stores it on its own
    pub solid_block: Option<String>,

    /// Compression algorithm
    pub algorithm: Algorithm,

    /// Compression level
    pub level: Level,

    /// Encryption request
    pub encryption: Encryption,

    /// Store only a salted hash of the name
    pub scramble: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            solid_block: None,
            algorithm: Algorithm::Inherit,
            level: Level::INHERIT,
            encryption: Encryption::Inherit,
            scramble: false,
        }
    }
}

impl AddOptions {
    /// Everything inherited, no block, not scrambled
    pub fn new() -> Self {
        Self::default()
    }

    /// Store inside a solid block
    #[must_use]
    pub fn with_solid_block(mut self, block: impl Into<String>) -> Self {
        self.solid_block = Some(block.into());
        self
    }

    /// Set the algorithm
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the level
    #[must_use]
    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the encryption request
    #[must_use]
    pub const fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Enable or disable name scrambling
    #[must_use]
    pub const fn with_scramble(mut self, scramble: bool) -> Self {
        self.scramble = scramble;
        self
    }

    pub(crate) const fn settings(&self) -> EntrySettings {
        EntrySettings {
            algorithm: self.algorithm,
            level: self.level,
            encryption: self.encryption,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let save = SaveOptions::default();
        assert_eq!(Level::NORMAL, save.level);
        assert_eq!(Algorithm::Inherit, save.algorithm);
        assert!(!save.encrypt);

        let add = AddOptions::new();
        assert_eq!(None, add.solid_block);
        assert!(add.level.is_inherit());
        assert_eq!(Algorithm::Inherit, add.algorithm);
        assert_eq!(Encryption::Inherit, add.encryption);
        assert_eq!(LoadMode::Lazy, LoadMode::default());
    }

    #[test]
    fn test_builders() {
        let add = AddOptions::new()
            .with_solid_block("blk")
            .with_level(Level::ULTRA)
            .with_scramble(true);
        assert_eq!(Some("blk"), add.solid_block.as_deref());
        assert_eq!(Level::ULTRA, add.settings().level);
        assert!(add.scramble);

        let save = SaveOptions::new()
            .with_algorithm(Algorithm::Deflate)
            .with_encryption(true);
        assert_eq!(Algorithm::Deflate, save.algorithm);
        assert!(save.encrypt);
    }
}
