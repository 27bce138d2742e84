//! Master key handling and per-entry key derivation.

use lvpa_crypto::{Digest256, Hasher256, Hprc4Cipher, KeystreamCipher, Mt19937, hash256};
use tracing::debug;

use crate::entry::{EntryFlags, EntryHeader};
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::HEADER_CIPHER_WARMUP;

/// Smallest random warm-up, in 32-bit words
const WARMUP_MIN_WORDS: u32 = 30;
/// Random spread added to [`WARMUP_MIN_WORDS`], inclusive
const WARMUP_SPREAD_WORDS: u32 = 128;

/// Why an entry's cipher could not be set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyFailure {
    /// ENCRYPTED without a master key
    NoMasterKey,
    /// SCRAMBLED entry whose name is not known yet
    UnknownName,
    /// The known name does not hash to the stored lookup hash
    NameMismatch,
}

/// The master key and the salt derived from it.
#[derive(Clone, Default)]
pub struct KeyRing {
    master_key: Vec<u8>,
    salt: Option<Digest256>,
}

impl KeyRing {
    /// Key ring without a master key
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the master key. An empty key removes it.
    pub fn set_master_key(&mut self, key: &[u8]) {
        self.master_key = key.to_vec();
        self.salt = (!key.is_empty()).then(|| hash256(key));
    }

    /// Whether a master key is set
    pub fn has_master_key(&self) -> bool {
        !self.master_key.is_empty()
    }

    /// Lookup hash stored in place of a scrambled entry's name.
    pub fn scrambled_hash(&self, name: &str) -> Digest256 {
        let mut hasher = Hasher256::new().chain(name.as_bytes()).chain(&[0]);
        if let Some(salt) = &self.salt {
            hasher.update(salt.as_bytes());
        }
        hasher.finalize()
    }

    /// Cipher for the master record tail and the header table, already
    /// warmed up.
    pub fn header_cipher(&self) -> ArchiveResult<Hprc4Cipher> {
        if !self.has_master_key() {
            return Err(ArchiveError::MissingMasterKey);
        }
        let mut cipher = Hprc4Cipher::new(&self.master_key)?;
        cipher.warm_up(HEADER_CIPHER_WARMUP);
        Ok(cipher)
    }

    /// Cipher key of a crypted entry. `verify_hash` checks a scrambled
    /// entry's name against its stored hash; writers recompute it instead.
    fn entry_key(&self, header: &EntryHeader, verify_hash: bool) -> Result<Vec<u8>, KeyFailure> {
        if header.flags.has(EntryFlags::SCRAMBLED) {
            if header.name.is_empty() {
                return Err(KeyFailure::UnknownName);
            }
            if verify_hash && self.scrambled_hash(&header.name) != header.name_hash {
                return Err(KeyFailure::NameMismatch);
            }
            let name_key = hash256(header.name.as_bytes());
            if header.flags.has(EntryFlags::ENCRYPTED) {
                let key = Hasher256::new()
                    .chain(&self.master_key)
                    .chain(name_key.as_bytes())
                    .finalize();
                return Ok(key.as_bytes().to_vec());
            }
            return Ok(name_key.as_bytes().to_vec());
        }
        if self.has_master_key() {
            Ok(self.master_key.clone())
        } else {
            Err(KeyFailure::NoMasterKey)
        }
    }

    /// Decrypt the stored bytes of an entry in place.
    pub(crate) fn decrypt_entry(
        &self,
        header: &EntryHeader,
        buf: &mut [u8],
    ) -> Result<(), KeyFailure> {
        if !header.flags.is_crypted() {
            return Ok(());
        }
        let key = self.entry_key(header, true)?;
        apply_entry_cipher(&key, header.cipher_warmup, buf)
    }

    /// Encrypt the stored bytes of an entry in place.
    ///
    /// Picks a random warm-up when the header has none and refreshes the
    /// lookup hash of scrambled entries, both written back into `header`.
    pub(crate) fn encrypt_entry(
        &self,
        header: &mut EntryHeader,
        buf: &mut [u8],
        rng: &mut Mt19937,
    ) -> Result<(), KeyFailure> {
        if !header.flags.is_crypted() {
            return Ok(());
        }
        if header.flags.has(EntryFlags::SCRAMBLED) && !header.name.is_empty() {
            header.name_hash = self.scrambled_hash(&header.name);
        }
        let key = self.entry_key(header, false)?;
        if header.cipher_warmup == 0 {
            header.cipher_warmup = random_warmup(rng);
        }
        apply_entry_cipher(&key, header.cipher_warmup, buf)
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("has_master_key", &self.has_master_key())
            .finish_non_exhaustive()
    }
}

/// Fresh per-entry warm-up: a whole number of words in `[120, 632]` bytes.
pub(crate) fn random_warmup(rng: &mut Mt19937) -> u16 {
    let words = rng.next_u32_bounded(WARMUP_SPREAD_WORDS) + WARMUP_MIN_WORDS;
    // at most 158 words, always fits
    u16::try_from(words * 4).unwrap_or(u16::MAX)
}

fn apply_entry_cipher(key: &[u8], warmup: u16, buf: &mut [u8]) -> Result<(), KeyFailure> {
    let Ok(mut cipher) = Hprc4Cipher::new(key) else {
        debug!("entry cipher rejected its key");
        return Err(KeyFailure::NoMasterKey);
    };
    cipher.warm_up(u32::from(warmup));
    cipher.apply(buf);
    Ok(())
}
