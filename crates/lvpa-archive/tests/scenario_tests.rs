#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end save and load scenarios
//!
//! Every scenario writes a small set of files with one combination of
//! compression, solid blocks, encryption and scrambling, reopens the archive
//! from disk and checks every file byte for byte.

use lvpa_archive::{
    AddOptions, Algorithm, Archive, Encryption, EntryFlags, Level, LoadMode, SaveOptions,
};
use lvpa_crypto::hash256;
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

fn master_key() -> Vec<u8> {
    hash256(b"All your base are belong to us.").as_bytes().to_vec()
}

/// Deterministic test payloads of different shapes
fn sample_files() -> Vec<(&'static str, Vec<u8>)> {
    let text = b"The quick brown fox jumps over the lazy dog.\n"
        .iter()
        .copied()
        .cycle()
        .take(3000)
        .collect();
    let noise = (0u32..2048)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect();
    vec![
        ("readme.txt", text),
        ("data/noise.bin", noise),
        ("data/zeros.bin", vec![0u8; 10_000]),
        ("tiny", vec![42]),
        ("empty", Vec::new()),
    ]
}

struct Scenario {
    options: AddOptions,
    save: SaveOptions,
    key: bool,
}

impl Scenario {
    fn new(options: AddOptions) -> Self {
        Self {
            options,
            save: SaveOptions::default(),
            key: false,
        }
    }

    fn with_save(mut self, save: SaveOptions) -> Self {
        self.save = save;
        self
    }

    fn with_key(mut self) -> Self {
        self.key = true;
        self
    }
}

/// Named entries, not counting solid block entries
fn file_count(archive: &Archive) -> usize {
    archive
        .entries()
        .filter(|(_, e)| !e.is_solid_block() && !e.name().is_empty())
        .count()
}

fn write_archive(path: &Path, scenario: &Scenario) {
    let mut archive = Archive::new();
    archive.random_seed(1234);
    if scenario.key {
        archive.set_master_key(&master_key());
    }
    for (name, data) in sample_files() {
        archive.add(name, data, &scenario.options).unwrap();
    }
    archive.save_as(path, &scenario.save).unwrap();
}

fn check_archive(path: &Path, scenario: &Scenario, mode: LoadMode) -> Archive {
    let key = scenario.key.then(master_key);
    let mut archive = Archive::open(path, key.as_deref(), mode).unwrap();
    for (name, data) in sample_files() {
        let got = archive
            .get(name)
            .unwrap_or_else(|| panic!("entry '{name}' is missing"));
        assert_eq!(data.as_slice(), got, "contents of '{name}'");
    }
    assert!(archive.all_good());
    assert_eq!(sample_files().len(), file_count(&archive));
    archive
}

fn run(scenario: &Scenario) -> Archive {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.lvpa");
    write_archive(&path, scenario);
    check_archive(&path, scenario, LoadMode::Solid);
    check_archive(&path, scenario, LoadMode::All);
    check_archive(&path, scenario, LoadMode::Lazy)
}

#[test]
fn test_uncompressed() {
    let scenario = Scenario::new(AddOptions::new().with_level(Level::NONE));
    let archive = run(&scenario);
    for (_, entry) in archive.entries() {
        assert!(!entry.flags().has(EntryFlags::PACKED));
        assert_eq!(entry.real_size(), entry.packed_size());
    }
}

#[test]
fn test_lzma() {
    let scenario = Scenario::new(
        AddOptions::new()
            .with_algorithm(Algorithm::Lzma)
            .with_level(Level::ULTRA),
    );
    let mut archive = run(&scenario);
    let id = archive.get_id("data/zeros.bin").unwrap();
    let entry = archive.file_info(id).unwrap();
    assert!(entry.flags().has(EntryFlags::PACKED));
    assert_eq!(Algorithm::Lzma, entry.header.algorithm);
    assert!(entry.packed_size() < entry.real_size());
}

#[test]
fn test_deflate() {
    let scenario = Scenario::new(AddOptions::new().with_algorithm(Algorithm::Deflate));
    let mut archive = run(&scenario);
    let id = archive.get_id("readme.txt").unwrap();
    assert_eq!(Algorithm::Deflate, archive.file_info(id).unwrap().header.algorithm);
}

#[test]
fn test_solid_with_empty_block_name() {
    let scenario = Scenario::new(AddOptions::new().with_solid_block(""));
    let mut archive = run(&scenario);
    let block = archive.get_id("*").unwrap();
    assert!(archive.file_info(block).unwrap().is_solid_block());
    for (name, _) in sample_files() {
        let id = archive.get_id(name).unwrap();
        assert_eq!(Some(block), archive.file_info(id).unwrap().block_id());
    }
}

#[test]
fn test_mixed_solid_and_plain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mixed.lvpa");

    let mut archive = Archive::new();
    for (i, (name, data)) in sample_files().into_iter().enumerate() {
        let options = match i % 3 {
            0 => AddOptions::new().with_solid_block("first"),
            1 => AddOptions::new().with_solid_block("second"),
            _ => AddOptions::new(),
        };
        archive.add(name, data, &options).unwrap();
    }
    archive
        .set_solid_block("first", Level::FAST, Algorithm::Deflate)
        .unwrap();
    archive.save_as(&path, &SaveOptions::default()).unwrap();

    let mut loaded = Archive::open(&path, None, LoadMode::Lazy).unwrap();
    for (name, data) in sample_files() {
        assert_eq!(Some(data.as_slice()), loaded.get(name), "contents of '{name}'");
    }
    let first = loaded.get_id("first*").unwrap();
    assert_eq!(Algorithm::Deflate, loaded.file_info(first).unwrap().header.algorithm);
    let second = loaded.get_id("second*").unwrap();
    let readme = loaded.get_id("readme.txt").unwrap();
    let noise = loaded.get_id("data/noise.bin").unwrap();
    assert_eq!(Some(first), loaded.file_info(readme).unwrap().block_id());
    assert_eq!(Some(second), loaded.file_info(noise).unwrap().block_id());
}

#[test]
fn test_encrypted() {
    let scenario = Scenario::new(AddOptions::new().with_encryption(Encryption::Enabled)).with_key();
    let mut archive = run(&scenario);
    let id = archive.get_id("readme.txt").unwrap();
    let entry = archive.file_info(id).unwrap();
    assert!(entry.flags().has(EntryFlags::ENCRYPTED));
    assert_ne!(0, entry.header.cipher_warmup);
}

#[test]
fn test_encrypted_headers() {
    let scenario = Scenario::new(AddOptions::new())
        .with_save(SaveOptions::default().with_encryption(true))
        .with_key();
    let mut archive = run(&scenario);
    let id = archive.get_id("tiny").unwrap();
    assert!(archive.file_info(id).unwrap().flags().has(EntryFlags::ENCRYPTED));
}

#[test]
fn test_scrambled() {
    let scenario = Scenario::new(AddOptions::new().with_scramble(true));
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scrambled.lvpa");
    write_archive(&path, &scenario);

    let bytes = std::fs::read(&path).unwrap();
    let needle = b"data/noise.bin";
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));

    let mut archive = Archive::open(&path, None, LoadMode::Lazy).unwrap();
    assert_eq!(0, archive.count());
    assert_eq!(0, file_count(&archive));
    for (name, data) in sample_files() {
        assert_eq!(Some(data.as_slice()), archive.get(name), "contents of '{name}'");
    }
    assert_eq!(sample_files().len(), archive.count());
}

#[test]
fn test_encrypted_and_scrambled() {
    let scenario = Scenario::new(
        AddOptions::new()
            .with_encryption(Encryption::Enabled)
            .with_scramble(true),
    )
    .with_key();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("both.lvpa");
    write_archive(&path, &scenario);
    check_archive(&path, &scenario, LoadMode::Lazy);
}

#[test]
fn test_compressed_encrypted_scrambled() {
    let scenario = Scenario::new(
        AddOptions::new()
            .with_algorithm(Algorithm::Lzma)
            .with_level(Level::GOOD)
            .with_encryption(Encryption::Enabled)
            .with_scramble(true),
    )
    .with_key();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("all-three.lvpa");
    write_archive(&path, &scenario);
    check_archive(&path, &scenario, LoadMode::Lazy);
}

#[test]
fn test_everything() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("everything.lvpa");
    let key = master_key();

    let mut archive = Archive::new();
    archive.set_master_key(&key);
    for (i, (name, data)) in sample_files().into_iter().enumerate() {
        let options = match i % 4 {
            0 => AddOptions::new()
                .with_solid_block("solid")
                .with_encryption(Encryption::Enabled),
            1 => AddOptions::new().with_scramble(true),
            2 => AddOptions::new()
                .with_encryption(Encryption::None)
                .with_algorithm(Algorithm::Deflate),
            _ => AddOptions::new().with_scramble(true).with_level(Level::NONE),
        };
        archive.add(name, data, &options).unwrap();
    }
    let save = SaveOptions::default()
        .with_encryption(true)
        .with_algorithm(Algorithm::Lzma)
        .with_level(Level::BETTER);
    archive.save_as(&path, &save).unwrap();

    let scenario = Scenario::new(AddOptions::new()).with_key();
    check_archive(&path, &scenario, LoadMode::Lazy);
    check_archive(&path, &scenario, LoadMode::All);

    let mut loaded = Archive::open(&path, Some(&key), LoadMode::Lazy).unwrap();
    let block = loaded.get_id("solid*").unwrap();
    assert!(loaded.file_info(block).unwrap().flags().has(EntryFlags::ENCRYPTED));
    let plain = loaded.get_id("data/zeros.bin").unwrap();
    assert!(!loaded.file_info(plain).unwrap().flags().has(EntryFlags::ENCRYPTED));
}

#[test]
fn test_create_and_append() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.lvpa");
    let files = sample_files();

    let mut archive = Archive::new();
    archive
        .add(files[0].0, files[0].1.clone(), &AddOptions::new())
        .unwrap();
    archive.save_as(&path, &SaveOptions::default()).unwrap();

    for (step, (name, data)) in files.iter().enumerate().skip(1) {
        let mut archive = Archive::open(&path, None, LoadMode::Lazy).unwrap();
        let options = if step % 2 == 0 {
            AddOptions::new().with_solid_block("grow")
        } else {
            AddOptions::new()
        };
        archive.add(name, data.clone(), &options).unwrap();
        archive.save(&SaveOptions::default()).unwrap();

        let mut reopened = Archive::open(&path, None, LoadMode::Lazy).unwrap();
        assert_eq!(step + 1, file_count(&reopened));
        for (name, data) in &files[..=step] {
            assert_eq!(Some(data.as_slice()), reopened.get(name), "after step {step}");
        }
    }
}

#[test]
fn test_save_twice_from_same_handle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("twice.lvpa");

    let mut archive = Archive::new();
    archive
        .add("a", b"first".to_vec(), &AddOptions::new().with_solid_block("s"))
        .unwrap();
    archive.add("b", b"second".to_vec(), &AddOptions::new()).unwrap();
    archive.save_as(&path, &SaveOptions::default()).unwrap();

    archive.add("c", b"third".to_vec(), &AddOptions::new()).unwrap();
    assert!(archive.free("b"));
    archive.save(&SaveOptions::default()).unwrap();

    let mut loaded = Archive::open(&path, None, LoadMode::Lazy).unwrap();
    assert_eq!(Some(&b"first"[..]), loaded.get("a"));
    assert_eq!(Some(&b"second"[..]), loaded.get("b"));
    assert_eq!(Some(&b"third"[..]), loaded.get("c"));
}

#[test]
fn test_deleted_entries_are_not_written() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deleted.lvpa");

    let mut archive = Archive::new();
    archive.add("keep", b"kept".to_vec(), &AddOptions::new()).unwrap();
    archive
        .add("gone", b"gone".to_vec(), &AddOptions::new().with_solid_block("blk"))
        .unwrap();
    assert!(archive.delete("gone"));
    archive.save_as(&path, &SaveOptions::default()).unwrap();

    let mut loaded = Archive::open(&path, None, LoadMode::Lazy).unwrap();
    assert_eq!(1, loaded.header_count());
    assert_eq!(None, loaded.get_id("gone"));
    assert_eq!(None, loaded.get_id("blk*"));
    assert_eq!(Some(&b"kept"[..]), loaded.get("keep"));
}
