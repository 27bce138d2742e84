use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use lvpa_archive::{AddOptions, Archive, Encryption, Level, SaveOptions};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{open_archive, read_listfile};
use crate::PackArgs;

pub fn handle(args: &PackArgs, append: bool) -> Result<()> {
    let master_key = args.key.master_key();
    if master_key.is_none() && (args.encrypt || args.encrypt_headers) {
        bail!("Encryption needs a master key, pass one with --key");
    }

    let mut archive = if append && args.archive.exists() {
        open_archive(&args.archive, &args.key)?
    } else {
        let mut archive = Archive::new();
        if let Some(key) = &master_key {
            archive.set_master_key(key);
        }
        archive
    };

    let mut inputs = args.inputs.clone();
    if let Some(listfile) = &args.listfile {
        inputs.extend(read_listfile(listfile)?.into_iter().map(PathBuf::from));
    }
    let files = collect_files(&inputs)?;
    if files.is_empty() {
        bail!("No input files given");
    }

    let options = add_options(args);
    for file in &files {
        let name = entry_name(file, args.prefix.as_deref());
        let data =
            fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        debug!("adding {} as '{}' ({} bytes)", file.display(), name, data.len());
        archive
            .add(&name, data, &options)
            .with_context(|| format!("Failed to add {name}"))?;
    }

    let save = SaveOptions::default()
        .with_level(Level(args.header_level))
        .with_algorithm(args.header_algo.into())
        .with_encryption(args.encrypt_headers);
    archive
        .save_as(&args.archive, &save)
        .with_context(|| format!("Failed to write archive {}", args.archive.display()))?;

    info!("packed {} files into {}", files.len(), args.archive.display());
    println!(
        "{}: {} entries, {} bytes, {} stored",
        args.archive.display(),
        archive.header_count(),
        archive.real_size(),
        archive.packed_size()
    );
    Ok(())
}

fn add_options(args: &PackArgs) -> AddOptions {
    let mut options = AddOptions::new()
        .with_level(args.entry_level())
        .with_algorithm(args.entry_algorithm())
        .with_scramble(args.scramble);
    if args.encrypt {
        options = options.with_encryption(Encryption::Enabled);
    }
    if let Some(block) = &args.solid {
        options = options.with_solid_block(block.as_str());
    }
    options
}

/// Expand directories into the files below them, in a stable order
fn collect_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry
                    .with_context(|| format!("Failed to walk directory {}", input.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("Input {} does not exist", input.display());
        }
    }
    Ok(files)
}

/// Archive name of a file: relative to `prefix` when below it, with `/`
/// separators and without `.` or root components
fn entry_name(path: &Path, prefix: Option<&Path>) -> String {
    let relative = prefix
        .and_then(|prefix| path.strip_prefix(prefix).ok())
        .unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
