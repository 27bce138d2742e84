use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, error};

use super::{open_archive, resolve_listfile};
use crate::KeyArgs;

pub fn handle(
    archive_path: &Path,
    names: &[String],
    out: &Path,
    listfile: Option<&Path>,
    key: &KeyArgs,
) -> Result<()> {
    let mut archive = open_archive(archive_path, key)?;
    resolve_listfile(&mut archive, listfile)?;

    let names: Vec<String> = if names.is_empty() {
        archive
            .entries()
            .filter(|(_, e)| !e.is_solid_block() && !e.name().is_empty())
            .map(|(_, e)| e.name().to_string())
            .collect()
    } else {
        names.to_vec()
    };

    let mut failed = 0usize;
    for name in &names {
        let Some(target) = output_path(out, name) else {
            error!("refusing to extract '{}': not a relative path", name);
            failed += 1;
            continue;
        };
        let Some(data) = archive.get(name) else {
            error!("unable to read '{}'", name);
            failed += 1;
            continue;
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(&target, data)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        debug!("extracted '{}' to {}", name, target.display());
        archive.drop_data(name);
        archive.free_unused();
    }

    println!("{} of {} entries extracted", names.len() - failed, names.len());
    if failed > 0 {
        bail!("{failed} entries could not be extracted");
    }
    Ok(())
}

/// Target path of an entry below `out`; `None` for names that would
/// escape it
fn output_path(out: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let mut target = out.to_path_buf();
    let mut parts = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                target.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (parts > 0).then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_output_path() {
        let out = Path::new("out");
        assert_eq!(Some(PathBuf::from("out/a/b.txt")), output_path(out, "a/b.txt"));
        assert_eq!(Some(PathBuf::from("out/c")), output_path(out, "./c"));
        assert_eq!(None, output_path(out, "../escape"));
        assert_eq!(None, output_path(out, "/etc/passwd"));
        assert_eq!(None, output_path(out, ""));
    }
}
