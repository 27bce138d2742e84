use std::path::Path;

use anyhow::{Result, bail};
use lvpa_archive::{Archive, EntryId};
use tracing::warn;

use super::{open_archive, resolve_listfile};
use crate::KeyArgs;

/// Counts from a full read of an archive
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub ok: usize,
    pub failed: Vec<String>,
    /// Scrambled entries whose name is not known
    pub unnamed: usize,
}

pub fn handle(archive_path: &Path, listfile: Option<&Path>, key: &KeyArgs) -> Result<()> {
    let mut archive = open_archive(archive_path, key)?;
    resolve_listfile(&mut archive, listfile)?;

    let report = verify_all(&mut archive);
    for name in &report.failed {
        println!("FAILED  {name}");
    }
    if report.unnamed > 0 {
        println!("{} scrambled entries skipped, their names are unknown", report.unnamed);
    }

    if report.failed.is_empty() && archive.all_good() {
        println!("{}: OK, {} entries checked", archive_path.display(), report.ok);
        Ok(())
    } else {
        bail!(
            "{}: {} of {} entries are damaged or unreadable",
            archive_path.display(),
            report.failed.len(),
            report.ok + report.failed.len()
        )
    }
}

/// Read every named entry with checksum verification, releasing memory as
/// it goes.
pub fn verify_all(archive: &mut Archive) -> VerifyReport {
    let ids: Vec<(EntryId, String)> = archive
        .entries()
        .filter(|(_, e)| !e.is_solid_block())
        .map(|(id, e)| (id, e.name().to_string()))
        .collect();

    let mut report = VerifyReport::default();
    for (id, name) in ids {
        if name.is_empty() {
            report.unnamed += 1;
            continue;
        }
        if archive.get_by_id(id, true).is_some() {
            report.ok += 1;
        } else {
            warn!("entry {} '{}' failed verification", id, name);
            report.failed.push(name);
        }
        archive.drop_id(id);
        archive.free_unused();
    }
    report
}
