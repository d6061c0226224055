//! Legacy artifact migration and stale-entry purge
//!
//! Earlier releases kept one `{id}.meta.json` / `{id}.stats.json` pair per
//! file next to the position table. On startup those are imported into
//! `search.db`; conversely, any store row whose position table vanished is
//! stale and gets purged.

use tracing::{info, warn};

use dx_core::types::{CatalogEntry, FileStats};

use crate::config::IndexPaths;
use crate::store::SearchStore;
use crate::DataError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub imported: usize,
    pub purged: usize,
}

/// Run both passes. Unreadable legacy files are skipped with a warning;
/// they were never load-bearing.
pub fn migrate(store: &SearchStore, paths: &IndexPaths) -> Result<MigrationReport, DataError> {
    let mut report = MigrationReport::default();
    report.imported = import_legacy(store, paths)?;
    report.purged = purge_stale(store, paths)?;
    if report.imported > 0 || report.purged > 0 {
        info!(
            imported = report.imported,
            purged = report.purged,
            "index migration finished"
        );
    }
    Ok(report)
}

fn import_legacy(store: &SearchStore, paths: &IndexPaths) -> Result<usize, DataError> {
    let mut imported = 0;
    let entries = match std::fs::read_dir(paths.root()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    for dir_entry in entries {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        let Some(file_id) = name.to_str().and_then(|n| n.strip_suffix(".meta.json")) else {
            continue;
        };
        if store.has_file(file_id)? {
            continue;
        }
        // An entry without its position table is unusable; the purge pass
        // would delete it right back
        if !paths.position_table(file_id).exists() {
            continue;
        }
        let raw = std::fs::read_to_string(dir_entry.path())?;
        let entry: CatalogEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file_id, error = %e, "skipping unreadable legacy catalog entry");
                continue;
            }
        };
        store.catalog_put(&entry)?;
        if let Ok(raw) = std::fs::read_to_string(paths.legacy_stats(file_id)) {
            if let Ok(stats) = serde_json::from_str::<FileStats>(&raw) {
                store.stats_put(&stats)?;
            }
        }
        info!(file_id, "imported legacy catalog entry");
        imported += 1;
    }
    Ok(imported)
}

fn purge_stale(store: &SearchStore, paths: &IndexPaths) -> Result<usize, DataError> {
    let mut purged = 0;
    for entry in store.catalog_list()? {
        if paths.position_table(&entry.file_id).exists() {
            continue;
        }
        warn!(file_id = %entry.file_id, "purging catalog entry without a position table");
        store.remove_file(&entry.file_id)?;
        paths.remove_artifacts(&entry.file_id)?;
        purged += 1;
    }
    Ok(purged)
}
