//! Recently opened files, persisted as `recent.json`
//!
//! Bounded, most-recent-first, deduplicated by file id. Not part of query
//! correctness; a damaged file just resets the list.

use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use dx_core::types::CatalogEntry;

use crate::DataError;

pub const MAX_RECENT: usize = 20;

pub struct RecentList {
    path: PathBuf,
    entries: Mutex<Vec<CatalogEntry>>,
}

impl RecentList {
    /// Load the persisted list, tolerating a missing or unreadable file.
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "recent list unreadable, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn list(&self) -> Vec<CatalogEntry> {
        self.entries.lock().clone()
    }

    /// Move or insert an entry at the front.
    pub fn push(&self, entry: CatalogEntry) -> Result<(), DataError> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.file_id != entry.file_id);
        entries.insert(0, entry);
        entries.truncate(MAX_RECENT);
        self.save(&entries)
    }

    pub fn remove(&self, file_id: &str) -> Result<(), DataError> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.file_id != file_id);
        self.save(&entries)
    }

    pub fn clear(&self) -> Result<(), DataError> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.save(&entries)
    }

    fn save(&self, entries: &[CatalogEntry]) -> Result<(), DataError> {
        let json = serde_json::to_string(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
