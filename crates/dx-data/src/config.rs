//! Engine configuration and index directory layout

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default streaming chunk size: 32 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;
/// Decoded-record cache entries.
pub const DEFAULT_RECORD_CACHE: usize = 1000;
/// Position-table buffers kept in memory.
pub const DEFAULT_POSITION_CACHE: usize = 10;
/// Catalog entries kept in memory.
pub const DEFAULT_META_CACHE: usize = 20;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding `search.db`, position tables and `recent.json`.
    pub data_dir: PathBuf,

    /// Bytes read from the source per streaming chunk.
    pub chunk_size: usize,

    /// Decoded-record cache capacity (entries).
    pub record_cache_entries: usize,

    /// Position-table buffer cache capacity (files).
    pub position_cache_files: usize,

    /// Catalog metadata cache capacity (files).
    pub meta_cache_files: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            record_cache_entries: DEFAULT_RECORD_CACHE,
            position_cache_files: DEFAULT_POSITION_CACHE,
            meta_cache_files: DEFAULT_META_CACHE,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at an explicit directory, defaults elsewhere.
    pub fn with_data_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            data_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

/// Per-user data directory for the application, `indexes/` subdirectory.
pub fn default_data_dir() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(dirs::data_local_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("dx-explorer").join("indexes")
}

/// Resolves the on-disk artifact paths for the index directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create the index directory if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The relational secondary index.
    pub fn db(&self) -> PathBuf {
        self.root.join("search.db")
    }

    /// Packed 48-bit position table for one file id.
    pub fn position_table(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}.index.bin", file_id))
    }

    /// Legacy JSON catalog entry, imported into `search.db` on first access.
    pub fn legacy_meta(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", file_id))
    }

    /// Legacy JSON stats, imported into `search.db` on first access.
    pub fn legacy_stats(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}.stats.json", file_id))
    }

    pub fn recent(&self) -> PathBuf {
        self.root.join("recent.json")
    }

    /// Delete every on-disk artifact belonging to one file id.
    pub fn remove_artifacts(&self, file_id: &str) -> std::io::Result<()> {
        for path in [
            self.position_table(file_id),
            self.legacy_meta(file_id),
            self.legacy_stats(file_id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
