//! Process-lifetime LRU caches for the read path
//!
//! Three caches back the record reader: catalog metadata, loaded position
//! tables, and decoded records. Record entries are keyed by
//! `(file_id, generation, row_index)`; invalidating a file bumps its
//! generation, which orphans the old entries in O(1) and lets the LRU age
//! them out.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ahash::AHashMap;
use lru::LruCache;
use parking_lot::Mutex;

use dx_core::types::{CatalogEntry, RecordMap};

use crate::postable::PositionTable;

pub struct EngineCaches {
    meta: Mutex<LruCache<String, Arc<CatalogEntry>>>,
    positions: Mutex<LruCache<String, Arc<PositionTable>>>,
    records: Mutex<LruCache<RecordKey, Arc<RecordMap>>>,
    generations: Mutex<AHashMap<String, u64>>,
}

type RecordKey = (String, u64, u64);

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).unwrap_or(NonZeroUsize::MIN)
}

impl EngineCaches {
    pub fn new(meta_files: usize, position_files: usize, record_entries: usize) -> Self {
        Self {
            meta: Mutex::new(LruCache::new(capacity(meta_files))),
            positions: Mutex::new(LruCache::new(capacity(position_files))),
            records: Mutex::new(LruCache::new(capacity(record_entries))),
            generations: Mutex::new(AHashMap::new()),
        }
    }

    pub fn meta_get(&self, file_id: &str) -> Option<Arc<CatalogEntry>> {
        self.meta.lock().get(file_id).cloned()
    }

    pub fn meta_put(&self, entry: Arc<CatalogEntry>) {
        self.meta.lock().put(entry.file_id.clone(), entry);
    }

    pub fn positions_get(&self, file_id: &str) -> Option<Arc<PositionTable>> {
        self.positions.lock().get(file_id).cloned()
    }

    pub fn positions_put(&self, file_id: &str, table: Arc<PositionTable>) {
        self.positions.lock().put(file_id.to_string(), table);
    }

    pub fn record_get(&self, file_id: &str, row_index: u64) -> Option<Arc<RecordMap>> {
        let generation = self.generation(file_id);
        self.records
            .lock()
            .get(&(file_id.to_string(), generation, row_index))
            .cloned()
    }

    pub fn record_put(&self, file_id: &str, row_index: u64, record: Arc<RecordMap>) {
        let generation = self.generation(file_id);
        self.records
            .lock()
            .put((file_id.to_string(), generation, row_index), record);
    }

    /// Drop everything cached for one file id.
    pub fn invalidate(&self, file_id: &str) {
        self.meta.lock().pop(file_id);
        self.positions.lock().pop(file_id);
        *self.generations.lock().entry(file_id.to_string()).or_insert(0) += 1;
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.meta.lock().clear();
        self.positions.lock().clear();
        self.records.lock().clear();
        self.generations.lock().clear();
    }

    fn generation(&self, file_id: &str) -> u64 {
        self.generations.lock().get(file_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::types::{DataValue, FileFormat};

    fn entry(file_id: &str) -> Arc<CatalogEntry> {
        Arc::new(CatalogEntry {
            file_id: file_id.to_string(),
            path: String::new(),
            name: String::new(),
            size: 0,
            format: FileFormat::Csv,
            delimiter: None,
            indexed_at: 0,
            total_records: 0,
            columns: Vec::new(),
            searchable_columns: Vec::new(),
            indexed: true,
        })
    }

    fn record(marker: i64) -> Arc<RecordMap> {
        let mut map = RecordMap::new();
        map.insert("_index".to_string(), DataValue::Int(marker));
        Arc::new(map)
    }

    #[test]
    fn test_meta_lru_evicts_oldest() {
        let caches = EngineCaches::new(2, 2, 2);
        caches.meta_put(entry("a000000000000000"));
        caches.meta_put(entry("b000000000000000"));
        caches.meta_get("a000000000000000");
        caches.meta_put(entry("c000000000000000"));
        assert!(caches.meta_get("a000000000000000").is_some());
        assert!(caches.meta_get("b000000000000000").is_none());
    }

    #[test]
    fn test_record_invalidation_by_generation() {
        let caches = EngineCaches::new(4, 4, 16);
        caches.record_put("a000000000000000", 0, record(1));
        caches.record_put("b000000000000000", 0, record(2));
        assert!(caches.record_get("a000000000000000", 0).is_some());

        caches.invalidate("a000000000000000");
        assert!(caches.record_get("a000000000000000", 0).is_none());
        // Other files are untouched
        assert!(caches.record_get("b000000000000000", 0).is_some());

        // A re-populated entry under the new generation is visible
        caches.record_put("a000000000000000", 0, record(3));
        assert!(caches.record_get("a000000000000000", 0).is_some());
    }

    #[test]
    fn test_invalidate_all() {
        let caches = EngineCaches::new(4, 4, 4);
        caches.meta_put(entry("a000000000000000"));
        caches.record_put("a000000000000000", 1, record(1));
        caches.invalidate_all();
        assert!(caches.meta_get("a000000000000000").is_none());
        assert!(caches.record_get("a000000000000000", 1).is_none());
    }
}
