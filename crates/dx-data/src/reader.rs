//! Random-access record reader
//!
//! Given a file id and row index, seeks the source file to the recorded
//! byte offset and decodes exactly one record. Catalog metadata, position
//! tables and decoded records sit behind the engine's LRU caches; source
//! files keep one pooled handle per file id.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::warn;

use dx_core::types::{CatalogEntry, DataValue, FileFormat, RecordMap};

use crate::cache::EngineCaches;
use crate::config::IndexPaths;
use crate::sources::json_array::object_end;
use crate::sources::csv;
use crate::sources::vcard::{fold_property, parse_property, unfold, VCARD_COLUMNS};
use crate::store::SearchStore;
use crate::DataError;

/// Assumed record span when the position table has no next entry.
const FALLBACK_SPAN: u64 = 16_384;
/// Slack past the hinted end; decoding stops at the record's end marker.
const OVER_READ: u64 = 500;
/// Hard cap on a single record read.
const MAX_READ: u64 = 32_768;

pub struct RecordReader {
    paths: IndexPaths,
    store: Arc<SearchStore>,
    caches: Arc<EngineCaches>,
    handles: Mutex<AHashMap<String, Arc<Mutex<File>>>>,
}

impl RecordReader {
    pub fn new(paths: IndexPaths, store: Arc<SearchStore>, caches: Arc<EngineCaches>) -> Self {
        Self {
            paths,
            store,
            caches,
            handles: Mutex::new(AHashMap::new()),
        }
    }

    /// Read and decode one record. `Ok(None)` means the bytes could not be
    /// read or decoded (the caller renders a placeholder); errors are
    /// reserved for unknown ids and stale indexes.
    pub async fn read(
        &self,
        file_id: &str,
        row_index: u64,
    ) -> Result<Option<RecordMap>, DataError> {
        if let Some(hit) = self.caches.record_get(file_id, row_index) {
            return Ok(Some((*hit).clone()));
        }

        let entry = self.entry(file_id).await?;
        if row_index >= entry.total_records {
            return Err(DataError::Other(format!(
                "row index {} out of range for '{}'",
                row_index, file_id
            )));
        }
        let table = self.positions(file_id, &entry).await?;
        let start = table.get(row_index).ok_or_else(|| DataError::Stale {
            file_id: file_id.to_string(),
            reason: "position table shorter than catalog".to_string(),
        })?;
        let end_hint = table.get(row_index + 1).unwrap_or(start + FALLBACK_SPAN);
        let len = (end_hint.saturating_sub(start) + OVER_READ).min(MAX_READ) as usize;

        let handle = match self.handle(file_id, &entry.path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(file_id, error = %e, "source file unavailable");
                return Ok(None);
            }
        };
        let buf = match tokio::task::spawn_blocking(move || read_span(&handle, start, len)).await? {
            Ok(buf) => buf,
            Err(e) => {
                warn!(file_id, row_index, error = %e, "record read failed");
                return Ok(None);
            }
        };

        let Some(mut record) = decode_record(&entry, &buf) else {
            return Ok(None);
        };
        record.insert("_index".to_string(), DataValue::Int(row_index as i64));
        let record = Arc::new(record);
        self.caches.record_put(file_id, row_index, record.clone());
        Ok(Some((*record).clone()))
    }

    /// Catalog metadata for the id, via the metadata cache.
    pub async fn entry(&self, file_id: &str) -> Result<Arc<CatalogEntry>, DataError> {
        if let Some(hit) = self.caches.meta_get(file_id) {
            return Ok(hit);
        }
        let store = self.store.clone();
        let id = file_id.to_string();
        let entry = tokio::task::spawn_blocking(move || store.catalog_get(&id)).await??;
        let entry = Arc::new(entry.ok_or_else(|| DataError::UnknownFile(file_id.to_string()))?);
        self.caches.meta_put(entry.clone());
        Ok(entry)
    }

    /// Loaded position table for the id, via the position cache. A missing
    /// or disagreeing table marks the whole id stale.
    pub async fn positions(
        &self,
        file_id: &str,
        entry: &CatalogEntry,
    ) -> Result<Arc<crate::postable::PositionTable>, DataError> {
        if let Some(hit) = self.caches.positions_get(file_id) {
            return Ok(hit);
        }
        let path = self.paths.position_table(file_id);
        let loaded = tokio::task::spawn_blocking(move || crate::postable::PositionTable::load(&path))
            .await?;
        let table = match loaded {
            Ok(table) => table,
            Err(DataError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DataError::Stale {
                    file_id: file_id.to_string(),
                    reason: "position table missing".to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        if table.len() != entry.total_records {
            return Err(DataError::Stale {
                file_id: file_id.to_string(),
                reason: format!(
                    "position table has {} entries, catalog says {}",
                    table.len(),
                    entry.total_records
                ),
            });
        }
        let table = Arc::new(table);
        self.caches.positions_put(file_id, table.clone());
        Ok(table)
    }

    /// Drop the pooled source handle for one file id.
    pub fn drop_handle(&self, file_id: &str) {
        self.handles.lock().remove(file_id);
    }

    pub fn drop_all_handles(&self) {
        self.handles.lock().clear();
    }

    fn handle(&self, file_id: &str, path: &str) -> std::io::Result<Arc<Mutex<File>>> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(file_id) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(Mutex::new(File::open(path)?));
        handles.insert(file_id.to_string(), handle.clone());
        Ok(handle)
    }
}

fn read_span(file: &Mutex<File>, start: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut file = file.lock();
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Decode one record's bytes according to the file's format.
fn decode_record(entry: &CatalogEntry, buf: &[u8]) -> Option<RecordMap> {
    match entry.format {
        FileFormat::Csv => decode_csv(entry, buf),
        FileFormat::Ndjson => {
            let line = first_line(buf);
            decode_json_object(entry, line)
        }
        FileFormat::JsonArray => {
            let end = object_end(buf)?;
            decode_json_object(entry, &buf[..=end])
        }
        FileFormat::Vcf => decode_vcard(buf),
    }
}

fn first_line(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let mut line = &buf[..end];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    line
}

fn decode_csv(entry: &CatalogEntry, buf: &[u8]) -> Option<RecordMap> {
    let delimiter = entry
        .delimiter
        .as_deref()
        .and_then(|d| d.chars().next())
        .unwrap_or(',');
    let line = String::from_utf8_lossy(first_line(buf));
    let fields = csv::parse_line(&line, delimiter)?;
    let mut record = RecordMap::new();
    for (column, value) in entry.columns.iter().zip(fields) {
        record.insert(column.clone(), DataValue::Str(value));
    }
    Some(record)
}

fn decode_json_object(entry: &CatalogEntry, slice: &[u8]) -> Option<RecordMap> {
    let value: serde_json::Value = serde_json::from_slice(slice).ok()?;
    let obj = value.as_object()?;
    let mut record = RecordMap::new();
    for column in &entry.columns {
        let Some(value) = obj.get(column) else { continue };
        // Object-valued fields are dropped, same as at index time
        if let Some(value) = DataValue::from_json(value) {
            record.insert(column.clone(), value);
        }
    }
    Some(record)
}

fn decode_vcard(buf: &[u8]) -> Option<RecordMap> {
    let end_marker = b"END:VCARD";
    let end = buf
        .windows(end_marker.len())
        .position(|w| w == end_marker)?;
    let card = String::from_utf8_lossy(&buf[..end + end_marker.len()]);
    let unfolded = unfold(&card);

    let mut props = ahash::AHashMap::new();
    for line in unfolded.lines() {
        let Some((name, value)) = parse_property(line.trim_end_matches('\r')) else {
            continue;
        };
        if name == "BEGIN" || name == "END" || name == "VERSION" {
            continue;
        }
        fold_property(&mut props, &name, value);
    }

    let mut record = RecordMap::new();
    for column in VCARD_COLUMNS {
        if let Some(value) = props.get(column) {
            record.insert(column.to_string(), DataValue::Str(value.clone()));
        }
    }
    Some(record)
}
