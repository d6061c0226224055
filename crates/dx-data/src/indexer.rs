//! Single-job indexing driver
//!
//! Streams one source file chunk by chunk through its format scanner,
//! accumulating byte positions, search rows and column statistics. All
//! store writes ride one transaction; the position table lands just before
//! the commit, so a failed or cancelled job leaves nothing visible.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, UNIX_EPOCH};

use chrono::Utc;
use tracing::{debug, info};

use dx_core::events::IndexProgress;
use dx_core::fingerprint::fingerprint;
use dx_core::types::{CatalogEntry, FileStats};

use crate::config::IndexPaths;
use crate::postable::write_table;
use crate::sniff::sniff_path;
use crate::sources::{project, scanner_for, ProjectedRecord, SEARCHABLE_COLUMNS};
use crate::stats::StatsAccumulator;
use crate::store::{JobWriter, SearchRow, INSERT_BATCH};
use crate::DataError;

/// Minimum wall-clock gap between progress emissions.
const PROGRESS_INTERVAL_MS: u128 = 100;

/// What a completed job hands back.
#[derive(Debug)]
pub struct IndexOutcome {
    pub entry: CatalogEntry,
    pub stats: FileStats,
    pub warnings: u64,
}

/// Index one source file. Blocking; the coordinator runs it on a worker.
///
/// The cancel flag is observed at chunk boundaries. On any failure the
/// job transaction rolls back and, for a first-time index, the partial
/// position table is removed.
pub fn run_index_job(
    source: &Path,
    paths: &IndexPaths,
    chunk_size: usize,
    cancel: &AtomicBool,
    mut progress: impl FnMut(IndexProgress),
) -> Result<IndexOutcome, DataError> {
    let meta = std::fs::metadata(source)?;
    let size = meta.len();
    let mtime_ms = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let file_id = fingerprint(&source.to_string_lossy(), size, mtime_ms);

    let table_path = paths.position_table(&file_id);
    let preexisting = table_path.exists();

    let result = drive(source, paths, &file_id, size, chunk_size, cancel, &mut progress);
    if result.is_err() && !preexisting {
        let _ = std::fs::remove_file(&table_path);
    }
    result
}

fn drive(
    source: &Path,
    paths: &IndexPaths,
    file_id: &str,
    size: u64,
    chunk_size: usize,
    cancel: &AtomicBool,
    progress: &mut impl FnMut(IndexProgress),
) -> Result<IndexOutcome, DataError> {
    let sniffed = sniff_path(source)?;
    let mut scanner = scanner_for(sniffed.format, sniffed.delimiter);
    let mut stats = StatsAccumulator::new();
    let mut writer = JobWriter::open(&paths.db(), file_id)?;

    info!(file_id, format = %sniffed.format, size, "indexing started");

    let mut file = std::fs::File::open(source)?;
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut records: Vec<ProjectedRecord> = Vec::new();
    let mut positions: Vec<u64> = Vec::new();
    let mut batch: Vec<SearchRow> = Vec::with_capacity(INSERT_BATCH);
    let mut consumed: u64 = 0;
    let mut columns_seen = false;
    let started = Instant::now();
    let mut last_emit = Instant::now();

    loop {
        if cancel.load(Ordering::Relaxed) {
            writer.rollback()?;
            debug!(file_id, "indexing cancelled at chunk boundary");
            return Err(DataError::Cancelled);
        }

        let filled = fill_chunk(&mut file, &mut chunk)?;
        if filled == 0 {
            break;
        }
        scanner.feed(&chunk[..filled], consumed, &mut records);
        consumed += filled as u64;

        absorb(
            &mut records,
            &mut scanner,
            &mut columns_seen,
            &mut stats,
            &mut positions,
            &mut batch,
            &mut writer,
        )?;

        if last_emit.elapsed().as_millis() >= PROGRESS_INTERVAL_MS {
            last_emit = Instant::now();
            progress(snapshot(consumed, size, positions.len() as u64, &started));
        }

        if filled < chunk.len() {
            break;
        }
    }

    scanner.finish(&mut records);
    absorb(
        &mut records,
        &mut scanner,
        &mut columns_seen,
        &mut stats,
        &mut positions,
        &mut batch,
        &mut writer,
    )?;
    if !batch.is_empty() {
        writer.insert_rows(&batch)?;
        batch.clear();
    }

    let columns: Vec<String> = scanner.columns().unwrap_or_default().to_vec();
    let searchable: Vec<String> = columns.iter().take(SEARCHABLE_COLUMNS).cloned().collect();
    let entry = CatalogEntry {
        file_id: file_id.to_string(),
        path: source.to_string_lossy().into_owned(),
        name: source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string(),
        size,
        format: sniffed.format,
        delimiter: sniffed.delimiter.map(|d| d.to_string()),
        indexed_at: Utc::now().timestamp_millis(),
        total_records: positions.len() as u64,
        columns,
        searchable_columns: searchable,
        indexed: true,
    };
    let file_stats = stats.finish(file_id);

    // The table lands first; the commit right after makes it live. A
    // matching file id regenerates identical bytes, so overwriting a
    // previous table is safe even if the commit then fails.
    write_table(&paths.position_table(file_id), &positions)?;
    writer.commit(&entry, &file_stats)?;

    progress(IndexProgress {
        percent: 100.0,
        records: entry.total_records,
        eta_seconds: 0.0,
    });
    info!(
        file_id,
        records = entry.total_records,
        warnings = scanner.warnings(),
        "indexing complete"
    );

    Ok(IndexOutcome {
        entry,
        stats: file_stats,
        warnings: scanner.warnings(),
    })
}

fn fill_chunk(file: &mut std::fs::File, chunk: &mut [u8]) -> Result<usize, DataError> {
    let mut filled = 0;
    while filled < chunk.len() {
        let n = file.read(&mut chunk[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Drain scanner output into positions, stats and batched search rows.
fn absorb(
    records: &mut Vec<ProjectedRecord>,
    scanner: &mut Box<dyn crate::sources::FormatScanner>,
    columns_seen: &mut bool,
    stats: &mut StatsAccumulator,
    positions: &mut Vec<u64>,
    batch: &mut Vec<SearchRow>,
    writer: &mut JobWriter,
) -> Result<(), DataError> {
    if records.is_empty() {
        return Ok(());
    }
    if !*columns_seen {
        if let Some(columns) = scanner.columns() {
            stats.set_columns(columns);
            *columns_seen = true;
        }
    }
    for record in records.drain(..) {
        stats.observe(&record.values);
        let mut cols: [Option<String>; SEARCHABLE_COLUMNS] = Default::default();
        for (slot, value) in cols.iter_mut().zip(record.values.iter()) {
            *slot = value.as_deref().map(project);
        }
        batch.push(SearchRow {
            row_index: positions.len() as u64,
            position: record.offset,
            cols,
        });
        positions.push(record.offset);

        if batch.len() >= INSERT_BATCH {
            writer.insert_rows(batch)?;
            batch.clear();
        }
    }
    Ok(())
}

fn snapshot(consumed: u64, size: u64, records: u64, started: &Instant) -> IndexProgress {
    let percent = if size == 0 {
        100.0
    } else {
        (consumed as f64 / size as f64) * 100.0
    };
    let elapsed = started.elapsed().as_secs_f64();
    let eta_seconds = if elapsed > 0.0 && consumed > 0 {
        let bytes_per_second = consumed as f64 / elapsed;
        size.saturating_sub(consumed) as f64 / bytes_per_second
    } else {
        0.0
    };
    IndexProgress {
        percent,
        records,
        eta_seconds,
    }
}
