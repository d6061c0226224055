//! Streaming format scanners
//!
//! Each scanner consumes the source in fixed chunks and emits one
//! `ProjectedRecord` per discovered record: the absolute byte offset of the
//! record's first byte plus the stringified values of its leading columns.
//! A leftover buffer carries partial trailing bytes across chunk boundaries
//! so scans are never truncated mid-record.

pub mod csv;
pub mod json_array;
pub mod ndjson;
pub mod vcard;

use dx_core::types::FileFormat;

/// Columns projected into the secondary index.
pub const SEARCHABLE_COLUMNS: usize = 6;
/// Columns observed by the statistics accumulator.
pub const STATS_COLUMNS: usize = 10;
/// Declared-column cap for JSON sources.
pub const MAX_DECLARED_COLUMNS: usize = 20;

/// One record discovered by a scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    /// Byte offset of the record's first byte in the source.
    pub offset: u64,
    /// Raw stringified values of the first declared columns, in column
    /// order, at most [`STATS_COLUMNS`] long. `None` marks a missing or
    /// null value.
    pub values: Vec<Option<String>>,
}

/// Format-specific streaming scanner.
pub trait FormatScanner: Send {
    /// Feed the next chunk. `base` is the absolute offset of `data[0]`;
    /// chunks must arrive contiguously.
    fn feed(&mut self, data: &[u8], base: u64, out: &mut Vec<ProjectedRecord>);

    /// Flush whatever the leftover buffer still holds at end of input.
    fn finish(&mut self, out: &mut Vec<ProjectedRecord>);

    /// Declared columns, once discovered.
    fn columns(&self) -> Option<&[String]>;

    /// Records skipped as malformed so far.
    fn warnings(&self) -> u64;
}

/// Build the scanner for a sniffed format.
pub fn scanner_for(format: FileFormat, delimiter: Option<char>) -> Box<dyn FormatScanner> {
    match format {
        FileFormat::Csv => Box::new(csv::CsvScanner::new(delimiter.unwrap_or(','))),
        FileFormat::Ndjson => Box::new(ndjson::NdjsonScanner::new()),
        FileFormat::JsonArray => Box::new(json_array::JsonArrayScanner::new()),
        FileFormat::Vcf => Box::new(vcard::VcardScanner::new()),
    }
}

/// Normalize a value for the secondary index: trimmed, lowercased, with the
/// legacy `|` separator stripped.
pub fn project(raw: &str) -> String {
    raw.trim().to_lowercase().replace('|', "")
}

/// Accumulates chunk bytes and hands out complete `\n`-terminated lines
/// together with their absolute start offsets.
pub(crate) struct LineAssembler {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    start: u64,
}

impl LineAssembler {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
        }
    }

    pub(crate) fn feed(&mut self, data: &[u8], base: u64) {
        if self.buf.is_empty() {
            self.start = base;
        }
        self.buf.extend_from_slice(data);
    }

    /// Invoke `f(offset, line)` for every complete line; the line slice
    /// excludes the terminating `\n`.
    pub(crate) fn drain(&mut self, mut f: impl FnMut(u64, &[u8])) {
        let mut pos = 0usize;
        while let Some(nl) = self.buf[pos..].iter().position(|&b| b == b'\n') {
            let line = &self.buf[pos..pos + nl];
            f(self.start + pos as u64, line);
            pos += nl + 1;
        }
        self.buf.drain(..pos);
        self.start += pos as u64;
    }

    /// Emit the final unterminated line, if any.
    pub(crate) fn finish(&mut self, mut f: impl FnMut(u64, &[u8])) {
        if !self.buf.is_empty() {
            f(self.start, &self.buf);
            self.buf.clear();
        }
    }
}
