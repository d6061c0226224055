//! Core functionality for the data explorer engine
//!
//! This crate provides the shared vocabulary used across the engine:
//! file formats, dynamic record values, catalog shapes, indexing events,
//! the file fingerprinter and request validation limits.

pub mod events;
pub mod fingerprint;
pub mod limits;
pub mod types;

// Re-export commonly used types
pub use events::{IndexEvent, IndexProgress, JobState};
pub use fingerprint::{fingerprint, fingerprint_file};
pub use limits::ValidationError;
pub use types::{
    CatalogEntry, ColumnStats, DataValue, FileFormat, FileStats, PageResult, RecordMap,
    RowLocation, SearchField, SearchOperator, SearchResult, ValueCount,
};
