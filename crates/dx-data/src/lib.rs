//! Data handling for the explorer engine
//!
//! Everything that touches bytes and storage lives here: the format
//! sniffer, the four streaming parsers, the packed position table, the
//! SQLite secondary index, the statistics accumulator, the LRU cache set,
//! the random-access record reader and the single-job indexing driver.

pub mod cache;
pub mod config;
pub mod indexer;
pub mod postable;
pub mod reader;
pub mod recent;
pub mod sniff;
pub mod sources;
pub mod stats;
pub mod store;

use thiserror::Error;

// Re-exports
pub use cache::EngineCaches;
pub use config::{EngineConfig, IndexPaths};
pub use indexer::{run_index_job, IndexOutcome};
pub use reader::RecordReader;
pub use recent::RecentList;
pub use store::SearchStore;

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("stale index for {file_id}: {reason}")]
    Stale { file_id: String, reason: String },

    #[error("indexing cancelled")]
    Cancelled,

    #[error("unknown file id '{0}'")]
    UnknownFile(String),

    #[error("{0}")]
    Other(String),
}
