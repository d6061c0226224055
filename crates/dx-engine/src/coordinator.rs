//! Per-file indexing jobs
//!
//! One job per file id at a time. The worker runs the blocking indexing
//! driver under `spawn_blocking`; progress and the terminal event travel
//! over a bounded channel, and cancellation is a flag the driver observes
//! at chunk boundaries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use dx_core::events::{IndexEvent, JobState};
use dx_core::fingerprint::fingerprint_file;
use dx_data::{run_index_job, DataError, IndexPaths};

use crate::EngineError;

/// Progress + terminal event buffer per job.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct IndexCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Mutex<AHashMap<String, JobHandle>>,
}

struct JobHandle {
    cancel: Arc<AtomicBool>,
    state: JobState,
}

impl IndexCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(AHashMap::new()),
            }),
        }
    }

    /// Lifecycle state of the job for this file id. Terminal states stick
    /// around until a new job replaces them; an id that never had a job
    /// is `Idle`.
    pub fn state(&self, file_id: &str) -> JobState {
        self.inner
            .jobs
            .lock()
            .get(file_id)
            .map(|job| job.state)
            .unwrap_or(JobState::Idle)
    }

    /// Whether a job is currently indexing this file id.
    pub fn is_active(&self, file_id: &str) -> bool {
        self.state(file_id) == JobState::Indexing
    }

    /// Start indexing a source file. Returns the file id and the event
    /// stream ending in exactly one terminal event.
    pub async fn start(
        &self,
        source: PathBuf,
        paths: IndexPaths,
        chunk_size: usize,
    ) -> Result<(String, mpsc::Receiver<IndexEvent>), EngineError> {
        let fingerprint_source = source.clone();
        let file_id =
            tokio::task::spawn_blocking(move || fingerprint_file(&fingerprint_source))
                .await
                .map_err(DataError::from)?
                .map_err(DataError::from)?;
        self.start_job(file_id, source, paths, chunk_size, Arc::new(AtomicBool::new(false)))
    }

    fn start_job(
        &self,
        file_id: String,
        source: PathBuf,
        paths: IndexPaths,
        chunk_size: usize,
        cancel: Arc<AtomicBool>,
    ) -> Result<(String, mpsc::Receiver<IndexEvent>), EngineError> {
        {
            let mut jobs = self.inner.jobs.lock();
            if jobs.get(&file_id).map(|job| job.state) == Some(JobState::Indexing) {
                return Err(EngineError::Message(format!(
                    "indexing already in progress for '{}'",
                    file_id
                )));
            }
            jobs.insert(
                file_id.clone(),
                JobHandle {
                    cancel: cancel.clone(),
                    state: JobState::Indexing,
                },
            );
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = self.inner.clone();
        let id = file_id.clone();
        tokio::task::spawn_blocking(move || {
            let progress_tx = tx.clone();
            let result = run_index_job(&source, &paths, chunk_size, &cancel, |p| {
                let _ = progress_tx.blocking_send(IndexEvent::Progress(p));
            });
            let (event, state) = match result {
                Ok(outcome) => (
                    IndexEvent::Complete {
                        entry: outcome.entry,
                        warnings: outcome.warnings,
                    },
                    JobState::Complete,
                ),
                Err(DataError::Cancelled) => (IndexEvent::Cancelled, JobState::Cancelled),
                Err(e) => {
                    error!(file_id = %id, error = %e, "indexing failed");
                    (IndexEvent::Error(e.to_string()), JobState::Error)
                }
            };
            // State lands first so anyone who saw the terminal event never
            // reads a stale `Indexing`
            if let Some(job) = inner.jobs.lock().get_mut(&id) {
                job.state = state;
            }
            let _ = tx.blocking_send(event);
        });

        Ok((file_id, rx))
    }

    /// Flag the job for cancellation. Returns false when no job is active
    /// for the id.
    pub fn cancel(&self, file_id: &str) -> bool {
        match self.inner.jobs.lock().get(file_id) {
            Some(job) if job.state == JobState::Indexing => {
                job.cancel.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

impl Default for IndexCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
