//! Embedded query and indexing engine
//!
//! The [`Engine`] is the single object a host process holds: it owns the
//! secondary index store, the record reader with its caches, the recent
//! list and the per-file indexing coordinator. Every public method
//! validates its inputs first; validation failures render as
//! `Validation error: …` and other failures as their message, so the
//! request bridge can forward either shape verbatim.

pub mod coordinator;
mod engine;
pub mod export;

use thiserror::Error;

pub use coordinator::IndexCoordinator;
pub use engine::Engine;
pub use export::{ExportFormat, ExportOptions, ExportReport};

use dx_core::limits::ValidationError;
use dx_data::DataError;

/// Errors surfaced across the request bridge.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Data(#[from] DataError),

    #[error("{0}")]
    Message(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(ValidationError(message.into()))
    }

    /// The structured error payload of the request bridge.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shapes() {
        let err = EngineError::validation("page must be between 1 and 1000000");
        assert_eq!(
            err.payload()["error"],
            "Validation error: page must be between 1 and 1000000"
        );
        let err = EngineError::Message("boom".to_string());
        assert_eq!(err.payload()["error"], "boom");
    }
}
