//! Typed error hierarchy for reviewflow.
//!
//! Two top-level enums cover the library boundaries:
//! - `StoreError`: session, artifact and cache persistence failures
//! - `PipelineError`: orchestration failures that end a request early
//!
//! The CLI and configuration layers use `anyhow` on top of these.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the durable stores (sessions, artifacts, result cache).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize record at {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {kind} '{value}': must be non-empty and contain no path separators")]
    InvalidName { kind: &'static str, value: String },

    #[error("Session {id} already exists for {application}/{owner}")]
    SessionExists {
        application: String,
        owner: String,
        id: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a pipeline run before a final report is produced.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Worker {worker} failed: {message}")]
    WorkerFailed { worker: String, message: String },

    #[error("Worker {worker} timed out after {secs}s")]
    WorkerTimedOut { worker: String, secs: u64 },

    #[error("Event consumer disconnected")]
    ConsumerGone,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate a single path component used to build a store key.
pub(crate) fn validate_component(kind: &'static str, value: &str) -> Result<(), StoreError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if invalid {
        return Err(StoreError::InvalidName {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}
