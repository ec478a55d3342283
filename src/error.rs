//! Error taxonomy shared by the pipeline stages.
//!
//! Backend failures are degradable: every caller has a deterministic fallback.
//! Fix failures are retryable per attempt. `PipelineError` is the only
//! condition that aborts a run.

use std::time::Duration;
use thiserror::Error;

/// Every way a generation backend round-trip can fail.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend call failed: no backend configured")]
    Unavailable,

    #[error("backend call failed: request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend call failed: HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("backend call failed: {0}")]
    Transport(String),

    #[error("backend call failed: empty response")]
    EmptyResponse,
}

impl BackendError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable)
    }
}

/// Failure of a single remedy attempt.
#[derive(Debug, Error)]
pub enum FixError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("no valid code extracted from backend response")]
    NoValidCode,

    #[error("file not found: {0}")]
    MissingFile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixError {
    /// Another attempt cannot change the outcome when no backend exists or
    /// the file a deterministic remedy needs is gone.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FixError::Backend(BackendError::Unavailable) | FixError::MissingFile(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no candidate available for requirement: {0}")]
    NoCandidate(String),

    #[error("validation failed, refusing to package: {0}")]
    ValidationGate(String),
}
