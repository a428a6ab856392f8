//! Session-level error taxonomy.

use crate::core::classifier::{ArtifactError, ClassifierError};
use crate::recorder::RecorderError;
use thiserror::Error;

/// Errors surfaced by a session.
///
/// Only [`SessionError::TransientSample`] is recovered inside the loop; every
/// other variant ends the session after a best-effort flush.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transient sample error: {0}")]
    TransientSample(String),

    #[error("classifier invoked with no windows")]
    InsufficientData,

    #[error("artifact load failed: {0}")]
    ArtifactLoad(#[from] ArtifactError),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("recorder failed: {0}")]
    Recorder(#[from] RecorderError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ClassifierError> for SessionError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::InsufficientData => SessionError::InsufficientData,
            ClassifierError::Model(msg) => SessionError::Classification(msg),
        }
    }
}
