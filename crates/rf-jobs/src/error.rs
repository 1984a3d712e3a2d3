//! Error types for the job engine

use thiserror::Error;

use rf_ml::MlError;
use rf_offline::OfflineError;
use rf_restore::RestoreError;

use crate::availability::ModelId;
use crate::stage::StageId;
use crate::store::JobStatus;

/// Failure of a single stage engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Required model is not ready and the stage has no fallback
    #[error("{model} model is not available for stage {stage}")]
    MissingDependency { stage: StageId, model: ModelId },

    /// Input audio or source is unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Neural inference failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// DSP computation failed
    #[error("Computation failed: {0}")]
    Computation(String),

    /// File system or stream error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<OfflineError> for StageError {
    fn from(e: OfflineError) -> Self {
        match e {
            OfflineError::InputNotFound(_) | OfflineError::Io(_) => Self::Io(e.to_string()),
            OfflineError::ReadError(_)
            | OfflineError::UnsupportedFormat(_)
            | OfflineError::ChannelMismatch { .. } => Self::InvalidInput(e.to_string()),
            _ => Self::Computation(e.to_string()),
        }
    }
}

impl From<RestoreError> for StageError {
    fn from(e: RestoreError) -> Self {
        Self::Computation(e.to_string())
    }
}

impl From<MlError> for StageError {
    fn from(e: MlError) -> Self {
        match e {
            MlError::IoError(_) => Self::Io(e.to_string()),
            _ => Self::Inference(e.to_string()),
        }
    }
}

/// Result type for stage engines
pub type StageResult<T> = Result<T, StageError>;

/// Engine-level error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Processing configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown job id
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Job has not reached the required status
    #[error("Job {id} is not ready (status: {status})")]
    NotReady { id: String, status: JobStatus },

    /// Illegal status change
    #[error("Job {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Requested export format is unknown
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Encoding the export failed
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Artifact storage failure
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Job thread could not be started
    #[error("Failed to start job: {0}")]
    Spawn(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_error_mapping() {
        let e: StageError = OfflineError::UnsupportedFormat("xyz".into()).into();
        assert!(matches!(e, StageError::InvalidInput(_)));

        let e: StageError = OfflineError::InputNotFound("/missing.wav".into()).into();
        assert!(matches!(e, StageError::Io(_)));

        let e: StageError = OfflineError::EncodingError("boom".into()).into();
        assert!(matches!(e, StageError::Computation(_)));
    }

    #[test]
    fn test_missing_dependency_message() {
        let e = StageError::MissingDependency {
            stage: StageId::Separation,
            model: ModelId::Separator,
        };
        assert_eq!(e.to_string(), "separator model is not available for stage separation");
    }
}
