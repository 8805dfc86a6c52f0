//! Orchestrator-specific error types

use handoff_shared::{Phase, SharedError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("No transition available from phase {phase}")]
    NoTransitionAvailable { phase: Phase },

    #[error("Configuration error: {field}: {message}")]
    ConfigurationError { field: String, message: String },

    #[error("Invalid selection weights: {message}")]
    InvalidWeights { message: String },

    #[error("Labeling failed for instance {instance_id}: {message}")]
    LabelingFailed { instance_id: String, message: String },

    #[error("Instance not found: {instance_id}")]
    ItemNotFound { instance_id: String },

    #[error("Snapshot version {found} is not supported (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    #[error("Autonomous labeling worker is already running")]
    WorkerAlreadyRunning,

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Configuration error for a named field
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::ConfigurationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Labeling failure for an instance
    pub fn labeling(instance_id: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::LabelingFailed {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
