//! Shared error types for the annotation handoff system

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SharedError {
    #[error("Unknown phase: {input}")]
    UnknownPhase { input: String },

    #[error("Invalid label value for {schema}: {message}")]
    InvalidLabel { schema: String, message: String },

    #[error("Invalid confidence {value}: must be within [0, 1]")]
    InvalidConfidence { value: f64 },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
