//! The abstract error taxonomy from the error-handling design: admission,
//! cancellation, and task-classification outcomes.

use thiserror::Error;

/// Outcome of `submitTask` other than success.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("orchestrator is at capacity")]
    AtCapacity,
    #[error("service error admitting task: {0}")]
    ServiceError(String),
}

/// Outcome of `cancelTask` other than success.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("task not found")]
    NotFound,
    #[error("task is already in a terminal state")]
    AlreadyCompleted,
}
