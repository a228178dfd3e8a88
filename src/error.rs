//! Error types for genloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::telemetry::StepRecord;

/// All error types that can occur in genloop
#[derive(Debug, Error)]
pub enum GenError {
    /// Malformed parameters, detected before any step executes
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Raw failure reported by the generation backend (step or decode)
    #[error("Backend error: {0}")]
    Backend(String),

    /// The step path failed mid-run. Carries the last iteration that
    /// completed and every step record collected up to the failure,
    /// so callers can report partial timing.
    #[error("Generation failed after iteration {last_iteration}: {source}")]
    GenerationFailed {
        last_iteration: u32,
        records: Vec<StepRecord>,
        #[source]
        source: Box<GenError>,
    },

    /// The decode path failed. Distinguished from `GenerationFailed` so
    /// callers can tell "no progress was possible" from "progress happened
    /// but we couldn't render a checkpoint".
    #[error("Decode failed at iteration {iteration}: {source}")]
    DecodeFailed {
        iteration: u32,
        records: Vec<StepRecord>,
        #[source]
        source: Box<GenError>,
    },

    /// A cancellation signal fired during batch execution
    #[error("Batch cancelled after {completed} completed items")]
    BatchCancelled { completed: usize },
}

impl GenError {
    /// Last iteration that made progress, if this error carries one.
    pub fn last_iteration(&self) -> Option<u32> {
        match self {
            GenError::GenerationFailed { last_iteration, .. } => Some(*last_iteration),
            // The step at `iteration` completed before the decode ran
            GenError::DecodeFailed { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Step records collected before the failure, if any.
    pub fn partial_records(&self) -> &[StepRecord] {
        match self {
            GenError::GenerationFailed { records, .. } => records,
            GenError::DecodeFailed { records, .. } => records,
            _ => &[],
        }
    }
}

/// Result type alias for genloop operations
pub type Result<T> = std::result::Result<T, GenError>;
