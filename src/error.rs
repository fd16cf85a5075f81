//! Failure reasons for a band run.
//!
//! Every error raised while building or relaxing a band ends up as a
//! [`NebError`]. The optimizer stores it in its terminal `Failed` state and
//! the top-level driver logs it and returns no transition-state guess, so the
//! caller can fall back to another strategy.

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::constraints::ConstraintError;
use crate::evaluator::EvaluationError;
use thiserror::Error;

/// Reason a band run could not produce a transition-state guess.
#[derive(Error, Debug)]
pub enum NebError {
    /// Endpoint geometries or image count cannot form a band
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Constraints reference atoms the molecule does not have
    #[error(transparent)]
    InvalidConstraint(#[from] ConstraintError),
    /// The external evaluator failed on one image; the iteration was aborted
    #[error("Evaluation of image {image} failed: {source}")]
    Evaluation {
        /// Index of the failing image in the chain
        image: usize,
        /// Error reported by the evaluator
        source: EvaluationError,
    },
    /// Iteration budget exhausted before the force thresholds were met
    #[error("NEB not converged after {iterations} iterations (max force {max_force:.6} Ha/Å, rms force {rms_force:.6} Ha/Å)")]
    NotConverged {
        /// Iterations performed
        iterations: usize,
        /// Largest force component at the last iteration
        max_force: f64,
        /// RMS force component at the last iteration
        rms_force: f64,
    },
    /// Worker pool for concurrent evaluations could not be built
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
    /// Scoped working directory could not be acquired or written
    #[error("Working directory error: {0}")]
    WorkDir(#[from] std::io::Error),
    /// Band configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Saved band state cannot be restored
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl NebError {
    /// Image index for evaluation failures.
    pub fn failed_image(&self) -> Option<usize> {
        match self {
            NebError::Evaluation { image, .. } => Some(*image),
            _ => None,
        }
    }
}
