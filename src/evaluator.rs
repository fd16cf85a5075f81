//! Energy and gradient evaluation interface for band images.
//!
//! The band never talks to an electronic-structure program directly. Every
//! backend (semi-empirical, DFT, a force field, an analytic test surface, ...)
//! implements the single [`Evaluator`] trait and the optimizer calls it once
//! per image per iteration.
//!
//! # Contract
//!
//! ```text
//! evaluate(geometry, constraints, core budget) -> Result<Evaluation, EvaluationError>
//! ```
//!
//! - Energies are in Hartree, gradients in Hartree/Angstrom, flat `3N` layout
//!   matching [`Geometry::coords`].
//! - The evaluator is responsible for honouring distance, angular and
//!   Cartesian constraints when it relaxes anything internally.
//! - Timeouts and crashes of the underlying program are reported as
//!   [`EvaluationError`]; the band does not retry.
//!
//! Implementations must be thread safe: images of one iteration are evaluated
//! concurrently on a bounded worker pool.

use crate::constraints::ConstraintSet;
use crate::geometry::Geometry;
use nalgebra::DVector;
use std::path::Path;
use thiserror::Error;

/// Error type for a single image evaluation.
///
/// Evaluations can fail at three stages:
/// 1. **I/O**: writing inputs or reading results
/// 2. **Calculation**: the backend itself failed (crash, SCF failure, timeout)
/// 3. **Result**: the backend returned something unusable
#[derive(Error, Debug)]
pub enum EvaluationError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Backend execution failed
    #[error("calculation failed: {0}")]
    Calculation(String),
    /// Backend returned an energy or gradient that cannot be used
    #[error("invalid result: {0}")]
    InvalidResult(String),
}

/// Everything a backend needs to evaluate one image.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    /// Geometry to evaluate
    pub geometry: &'a Geometry,
    /// Constraints active for the run, read-only
    pub constraints: &'a ConstraintSet,
    /// Number of cores this single evaluation may use
    pub n_cores: usize,
    /// Scoped working directory of the current run
    pub work_dir: &'a Path,
    /// Name of the current run
    pub run_name: &'a str,
    /// Image index within the chain
    pub image: usize,
    /// Band iteration (0 for the initial endpoint evaluations)
    pub iteration: usize,
}

impl EvaluationRequest<'_> {
    /// File stem unique to this image and iteration.
    ///
    /// Format: `{run_name}_iter{iteration}_img{image}`
    ///
    /// Backends that write input/output files should use this so that
    /// concurrent images never collide inside the working directory.
    pub fn file_stem(&self) -> String {
        format!("{}_iter{}_img{}", self.run_name, self.iteration, self.image)
    }
}

/// Energy and gradient of one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Potential energy in Hartree
    pub energy: f64,
    /// Gradient dE/dx in Hartree/Angstrom, flat `3N` layout
    pub gradient: DVector<f64>,
}

impl Evaluation {
    pub fn new(energy: f64, gradient: DVector<f64>) -> Self {
        Self { energy, gradient }
    }

    /// Checks that the evaluation contains usable data for `num_atoms` atoms.
    ///
    /// # Validation Criteria
    ///
    /// The evaluation is rejected if:
    /// - The energy is NaN or infinite
    /// - The gradient length is not `3 × num_atoms`
    /// - Any gradient component is NaN or infinite
    ///
    /// # Examples
    ///
    /// ```
    /// use openneb::evaluator::Evaluation;
    /// use nalgebra::DVector;
    ///
    /// let ok = Evaluation::new(-1.0, DVector::from_vec(vec![0.1, -0.2, 0.0]));
    /// assert!(ok.validate(1).is_ok());
    /// assert!(ok.validate(2).is_err());
    /// ```
    pub fn validate(&self, num_atoms: usize) -> Result<(), EvaluationError> {
        if !self.energy.is_finite() {
            return Err(EvaluationError::InvalidResult(format!(
                "energy is not finite ({})",
                self.energy
            )));
        }

        let expected = num_atoms * 3;
        if self.gradient.len() != expected {
            return Err(EvaluationError::InvalidResult(format!(
                "Gradient/geometry mismatch: expected {} components for {} atoms, got {}",
                expected,
                num_atoms,
                self.gradient.len()
            )));
        }

        if let Some(pos) = self.gradient.iter().position(|g| !g.is_finite()) {
            return Err(EvaluationError::InvalidResult(format!(
                "gradient component {} is not finite",
                pos
            )));
        }

        Ok(())
    }
}

/// A backend that can compute the energy and gradient of a geometry.
///
/// # Examples
///
/// ```
/// use openneb::evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
///
/// /// Harmonic well centred at the origin.
/// struct Harmonic;
///
/// impl Evaluator for Harmonic {
///     fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
///         let x = &request.geometry.coords;
///         Ok(Evaluation::new(0.5 * x.dot(x), x.clone()))
///     }
///
///     fn name(&self) -> &str {
///         "harmonic"
///     }
/// }
/// ```
pub trait Evaluator: Send + Sync {
    /// Computes energy and gradient for `request.geometry`.
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError>;

    /// Returns the name of the backend (e.g. "XTB 6.6").
    fn name(&self) -> &str;
}

impl<E: Evaluator + ?Sized> Evaluator for &E {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        (**self).evaluate(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        (**self).evaluate(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        (**self).evaluate(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
