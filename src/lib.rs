//! OpenNEB - Nudged Elastic Band Transition-State Path Search
//!
//! OpenNEB relaxes a chain of molecular geometries between a reactant and a
//! product under true plus spring forces (NEB), optionally driving the
//! highest-energy image up to the saddle point (CI-NEB). The converged
//! climbing image is handed back as the transition-state guess for a
//! downstream saddle-point refinement.
//!
//! # Algorithm
//!
//! For every interior image i with unit tangent τ̂_i:
//!
//! ```text
//! F_i      = F_i^⊥ + k (|R_{i+1} - R_i| - |R_i - R_{i-1}|) τ̂_i
//! F_climb  = F - 2 (F · τ̂) τ̂
//! ```
//!
//! Tangents follow the upwind scheme of Henkelman and Jónsson (2000).
//!
//! # Features
//!
//! - **Constraints**: distance, angle/dihedral, Cartesian and fragment
//!   constraints with validated setters; Cartesian and `"fix"` fragment atoms
//!   are frozen during relaxation
//! - **Interpolation**: linear and bond-length driven initial bands
//! - **Concurrent evaluation**: images of one iteration are evaluated on a
//!   bounded worker pool
//! - **Pluggable backends**: any energy/gradient source implementing
//!   [`Evaluator`]
//! - **Restart capability**: JSON chain checkpoints
//!
//! # Quick Start
//!
//! ```no_run
//! use openneb::evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
//! use openneb::geometry::Geometry;
//! use openneb::run_neb;
//!
//! struct Backend;
//!
//! impl Evaluator for Backend {
//!     fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
//!         // Run the electronic-structure program in request.work_dir here.
//!         Ok(Evaluation::new(0.0, request.geometry.coords.clone() * 0.0))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "backend"
//!     }
//! }
//!
//! let reactant = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
//! let product = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 2.5, 0.0, 0.0]);
//!
//! if let Some(guess) = run_neb(&reactant, &product, &Backend, 9, "neb_run") {
//!     println!("TS guess at image {} with E = {:.8} Ha", guess.image, guess.energy);
//! }
//! ```
//!
//! # Units
//!
//! Coordinates in Angstrom, energies in Hartree, gradients and forces in
//! Hartree/Angstrom.
//!
//! # Logging
//!
//! The library logs through the `log` facade and never installs a logger.

pub mod band;
pub mod chain;
pub mod checkpoint;
pub mod climbing;
pub mod config;
pub mod constraints;
pub mod error;
pub mod evaluator;
pub mod forces;
pub mod geometry;
pub mod interpolation;
pub mod io;
pub mod neb;
pub mod saddle;

pub use band::{BandOptimizer, BandState, IterationRecord};
pub use chain::{Chain, Image};
pub use config::NebConfig;
pub use constraints::{ConstraintError, ConstraintSet};
pub use error::NebError;
pub use evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
pub use geometry::Geometry;
pub use interpolation::{InterpolationMethod, PathInterpolator};
pub use neb::{run_neb, NebRunner};
pub use saddle::{SaddlePointExtractor, TsGuess};
