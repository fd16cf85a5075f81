//! Band relaxation state machine.
//!
//! [`BandOptimizer`] drives a [`Chain`] through
//!
//! ```text
//! Initializing ──► Relaxing ──► Converged
//!       │              │
//!       └──────────────┴──────► Failed(reason)
//! ```
//!
//! - **Initializing** evaluates the reactant and product once; their energies
//!   are needed for the tangents of the first and last interior images.
//! - **Relaxing** runs one iteration per [`BandOptimizer::step`]:
//!   1. evaluate every interior image on the worker pool and wait for all
//!      of them (any failure aborts the iteration),
//!   2. select the climbing image once warm-up is over,
//!   3. compute tangents and effective forces,
//!   4. stop if the RMS and maximum force components are below threshold,
//!   5. otherwise move every interior image by steepest descent, clamped so
//!      that no atom moves further than `max_displacement`.
//!
//! Convergence is tested before the step is applied, so the converged chain
//! still carries the energies and gradients the test was made on.
//!
//! # Concurrency
//!
//! Image evaluations run on a private rayon pool of `min(n_cores, n_interior)`
//! threads, each evaluation receiving `max(1, n_cores / threads)` cores. The
//! chain is only mutated by the control loop between evaluation batches.

use crate::chain::Chain;
use crate::checkpoint::ChainCheckpoint;
use crate::climbing::ClimbingImageSelector;
use crate::config::NebConfig;
use crate::constraints::ConstraintSet;
use crate::error::NebError;
use crate::evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
use crate::forces::{force_norms, ForceModel, ImageForce};
use crate::interpolation::validate_path;
use crate::saddle::{SaddlePointExtractor, TsGuess};
use log::{debug, error, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::path::{Path, PathBuf};

/// State of a band run.
#[derive(Debug)]
pub enum BandState {
    /// Endpoints not yet evaluated
    Initializing,
    /// Iterating towards the force thresholds
    Relaxing,
    /// Force thresholds met; a transition-state guess is available
    Converged,
    /// Run aborted; carries the reason
    Failed(NebError),
}

impl BandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BandState::Converged | BandState::Failed(_))
    }

    pub fn failure(&self) -> Option<&NebError> {
        match self {
            BandState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Force summary of one completed iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: usize,
    pub rms_force: f64,
    pub max_force: f64,
    pub climbing_image: Option<usize>,
    /// Highest interior energy in Hartree
    pub max_energy: f64,
}

/// Relaxes a chain of images with NEB or CI-NEB forces.
pub struct BandOptimizer<E: Evaluator> {
    chain: Chain,
    constraints: ConstraintSet,
    evaluator: E,
    config: NebConfig,
    force_model: ForceModel,
    selector: ClimbingImageSelector,
    pool: ThreadPool,
    cores_per_image: usize,
    work_dir: PathBuf,
    run_name: String,
    state: BandState,
    iteration: usize,
    climbing_image: Option<usize>,
    history: Vec<IterationRecord>,
}

impl<E: Evaluator> BandOptimizer<E> {
    /// Creates an optimizer in the `Initializing` state.
    ///
    /// # Errors
    ///
    /// - [`NebError::Config`] if `config` does not validate
    /// - [`NebError::InvalidConstraint`] if a constraint references an atom
    ///   the molecule does not have
    /// - [`NebError::WorkerPool`] if the thread pool cannot be built
    pub fn new(
        chain: Chain,
        constraints: ConstraintSet,
        evaluator: E,
        config: NebConfig,
        work_dir: &Path,
        run_name: &str,
    ) -> Result<Self, NebError> {
        config.validate()?;
        validate_path(&chain.geometries()).map_err(NebError::InvalidInput)?;
        constraints.verify(&chain.reactant().geometry)?;

        let n_interior = chain.len() - 2;
        let pool_size = config.n_cores.min(n_interior).max(1);
        let cores_per_image = (config.n_cores / pool_size).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("neb-worker-{}", i))
            .build()
            .map_err(|e| NebError::WorkerPool(e.to_string()))?;

        let selector = if config.climbing {
            ClimbingImageSelector::new(config.climb_after)
        } else {
            ClimbingImageSelector::disabled()
        };
        let force_model = ForceModel::new(config.spring_constant, &constraints);

        Ok(Self {
            chain,
            constraints,
            evaluator,
            config,
            force_model,
            selector,
            pool,
            cores_per_image,
            work_dir: work_dir.to_path_buf(),
            run_name: run_name.to_string(),
            state: BandState::Initializing,
            iteration: 0,
            climbing_image: None,
            history: Vec::new(),
        })
    }

    /// Continues a run from a checkpoint.
    ///
    /// Endpoints that were already evaluated are not evaluated again; the
    /// optimizer then starts directly in `Relaxing`.
    pub fn resume(
        checkpoint: &ChainCheckpoint,
        constraints: ConstraintSet,
        evaluator: E,
        config: NebConfig,
        work_dir: &Path,
        run_name: &str,
    ) -> Result<Self, NebError> {
        let chain = checkpoint.to_chain()?;
        let mut optimizer = Self::new(chain, constraints, evaluator, config, work_dir, run_name)?;
        optimizer.iteration = checkpoint.iteration;
        optimizer.climbing_image = checkpoint.climbing_image;
        if optimizer.chain.reactant().is_evaluated() && optimizer.chain.product().is_evaluated() {
            optimizer.state = BandState::Relaxing;
        }
        info!(
            "Resuming NEB run '{}' from checkpoint '{}' at iteration {}",
            run_name, checkpoint.run_name, checkpoint.iteration
        );
        Ok(optimizer)
    }

    pub fn state(&self) -> &BandState {
        &self.state
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn into_chain(self) -> Chain {
        self.chain
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn config(&self) -> &NebConfig {
        &self.config
    }

    /// Completed relaxation iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Climbing image of the last completed iteration.
    pub fn climbing_image(&self) -> Option<usize> {
        self.climbing_image
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    /// Threads in the evaluation pool.
    pub fn pool_size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Cores handed to each single image evaluation.
    pub fn cores_per_image(&self) -> usize {
        self.cores_per_image
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}_checkpoint.json", self.run_name))
    }

    /// Advances the state machine by one transition.
    ///
    /// Terminal states are left unchanged.
    pub fn step(&mut self) -> &BandState {
        let result = match self.state {
            BandState::Initializing => self.initialize(),
            BandState::Relaxing => self.relax(),
            BandState::Converged | BandState::Failed(_) => return &self.state,
        };
        match result {
            Ok(next) => self.state = next,
            Err(err) => {
                error!("NEB run '{}' failed: {}", self.run_name, err);
                self.state = BandState::Failed(err);
            }
        }
        &self.state
    }

    /// Steps until `Converged` or `Failed`.
    pub fn run(&mut self) -> &BandState {
        while !self.state.is_terminal() {
            self.step();
        }
        &self.state
    }

    /// Transition-state guess of a converged run.
    ///
    /// The climbing image when one was active, otherwise the interior image
    /// with the highest energy.
    pub fn ts_guess(&self) -> Option<TsGuess> {
        if !matches!(self.state, BandState::Converged) {
            return None;
        }
        match self.climbing_image {
            Some(idx) => SaddlePointExtractor::extract(&self.chain, idx, true),
            None => SaddlePointExtractor::highest_energy(&self.chain),
        }
    }

    /// Consumes a finished optimizer into its outcome.
    pub fn into_result(self) -> Result<TsGuess, NebError> {
        let guess = self.ts_guess();
        match self.state {
            BandState::Converged => guess.ok_or_else(|| {
                NebError::InvalidInput("converged band has no evaluated interior image".into())
            }),
            BandState::Failed(err) => Err(err),
            BandState::Initializing | BandState::Relaxing => {
                Err(NebError::InvalidInput("band run has not finished".into()))
            }
        }
    }

    fn initialize(&mut self) -> Result<BandState, NebError> {
        info!(
            "Starting NEB run '{}': {} images, evaluator {}, climbing {}",
            self.run_name,
            self.chain.len(),
            self.evaluator.name(),
            if self.selector.is_enabled() {
                format!("after {} iterations", self.selector.warm_up())
            } else {
                "disabled".to_string()
            }
        );
        debug!(
            "Worker pool: {} threads, {} cores per image",
            self.pool_size(),
            self.cores_per_image
        );

        let last = self.chain.len() - 1;
        for (idx, evaluation) in self.evaluate_images(&[0, last], 0)? {
            debug!("Endpoint {} energy {:.10} Ha", idx, evaluation.energy);
            if let Some(image) = self.chain.endpoint_mut(idx) {
                image.set_evaluation(evaluation.energy, evaluation.gradient);
            }
        }
        Ok(BandState::Relaxing)
    }

    fn relax(&mut self) -> Result<BandState, NebError> {
        if self.iteration >= self.config.max_iterations {
            return Err(self.not_converged());
        }

        let interior: Vec<usize> = self.chain.interior_indices().collect();
        for (idx, evaluation) in self.evaluate_images(&interior, self.iteration + 1)? {
            if let Some(image) = self.chain.interior_mut(idx) {
                image.set_evaluation(evaluation.energy, evaluation.gradient);
            }
        }

        let climbing = self.selector.select(&self.chain, self.iteration);
        self.track_climbing(climbing);

        let forces = self.force_model.compute(&self.chain, climbing)?;
        for image_force in &forces {
            if let Some(image) = self.chain.interior_mut(image_force.index) {
                image.tangent = Some(image_force.tangent.clone());
            }
        }

        let (rms_force, max_force) = force_norms(forces.iter().map(|f| &f.force));
        let max_energy = self
            .chain
            .interior_indices()
            .filter_map(|idx| self.chain.images()[idx].energy)
            .fold(f64::NEG_INFINITY, f64::max);
        self.iteration += 1;
        self.history.push(IterationRecord {
            iteration: self.iteration,
            rms_force,
            max_force,
            climbing_image: climbing,
            max_energy,
        });

        debug!(
            "NEB iteration {}: max force {:.6} rms force {:.6} Ha/Å, highest energy {:.8} Ha",
            self.iteration, max_force, rms_force, max_energy
        );
        if self.config.log_every > 0 && self.iteration % self.config.log_every == 0 {
            info!(
                "NEB iteration {}/{}: max force {:.6} rms force {:.6} Ha/Å",
                self.iteration, self.config.max_iterations, max_force, rms_force
            );
        }

        // A climbing run is not done until the climbing image has been active.
        let climbing_ready = !self.selector.is_enabled() || climbing.is_some();
        if climbing_ready && max_force <= self.config.max_force && rms_force <= self.config.rms_force {
            info!(
                "NEB run '{}' converged after {} iterations (max force {:.6}, rms force {:.6} Ha/Å)",
                self.run_name, self.iteration, max_force, rms_force
            );
            return Ok(BandState::Converged);
        }

        self.apply_step(&forces);
        self.write_checkpoint();

        if self.iteration >= self.config.max_iterations {
            return Err(self.not_converged());
        }
        Ok(BandState::Relaxing)
    }

    /// Evaluates `indices` concurrently and waits for all of them.
    ///
    /// Results come back in the order of `indices`; the first failure in that
    /// order is reported.
    fn evaluate_images(
        &self,
        indices: &[usize],
        iteration: usize,
    ) -> Result<Vec<(usize, Evaluation)>, NebError> {
        let chain = &self.chain;
        let constraints = &self.constraints;
        let evaluator = &self.evaluator;
        let work_dir = self.work_dir.as_path();
        let run_name = self.run_name.as_str();
        let n_cores = self.cores_per_image;

        let results: Vec<(usize, Result<Evaluation, EvaluationError>)> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&idx| {
                    let geometry = &chain.images()[idx].geometry;
                    let request = EvaluationRequest {
                        geometry,
                        constraints,
                        n_cores,
                        work_dir,
                        run_name,
                        image: idx,
                        iteration,
                    };
                    let result = evaluator.evaluate(&request).and_then(|evaluation| {
                        evaluation.validate(geometry.num_atoms)?;
                        Ok(evaluation)
                    });
                    (idx, result)
                })
                .collect()
        });

        let n_failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if n_failed > 1 {
            warn!("{} image evaluations failed in iteration {}", n_failed, iteration);
        }

        results
            .into_iter()
            .map(|(idx, result)| {
                result
                    .map(|evaluation| (idx, evaluation))
                    .map_err(|source| NebError::Evaluation { image: idx, source })
            })
            .collect()
    }

    fn track_climbing(&mut self, climbing: Option<usize>) {
        match (self.climbing_image, climbing) {
            (None, Some(idx)) => info!(
                "Climbing image activated at image {} (iteration {})",
                idx,
                self.iteration + 1
            ),
            (Some(old), Some(new)) if old != new => {
                info!("Climbing image moved from image {} to image {}", old, new)
            }
            _ => {}
        }
        self.climbing_image = climbing;
    }

    fn apply_step(&mut self, forces: &[ImageForce]) {
        for image_force in forces {
            let mut displacement = &image_force.force * self.config.step_size;
            let largest = max_atom_displacement(&displacement);
            if largest > self.config.max_displacement {
                displacement *= self.config.max_displacement / largest;
            }
            if let Some(image) = self.chain.interior_mut(image_force.index) {
                let coords = &image.geometry.coords + &displacement;
                image.set_coords(coords);
            }
        }
    }

    fn write_checkpoint(&self) {
        let every = self.config.checkpoint_every;
        if every == 0 || self.iteration % every != 0 {
            return;
        }
        let path = self.checkpoint_path();
        let checkpoint =
            ChainCheckpoint::new(&self.run_name, &self.chain, self.iteration, self.climbing_image);
        match checkpoint.save(&path) {
            Ok(()) => debug!("Checkpoint written to {}", path.display()),
            Err(e) => warn!("Failed to write checkpoint {}: {}", path.display(), e),
        }
    }

    fn not_converged(&self) -> NebError {
        let (rms_force, max_force) = self
            .history
            .last()
            .map(|record| (record.rms_force, record.max_force))
            .unwrap_or((f64::NAN, f64::NAN));
        NebError::NotConverged {
            iterations: self.iteration,
            max_force,
            rms_force,
        }
    }
}

/// Largest per-atom displacement norm of a flat `3N` vector.
fn max_atom_displacement(displacement: &DVector<f64>) -> f64 {
    displacement
        .as_slice()
        .chunks(3)
        .map(|atom| atom.iter().map(|x| x * x).sum::<f64>().sqrt())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::interpolation::{InterpolationMethod, PathInterpolator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Parabola along y, flat along x.
    struct Trough {
        calls: AtomicUsize,
    }

    impl Evaluator for Trough {
        fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let y = request.geometry.coords[1];
            Ok(Evaluation::new(
                y * y,
                DVector::from_vec(vec![0.0, 2.0 * y, 0.0]),
            ))
        }

        fn name(&self) -> &str {
            "trough"
        }
    }

    struct FailsOn(usize);

    impl Evaluator for FailsOn {
        fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
            if request.image == self.0 {
                return Err(EvaluationError::Calculation("SCF did not converge".into()));
            }
            Ok(Evaluation::new(0.0, DVector::zeros(3)))
        }

        fn name(&self) -> &str {
            "fails-on"
        }
    }

    fn bent_chain(n: usize) -> Chain {
        let reactant = Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]);
        let product = Geometry::new(vec!["H".to_string()], vec![1.0, 0.0, 0.0]);
        let mut chain = PathInterpolator::new(InterpolationMethod::Linear)
            .build(&reactant, &product, n)
            .unwrap();
        for idx in chain.interior_indices() {
            let image = chain.interior_mut(idx).unwrap();
            let mut coords = image.geometry.coords.clone();
            coords[1] = 0.3;
            image.set_coords(coords);
        }
        chain
    }

    fn config() -> NebConfig {
        NebConfig {
            climbing: false,
            step_size: 0.2,
            n_cores: 2,
            max_iterations: 500,
            ..NebConfig::default()
        }
    }

    #[test]
    fn test_initializing_evaluates_endpoints_only() {
        let dir = TempDir::new().unwrap();
        let evaluator = Trough {
            calls: AtomicUsize::new(0),
        };
        let mut optimizer =
            BandOptimizer::new(bent_chain(5), ConstraintSet::new(), &evaluator, config(), dir.path(), "neb")
                .unwrap();
        assert!(matches!(optimizer.state(), BandState::Initializing));

        optimizer.step();
        assert!(matches!(optimizer.state(), BandState::Relaxing));
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);
        assert!(optimizer.chain().reactant().is_evaluated());
        assert!(!optimizer.chain().images()[2].is_evaluated());
        assert_eq!(optimizer.iteration(), 0);
    }

    #[test]
    fn test_plain_neb_relaxes_into_trough() {
        let dir = TempDir::new().unwrap();
        let evaluator = Trough {
            calls: AtomicUsize::new(0),
        };
        let mut optimizer =
            BandOptimizer::new(bent_chain(5), ConstraintSet::new(), &evaluator, config(), dir.path(), "neb")
                .unwrap();

        assert!(matches!(optimizer.run(), BandState::Converged));
        assert_eq!(optimizer.climbing_image(), None);
        for image in optimizer.chain().images() {
            assert!(image.geometry.coords[1].abs() < 1e-2);
        }
        let last = optimizer.history().last().unwrap();
        assert!(last.max_force <= optimizer.config().max_force);

        let guess = optimizer.ts_guess().unwrap();
        assert!(!guess.climbing);
        assert!(optimizer.chain().is_interior(guess.image));
    }

    #[test]
    fn test_failure_reports_image_index() {
        let dir = TempDir::new().unwrap();
        let mut optimizer = BandOptimizer::new(
            bent_chain(6),
            ConstraintSet::new(),
            FailsOn(3),
            config(),
            dir.path(),
            "neb",
        )
        .unwrap();

        optimizer.run();
        match optimizer.state() {
            BandState::Failed(err) => assert_eq!(err.failed_image(), Some(3)),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(optimizer.ts_guess().is_none());
    }

    #[test]
    fn test_iteration_budget() {
        let dir = TempDir::new().unwrap();
        let evaluator = Trough {
            calls: AtomicUsize::new(0),
        };
        let config = NebConfig {
            max_iterations: 2,
            step_size: 1e-3,
            ..config()
        };
        let mut optimizer =
            BandOptimizer::new(bent_chain(5), ConstraintSet::new(), &evaluator, config, dir.path(), "neb")
                .unwrap();

        let result = {
            optimizer.run();
            optimizer.into_result()
        };
        assert!(matches!(
            result,
            Err(NebError::NotConverged { iterations: 2, .. })
        ));
    }

    #[test]
    fn test_pool_sizing() {
        let dir = TempDir::new().unwrap();
        let evaluator = Trough {
            calls: AtomicUsize::new(0),
        };
        let config = NebConfig {
            n_cores: 8,
            ..config()
        };
        let optimizer =
            BandOptimizer::new(bent_chain(4), ConstraintSet::new(), &evaluator, config, dir.path(), "neb")
                .unwrap();
        assert_eq!(optimizer.pool_size(), 2);
        assert_eq!(optimizer.cores_per_image(), 4);
    }

    #[test]
    fn test_rejects_out_of_range_constraints() {
        let dir = TempDir::new().unwrap();
        let mut constraints = ConstraintSet::new();
        constraints.set_cartesian(&[4]).unwrap();
        let result = BandOptimizer::new(
            bent_chain(4),
            constraints,
            FailsOn(0),
            config(),
            dir.path(),
            "neb",
        );
        assert!(matches!(result, Err(NebError::InvalidConstraint(_))));
    }

    #[test]
    fn test_rejects_image_with_wrong_atom_count() {
        let dir = TempDir::new().unwrap();
        let mut chain = bent_chain(5);
        chain.interior_mut(2).unwrap().geometry = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.5, 0.3, 0.0, 0.5, 1.3, 0.0],
        );
        let result = BandOptimizer::new(
            chain,
            ConstraintSet::new(),
            FailsOn(0),
            config(),
            dir.path(),
            "neb",
        );
        assert!(matches!(result, Err(NebError::InvalidInput(_))));
    }

    #[test]
    fn test_checkpoint_and_resume() {
        let dir = TempDir::new().unwrap();
        let evaluator = Trough {
            calls: AtomicUsize::new(0),
        };
        let config = NebConfig {
            checkpoint_every: 2,
            ..config()
        };
        let mut optimizer = BandOptimizer::new(
            bent_chain(5),
            ConstraintSet::new(),
            &evaluator,
            config.clone(),
            dir.path(),
            "neb",
        )
        .unwrap();
        for _ in 0..3 {
            optimizer.step();
        }
        assert_eq!(optimizer.iteration(), 2);

        let checkpoint = ChainCheckpoint::load(&optimizer.checkpoint_path()).unwrap();
        assert_eq!(checkpoint.iteration, 2);

        let before = evaluator.calls.load(Ordering::SeqCst);
        let mut resumed = BandOptimizer::resume(
            &checkpoint,
            ConstraintSet::new(),
            &evaluator,
            config,
            dir.path(),
            "neb",
        )
        .unwrap();
        assert!(matches!(resumed.state(), BandState::Relaxing));
        resumed.step();
        assert_eq!(resumed.iteration(), 3);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst) - before, 3);
    }

    #[test]
    fn test_step_clamps_displacement() {
        let displacement = DVector::from_vec(vec![3.0, 4.0, 0.0, 0.0, 0.0, 1.0]);
        assert!((max_atom_displacement(&displacement) - 5.0).abs() < 1e-12);
    }
}
