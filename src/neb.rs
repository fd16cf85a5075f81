//! Top-level NEB driver.
//!
//! [`run_neb`] is the entry point used by a transition-state search: it
//! interpolates the initial band, relaxes it with CI-NEB inside a scoped
//! working directory and hands back the transition-state guess. Failures are
//! logged and turned into `None`, so the caller can fall back to another
//! guess strategy.
//!
//! [`NebRunner`] exposes the same flow with an explicit configuration,
//! constraints and base directory.
//!
//! # Working Directory
//!
//! Each run owns one directory `{base}/{name}` (or `{name}_1`, `{name}_2`, ...
//! when the name is taken). It is created before the first evaluation and
//! released when the run ends on any path, including evaluator failures.
//! With `keep_files` the directory survives the release and receives
//!
//! - `{name}_path.xyz`: the final band, one frame per image
//! - `{name}_ts_guess.xyz`: the transition-state guess (successful runs)

use crate::band::BandOptimizer;
use crate::config::NebConfig;
use crate::constraints::ConstraintSet;
use crate::error::NebError;
use crate::evaluator::Evaluator;
use crate::geometry::Geometry;
use crate::interpolation::PathInterpolator;
use crate::io::{write_path_xyz, write_xyz};
use crate::saddle::TsGuess;
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Scoped working directory of one run.
///
/// Removed on drop unless `keep` was requested.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Creates a fresh directory named after `name` below `base`.
    pub fn acquire(base: &Path, name: &str, keep: bool) -> io::Result<Self> {
        fs::create_dir_all(base)?;
        let mut attempt = 0usize;
        loop {
            let dir_name = if attempt == 0 {
                name.to_string()
            } else {
                format!("{}_{}", name, attempt)
            };
            let path = base.join(dir_name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Acquired working directory {}", path.display());
                    return Ok(Self { path, keep });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keeps_files(&self) -> bool {
        self.keep
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            debug!("Released working directory {} (kept)", self.path.display());
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed working directory {}", self.path.display()),
            Err(e) => warn!(
                "Failed to remove working directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Runs NEB with an explicit configuration.
///
/// # Examples
///
/// ```no_run
/// use openneb::config::NebConfig;
/// use openneb::constraints::ConstraintSet;
/// use openneb::neb::NebRunner;
/// # use openneb::evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
/// # use openneb::geometry::Geometry;
/// # struct Backend;
/// # impl Evaluator for Backend {
/// #     fn evaluate(&self, r: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
/// #         Ok(Evaluation::new(0.0, r.geometry.coords.clone()))
/// #     }
/// #     fn name(&self) -> &str { "backend" }
/// # }
/// # let reactant = Geometry::new(vec!["H".into()], vec![0.0, 0.0, 0.0]);
/// # let product = Geometry::new(vec!["H".into()], vec![1.0, 0.0, 0.0]);
///
/// let mut constraints = ConstraintSet::new();
/// constraints.set_cartesian(&[0]).unwrap();
///
/// let guess = NebRunner::new(NebConfig { n_cores: 8, ..NebConfig::default() })
///     .with_constraints(constraints)
///     .with_base_dir("running_dir")
///     .run(&reactant, &product, &Backend, 9, "neb_step1");
/// ```
#[derive(Debug, Clone)]
pub struct NebRunner {
    config: NebConfig,
    constraints: ConstraintSet,
    base_dir: PathBuf,
}

impl NebRunner {
    pub fn new(config: NebConfig) -> Self {
        Self {
            config,
            constraints: ConstraintSet::new(),
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = constraints;
        self
    }

    /// Directory in which per-run working directories are created.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn config(&self) -> &NebConfig {
        &self.config
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Runs NEB and returns the transition-state guess, or `None` after
    /// logging why none is available.
    pub fn run<E: Evaluator>(
        &self,
        reactant: &Geometry,
        product: &Geometry,
        evaluator: E,
        image_count: usize,
        work_dir_name: &str,
    ) -> Option<TsGuess> {
        match self.try_run(reactant, product, evaluator, image_count, work_dir_name) {
            Ok(guess) => Some(guess),
            Err(e) => {
                error!(
                    "NEB run '{}' produced no transition-state guess: {}",
                    work_dir_name, e
                );
                None
            }
        }
    }

    /// Runs NEB and returns the failure reason instead of logging it.
    pub fn try_run<E: Evaluator>(
        &self,
        reactant: &Geometry,
        product: &Geometry,
        evaluator: E,
        image_count: usize,
        work_dir_name: &str,
    ) -> Result<TsGuess, NebError> {
        check_run_name(work_dir_name)?;
        self.config.validate()?;

        let chain = PathInterpolator::new(self.config.interpolation).build(
            reactant,
            product,
            image_count,
        )?;
        let work_dir = WorkDir::acquire(&self.base_dir, work_dir_name, self.config.keep_files)?;

        let mut optimizer = BandOptimizer::new(
            chain,
            self.constraints.clone(),
            evaluator,
            self.config.clone(),
            work_dir.path(),
            work_dir_name,
        )?;
        optimizer.run();

        if work_dir.keeps_files() {
            write_outputs(&optimizer, work_dir.path(), work_dir_name);
        }
        let reactant_energy = optimizer.chain().reactant().energy;
        let guess = optimizer.into_result()?;

        match reactant_energy {
            Some(e) => info!(
                "Transition-state guess at image {}: energy {:.8} Ha, barrier {:.6} Ha",
                guess.image,
                guess.energy,
                guess.energy - e
            ),
            None => info!(
                "Transition-state guess at image {}: energy {:.8} Ha",
                guess.image, guess.energy
            ),
        }
        for deviation in self.constraints.deviations(&guess.geometry) {
            debug!(
                "Constraint {:?}: target {:.4}, current {:.4}, deviation {:.4}",
                deviation.atoms,
                deviation.target,
                deviation.current,
                deviation.deviation()
            );
        }
        Ok(guess)
    }
}

/// Runs CI-NEB with the default configuration and no constraints.
///
/// `work_dir_name` names the scoped working directory created below the
/// current directory. Returns `None` when the band could not be built,
/// an image evaluation failed or the run did not converge; the reason is
/// logged at error level.
pub fn run_neb<E: Evaluator>(
    reactant: &Geometry,
    product: &Geometry,
    evaluator: E,
    image_count: usize,
    work_dir_name: &str,
) -> Option<TsGuess> {
    NebRunner::new(NebConfig::default()).run(reactant, product, evaluator, image_count, work_dir_name)
}

fn check_run_name(name: &str) -> Result<(), NebError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(NebError::InvalidInput(format!(
            "invalid working directory name '{}'",
            name
        )));
    }
    Ok(())
}

fn write_outputs<E: Evaluator>(optimizer: &BandOptimizer<E>, dir: &Path, name: &str) {
    let path_file = dir.join(format!("{}_path.xyz", name));
    if let Err(e) = write_path_xyz(optimizer.chain(), &path_file) {
        warn!("Failed to write {}: {}", path_file.display(), e);
    }

    if let Some(guess) = optimizer.ts_guess() {
        let ts_file = dir.join(format!("{}_ts_guess.xyz", name));
        let comment = format!("TS guess image {} energy {:.10}", guess.image, guess.energy);
        match write_xyz(&guess.geometry, &comment, &ts_file) {
            Ok(()) => info!("Transition-state guess written to {}", ts_file.display()),
            Err(e) => warn!("Failed to write {}: {}", ts_file.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workdir_unique_names() {
        let base = TempDir::new().unwrap();
        let first = WorkDir::acquire(base.path(), "neb", true).unwrap();
        let second = WorkDir::acquire(base.path(), "neb", true).unwrap();
        assert_eq!(first.path(), base.path().join("neb"));
        assert_eq!(second.path(), base.path().join("neb_1"));
    }

    #[test]
    fn test_workdir_released_on_drop() {
        let base = TempDir::new().unwrap();
        let path = {
            let dir = WorkDir::acquire(base.path(), "scratch", false).unwrap();
            fs::write(dir.path().join("input.xyz"), "1\n\nH 0 0 0\n").unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());

        let kept = {
            let dir = WorkDir::acquire(base.path(), "kept", true).unwrap();
            dir.path().to_path_buf()
        };
        assert!(kept.is_dir());
    }

    #[test]
    fn test_rejects_bad_run_names() {
        assert!(check_run_name("").is_err());
        assert!(check_run_name("../escape").is_err());
        assert!(check_run_name("neb_step1").is_ok());
    }
}
