//! Tangents and effective forces of the nudged elastic band.
//!
//! # Theoretical Background
//!
//! The NEB force on interior image i combines the true force perpendicular to
//! the path with a spring force along it:
//!
//! ```text
//! F_i = F_i^⊥ + F_i^s τ̂_i
//! F_i^⊥ = F_i - (F_i · τ̂_i) τ̂_i,            F_i = -∇E(R_i)
//! F_i^s = k (|R_{i+1} - R_i| - |R_i - R_{i-1}|)
//! ```
//!
//! Projecting out the parallel true force stops images sliding down into the
//! minima; projecting out the perpendicular spring force stops the springs
//! cutting corners on a curved path.
//!
//! ## Upwind Tangent
//!
//! The tangent τ̂_i points toward the higher-energy neighbour:
//!
//! ```text
//! τ+ = R_{i+1} - R_i,   τ- = R_i - R_{i-1}
//!
//! E_{i+1} > E_i > E_{i-1}  →  τ = τ+
//! E_{i+1} < E_i < E_{i-1}  →  τ = τ-
//! ```
//!
//! At a local extremum the two displacements are mixed by the energy
//! differences so the tangent turns smoothly as the image crosses the top:
//!
//! ```text
//! ΔE_max = max(|E_{i+1} - E_i|, |E_{i-1} - E_i|)
//! ΔE_min = min(|E_{i+1} - E_i|, |E_{i-1} - E_i|)
//!
//! E_{i+1} > E_{i-1}  →  τ = τ+ ΔE_max + τ- ΔE_min
//! otherwise          →  τ = τ+ ΔE_min + τ- ΔE_max
//! ```
//!
//! The result is normalized to unit length. When both differences vanish
//! (flat surface, or energies not yet known) the bisector `τ+ + τ-` is used.
//!
//! # Frozen Degrees of Freedom
//!
//! Components belonging to frozen atoms (Cartesian constraints and atoms of
//! fragments with the `"fix"` strategy) are zeroed in every effective force,
//! so those atoms never move during relaxation.
//!
//! # References
//!
//! - Henkelman, G.; Jónsson, H. *J. Chem. Phys.* **2000**, 113, 9978-9985.
//! - Henkelman, G.; Uberuaga, B. P.; Jónsson, H. *J. Chem. Phys.* **2000**, 113, 9901-9904.

use crate::chain::{Chain, Image};
use crate::climbing::climbing_force;
use crate::constraints::ConstraintSet;
use crate::error::NebError;
use nalgebra::DVector;

/// Tangent and effective force of one interior image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageForce {
    /// Image index in the chain
    pub index: usize,
    /// Unit tangent used for the projections
    pub tangent: DVector<f64>,
    /// Effective force in Hartree/Angstrom, frozen components zeroed
    pub force: DVector<f64>,
    /// True if the climbing-image force was used
    pub climbing: bool,
}

/// Computes NEB forces for every interior image of a chain.
///
/// The model keeps nothing between calls apart from its fixed parameters:
/// the output depends only on the chain passed in.
#[derive(Debug, Clone)]
pub struct ForceModel {
    spring_constant: f64,
    frozen: Vec<usize>,
}

impl ForceModel {
    /// Creates a model with spring constant `k` (Hartree/Angstrom²) and the
    /// frozen atoms of `constraints`.
    pub fn new(spring_constant: f64, constraints: &ConstraintSet) -> Self {
        Self {
            spring_constant,
            frozen: constraints.frozen_atoms().into_iter().collect(),
        }
    }

    /// Spring constant in Hartree/Angstrom².
    pub fn spring_constant(&self) -> f64 {
        self.spring_constant
    }

    /// Sorted indices of atoms whose forces are zeroed.
    pub fn frozen_atoms(&self) -> &[usize] {
        &self.frozen
    }

    /// Effective forces for all interior images.
    ///
    /// `climbing` names the image that receives the climbing force instead of
    /// the NEB force.
    ///
    /// # Errors
    ///
    /// [`NebError::InvalidInput`] if any image (endpoints included) has no
    /// cached energy and gradient.
    pub fn compute(&self, chain: &Chain, climbing: Option<usize>) -> Result<Vec<ImageForce>, NebError> {
        if let Some(idx) = (0..chain.len()).find(|&i| !chain.images()[i].is_evaluated()) {
            return Err(NebError::InvalidInput(format!(
                "image {} has no energy and gradient",
                idx
            )));
        }

        let images = chain.images();
        let mut out = Vec::with_capacity(chain.len() - 2);
        for i in chain.interior_indices() {
            let (prev, current, next) = (&images[i - 1], &images[i], &images[i + 1]);
            let tangent = upwind_tangent(prev, current, next);
            let true_force = match &current.gradient {
                Some(gradient) => -gradient,
                None => continue,
            };

            let is_climbing = climbing == Some(i);
            let mut force = if is_climbing {
                climbing_force(&true_force, &tangent)
            } else {
                let spring = self.spring_magnitude(prev, current, next);
                neb_force(&true_force, &tangent, spring)
            };
            self.mask_frozen(&mut force);

            out.push(ImageForce {
                index: i,
                tangent,
                force,
                climbing: is_climbing,
            });
        }
        Ok(out)
    }

    /// Spring force magnitude along the tangent:
    /// `k (|R_{i+1} - R_i| - |R_i - R_{i-1}|)`.
    pub fn spring_magnitude(&self, prev: &Image, current: &Image, next: &Image) -> f64 {
        let d_next = (&next.geometry.coords - &current.geometry.coords).norm();
        let d_prev = (&current.geometry.coords - &prev.geometry.coords).norm();
        self.spring_constant * (d_next - d_prev)
    }

    /// Zeroes the x, y and z components of every frozen atom.
    pub fn mask_frozen(&self, force: &mut DVector<f64>) {
        for &atom_idx in &self.frozen {
            let i = atom_idx * 3;
            if i + 2 < force.len() {
                force[i] = 0.0;
                force[i + 1] = 0.0;
                force[i + 2] = 0.0;
            }
        }
    }
}

/// NEB force: true force perpendicular to the tangent plus the spring force
/// along it.
pub fn neb_force(true_force: &DVector<f64>, tangent: &DVector<f64>, spring: f64) -> DVector<f64> {
    let parallel = true_force.dot(tangent);
    true_force - tangent * parallel + tangent * spring
}

/// Energy-weighted upwind tangent at `current`, normalized.
///
/// Missing energies fall back to the bisector tangent.
pub fn upwind_tangent(prev: &Image, current: &Image, next: &Image) -> DVector<f64> {
    let tau_plus = &next.geometry.coords - &current.geometry.coords;
    let tau_minus = &current.geometry.coords - &prev.geometry.coords;

    let tangent = match (prev.energy, current.energy, next.energy) {
        (Some(e_prev), Some(e), Some(e_next)) => {
            if e_next > e && e > e_prev {
                tau_plus
            } else if e_next < e && e < e_prev {
                tau_minus
            } else {
                let d_next = (e_next - e).abs();
                let d_prev = (e_prev - e).abs();
                let (d_max, d_min) = (d_next.max(d_prev), d_next.min(d_prev));
                if d_max == 0.0 {
                    &tau_plus + &tau_minus
                } else if e_next > e_prev {
                    &tau_plus * d_max + &tau_minus * d_min
                } else {
                    &tau_plus * d_min + &tau_minus * d_max
                }
            }
        }
        _ => &tau_plus + &tau_minus,
    };

    normalized(tangent)
}

fn normalized(v: DVector<f64>) -> DVector<f64> {
    let norm = v.norm();
    if norm > 1e-14 {
        v / norm
    } else {
        v
    }
}

/// RMS and maximum absolute component over a set of forces.
pub fn force_norms<'a>(forces: impl IntoIterator<Item = &'a DVector<f64>>) -> (f64, f64) {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    let mut max_abs: f64 = 0.0;
    for force in forces {
        for &f in force.iter() {
            sum_sq += f * f;
            max_abs = max_abs.max(f.abs());
            count += 1;
        }
    }
    let rms = if count > 0 {
        (sum_sq / count as f64).sqrt()
    } else {
        0.0
    };
    (rms, max_abs)
}
