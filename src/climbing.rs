//! Climbing-image selection and force.
//!
//! After a number of plain NEB warm-up iterations the interior image with the
//! highest cached energy stops feeling springs and instead climbs:
//!
//! ```text
//! F_climb = F - 2 (F · τ̂) τ̂
//! ```
//!
//! The true force along the path is inverted, so the image moves uphill along
//! τ̂ while still relaxing in the perpendicular directions. At convergence it
//! sits on the saddle point.
//!
//! Selection is recomputed from the current energies every iteration with no
//! hysteresis, so the climbing role follows the maximum if it moves.

use crate::chain::Chain;
use nalgebra::DVector;

/// Climbing-image force: true force with its tangential component inverted.
pub fn climbing_force(true_force: &DVector<f64>, tangent: &DVector<f64>) -> DVector<f64> {
    let parallel = true_force.dot(tangent);
    true_force - tangent * (2.0 * parallel)
}

/// Picks the climbing image of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimbingImageSelector {
    enabled: bool,
    warm_up: usize,
}

impl ClimbingImageSelector {
    /// Climbing starts once `warm_up` plain NEB iterations have completed.
    pub fn new(warm_up: usize) -> Self {
        Self {
            enabled: true,
            warm_up,
        }
    }

    /// A selector that never picks an image (plain NEB).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            warm_up: 0,
        }
    }

    /// False for plain NEB.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Plain NEB iterations before climbing starts.
    pub fn warm_up(&self) -> usize {
        self.warm_up
    }

    /// Climbing image for `iteration` (0-based), or `None` during warm-up or
    /// when disabled. Only interior images with a cached energy compete.
    pub fn select(&self, chain: &Chain, iteration: usize) -> Option<usize> {
        if !self.enabled || iteration < self.warm_up {
            return None;
        }
        chain.highest_energy_interior()
    }
}
