#![allow(dead_code)]

use nalgebra::DVector;
use openneb::evaluator::{Evaluation, EvaluationError, EvaluationRequest, Evaluator};
use openneb::geometry::Geometry;

pub const RIDGE: f64 = 0.5;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two minima at (±1, 0) joined over a saddle at (0, RIDGE) for atom 0:
///
/// E = (x² - 1)² + (y - RIDGE (1 - x²))² + z²
///
/// Every other atom sits in a harmonic well at the origin.
pub struct ModelSurface;

impl ModelSurface {
    pub fn energy_and_gradient(coords: &DVector<f64>) -> (f64, DVector<f64>) {
        let (x, y, z) = (coords[0], coords[1], coords[2]);
        let valley = y - RIDGE * (1.0 - x * x);

        let mut energy = (x * x - 1.0).powi(2) + valley * valley + z * z;
        let mut gradient = DVector::zeros(coords.len());
        gradient[0] = 4.0 * x * (x * x - 1.0) + 2.0 * valley * (2.0 * RIDGE * x);
        gradient[1] = 2.0 * valley;
        gradient[2] = 2.0 * z;

        for i in 3..coords.len() {
            energy += 0.5 * coords[i] * coords[i];
            gradient[i] = coords[i];
        }
        (energy, gradient)
    }
}

impl Evaluator for ModelSurface {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        let (energy, gradient) = Self::energy_and_gradient(&request.geometry.coords);
        Ok(Evaluation::new(energy, gradient))
    }

    fn name(&self) -> &str {
        "model surface"
    }
}

/// Model surface that fails on one image index.
pub struct FailsOnImage(pub usize);

impl Evaluator for FailsOnImage {
    fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        if request.image == self.0 {
            return Err(EvaluationError::Calculation(format!(
                "backend crashed on {}",
                request.file_stem()
            )));
        }
        ModelSurface.evaluate(request)
    }

    fn name(&self) -> &str {
        "failing stub"
    }
}

pub fn atom(x: f64, y: f64) -> Geometry {
    Geometry::new(vec!["H".to_string()], vec![x, y, 0.0])
}

pub fn reactant() -> Geometry {
    atom(-1.0, 0.0)
}

pub fn product() -> Geometry {
    atom(1.0, 0.0)
}
