//! Transition-state guess extraction from a relaxed band.

use crate::chain::Chain;
use crate::geometry::Geometry;
use nalgebra::DVector;

/// Transition-state guess handed to the downstream saddle-point search.
#[derive(Debug, Clone, PartialEq)]
pub struct TsGuess {
    /// Geometry of the selected image
    pub geometry: Geometry,
    /// Energy in Hartree
    pub energy: f64,
    /// Gradient in Hartree/Angstrom
    pub gradient: DVector<f64>,
    /// Index of the selected image in the chain
    pub image: usize,
    /// True if the image was the climbing image at convergence
    pub climbing: bool,
    pub reactant: Geometry,
    pub product: Geometry,
}

impl TsGuess {
    /// Energy above the reactant in Hartree, if the reactant was evaluated.
    pub fn forward_barrier(&self, chain: &Chain) -> Option<f64> {
        chain.reactant().energy.map(|e| self.energy - e)
    }
}

/// Reads the transition-state guess out of a chain.
pub struct SaddlePointExtractor;

impl SaddlePointExtractor {
    /// Guess at interior image `image`.
    ///
    /// Returns `None` if `image` is not an interior index or the image has no
    /// cached energy and gradient.
    pub fn extract(chain: &Chain, image: usize, climbing: bool) -> Option<TsGuess> {
        if !chain.is_interior(image) {
            return None;
        }
        let selected = chain.image(image)?;
        let energy = selected.energy?;
        let gradient = selected.gradient.clone()?;
        Some(TsGuess {
            geometry: selected.geometry.clone(),
            energy,
            gradient,
            image,
            climbing,
            reactant: chain.reactant().geometry.clone(),
            product: chain.product().geometry.clone(),
        })
    }

    /// Guess at the highest-energy interior image.
    pub fn highest_energy(chain: &Chain) -> Option<TsGuess> {
        let image = chain.highest_energy_interior()?;
        Self::extract(chain, image, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Chain {
        let geometries = (0..5)
            .map(|i| Geometry::new(vec!["H".to_string()], vec![i as f64, 0.0, 0.0]))
            .collect();
        let mut chain = Chain::from_geometries(geometries).unwrap();
        chain.endpoint_mut(0).unwrap().set_evaluation(-0.5, DVector::zeros(3));
        for (idx, energy) in [(1, 0.1), (2, 0.7), (3, 0.2)] {
            chain
                .interior_mut(idx)
                .unwrap()
                .set_evaluation(energy, DVector::from_vec(vec![0.0, 0.0, energy]));
        }
        chain
    }

    #[test]
    fn test_extract_pairs_with_endpoints() {
        let chain = chain();
        let guess = SaddlePointExtractor::extract(&chain, 2, true).unwrap();
        assert_eq!(guess.image, 2);
        assert!(guess.climbing);
        assert_eq!(guess.energy, 0.7);
        assert_eq!(guess.geometry, chain.images()[2].geometry);
        assert_eq!(guess.reactant, chain.reactant().geometry);
        assert_eq!(guess.product, chain.product().geometry);
        assert!((guess.forward_barrier(&chain).unwrap() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_extract_rejects_endpoints_and_unevaluated() {
        let chain = chain();
        assert!(SaddlePointExtractor::extract(&chain, 0, false).is_none());
        assert!(SaddlePointExtractor::extract(&chain, 4, false).is_none());

        let fresh = Chain::from_geometries(chain.geometries()).unwrap();
        assert!(SaddlePointExtractor::extract(&fresh, 2, false).is_none());
    }

    #[test]
    fn test_highest_energy() {
        let guess = SaddlePointExtractor::highest_energy(&chain()).unwrap();
        assert_eq!(guess.image, 2);
        assert!(!guess.climbing);
    }
}
