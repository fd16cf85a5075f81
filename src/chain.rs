//! Band images and the fixed-endpoint chain that holds them.
//!
//! A [`Chain`] is an ordered list of [`Image`]s from reactant (index 0) to
//! product (index `n - 1`). The endpoints are immutable: the chain only hands
//! out mutable access to interior images, so no optimizer iteration can move
//! them. The number of images is fixed when the chain is built.

use crate::error::NebError;
use crate::geometry::Geometry;
use crate::interpolation::validate_path;
use nalgebra::DVector;

/// One geometry on the band plus its per-iteration cached data.
///
/// Energy and gradient are `None` until the image has been evaluated; the
/// tangent is `None` for endpoints and recomputed every iteration for
/// interior images.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub geometry: Geometry,
    /// Energy in Hartree
    pub energy: Option<f64>,
    /// Gradient in Hartree/Angstrom
    pub gradient: Option<DVector<f64>>,
    /// Unit tangent to the path at this image
    pub tangent: Option<DVector<f64>>,
}

impl Image {
    /// Unevaluated image at `geometry`.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            energy: None,
            gradient: None,
            tangent: None,
        }
    }

    /// Stores a fresh evaluation and invalidates the tangent.
    pub fn set_evaluation(&mut self, energy: f64, gradient: DVector<f64>) {
        self.energy = Some(energy);
        self.gradient = Some(gradient);
        self.tangent = None;
    }

    /// Moves the image and drops every cached quantity.
    pub fn set_coords(&mut self, coords: DVector<f64>) {
        self.geometry.coords = coords;
        self.energy = None;
        self.gradient = None;
        self.tangent = None;
    }

    /// True once both energy and gradient are cached.
    pub fn is_evaluated(&self) -> bool {
        self.energy.is_some() && self.gradient.is_some()
    }
}

/// Ordered sequence of images with fixed endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    images: Vec<Image>,
}

impl Chain {
    /// Wraps a list of geometries, reactant first and product last.
    ///
    /// # Errors
    ///
    /// [`NebError::InvalidInput`] for fewer than three geometries, or for
    /// geometries that differ in atom count or element order or carry
    /// non-finite coordinates.
    pub fn from_geometries(geometries: Vec<Geometry>) -> Result<Self, NebError> {
        if geometries.len() < 3 {
            return Err(NebError::InvalidInput(format!(
                "a band needs at least 3 images, got {}",
                geometries.len()
            )));
        }
        validate_path(&geometries).map_err(NebError::InvalidInput)?;
        Ok(Self {
            images: geometries.into_iter().map(Image::new).collect(),
        })
    }

    pub(crate) fn from_images(images: Vec<Image>) -> Option<Self> {
        if images.len() < 3 {
            return None;
        }
        Some(Self { images })
    }

    /// Number of images, endpoints included.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Always false: a chain holds at least three images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// All images from reactant to product.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Image at `idx`, endpoints included.
    pub fn image(&self, idx: usize) -> Option<&Image> {
        self.images.get(idx)
    }

    /// Mutable access to an interior image; endpoints yield `None`.
    pub fn interior_mut(&mut self, idx: usize) -> Option<&mut Image> {
        if self.is_interior(idx) {
            self.images.get_mut(idx)
        } else {
            None
        }
    }

    pub(crate) fn endpoint_mut(&mut self, idx: usize) -> Option<&mut Image> {
        if idx == 0 || idx + 1 == self.images.len() {
            self.images.get_mut(idx)
        } else {
            None
        }
    }

    /// True for every index except the two endpoints.
    pub fn is_interior(&self, idx: usize) -> bool {
        idx > 0 && idx + 1 < self.images.len()
    }

    /// Indices `1..n-1`.
    pub fn interior_indices(&self) -> std::ops::Range<usize> {
        1..self.images.len() - 1
    }

    /// Image 0.
    pub fn reactant(&self) -> &Image {
        &self.images[0]
    }

    /// Image `n - 1`.
    pub fn product(&self) -> &Image {
        &self.images[self.images.len() - 1]
    }

    /// Cached energies, `None` where an image is not yet evaluated.
    pub fn energies(&self) -> Vec<Option<f64>> {
        self.images.iter().map(|img| img.energy).collect()
    }

    /// Interior image with the highest cached energy. Ties go to the lower index.
    pub fn highest_energy_interior(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for idx in self.interior_indices() {
            if let Some(energy) = self.images[idx].energy {
                match best {
                    Some((_, e)) if e >= energy => {}
                    _ => best = Some((idx, energy)),
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Copies of every image geometry.
    pub fn geometries(&self) -> Vec<Geometry> {
        self.images.iter().map(|img| img.geometry.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Chain {
        let geometries = (0..n)
            .map(|i| Geometry::new(vec!["H".to_string()], vec![i as f64, 0.0, 0.0]))
            .collect();
        Chain::from_geometries(geometries).unwrap()
    }

    #[test]
    fn test_requires_three_images() {
        let two = vec![
            Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]),
            Geometry::new(vec!["H".to_string()], vec![1.0, 0.0, 0.0]),
        ];
        assert!(matches!(
            Chain::from_geometries(two),
            Err(NebError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_mismatched_atom_counts() {
        let one = Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]);
        let two = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        );
        let result = Chain::from_geometries(vec![one.clone(), two, one]);
        assert!(matches!(result, Err(NebError::InvalidInput(_))));
    }

    #[test]
    fn test_endpoints_not_mutable() {
        let mut chain = chain(5);
        assert!(chain.interior_mut(0).is_none());
        assert!(chain.interior_mut(4).is_none());
        assert!(chain.interior_mut(2).is_some());
        assert_eq!(chain.interior_indices(), 1..4);
    }

    #[test]
    fn test_highest_energy_interior() {
        let mut chain = chain(5);
        assert_eq!(chain.highest_energy_interior(), None);

        for (idx, energy) in [(1, 0.1), (2, 0.5), (3, 0.5)] {
            chain
                .interior_mut(idx)
                .unwrap()
                .set_evaluation(energy, DVector::zeros(3));
        }
        chain.endpoint_mut(4).unwrap().set_evaluation(9.0, DVector::zeros(3));
        assert_eq!(chain.highest_energy_interior(), Some(2));
    }

    #[test]
    fn test_set_coords_clears_cache() {
        let mut chain = chain(3);
        let image = chain.interior_mut(1).unwrap();
        image.set_evaluation(1.0, DVector::zeros(3));
        image.tangent = Some(DVector::zeros(3));
        image.set_coords(DVector::from_vec(vec![0.5, 0.5, 0.0]));
        assert!(!image.is_evaluated());
        assert!(image.tangent.is_none());
    }
}
