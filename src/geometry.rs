//! Core geometry data structure for molecular representations.
//!
//! This module provides the [`Geometry`] type used by every other part of the
//! crate: reactant and product endpoints, interpolated band images and the
//! final transition-state guess are all geometries.
//!
//! Coordinates are in Angstrom. Energies reported by evaluators are in Hartree
//! and gradients in Hartree/Angstrom.
//!
//! Besides storage, a geometry can measure the internal coordinates used by
//! the constraint layer:
//!
//! - [`Geometry::distance`]: interatomic distance r₁₂
//! - [`Geometry::angle`]: bond angle θ₁₂₃ in degrees
//! - [`Geometry::dihedral`]: signed torsion φ₁₂₃₄ in degrees

use nalgebra::{DVector, Vector3};

/// Represents a molecular geometry with atomic elements and Cartesian coordinates.
///
/// Coordinates are stored flat in a single `DVector<f64>` in the order
/// `[x1, y1, z1, x2, y2, z2, ...]`, which lets band images be added,
/// subtracted and projected directly with nalgebra.
///
/// The atom count and ordering are fixed once the geometry is created; only
/// positions change afterwards.
///
/// # Examples
///
/// ```
/// use openneb::geometry::Geometry;
///
/// let elements = vec!["O".to_string(), "H".to_string(), "H".to_string()];
/// let coords = vec![
///     0.0, 0.0, 0.0,
///     0.757, 0.586, 0.0,
///     -0.757, 0.586, 0.0,
/// ];
///
/// let geometry = Geometry::new(elements, coords);
/// assert_eq!(geometry.num_atoms, 3);
/// assert_eq!(geometry.get_atom_coords(1), [0.757, 0.586, 0.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Chemical element symbols for each atom in order
    pub elements: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, x2, y2, z2, ...] in Angstrom
    pub coords: DVector<f64>,
    /// Number of atoms in the molecule
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from element list and coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != elements.len() * 3`. Use [`Geometry::try_new`]
    /// when the input comes from outside the program.
    pub fn new(elements: Vec<String>, coords: Vec<f64>) -> Self {
        let num_atoms = elements.len();
        assert_eq!(coords.len(), num_atoms * 3);
        Self {
            elements,
            coords: DVector::from_vec(coords),
            num_atoms,
        }
    }

    /// Fallible counterpart of [`Geometry::new`].
    ///
    /// Returns a description of the problem when the coordinate count does not
    /// match the element count or a coordinate is not finite.
    pub fn try_new(elements: Vec<String>, coords: Vec<f64>) -> Result<Self, String> {
        if coords.len() != elements.len() * 3 {
            return Err(format!(
                "expected {} coordinates for {} atoms, got {}",
                elements.len() * 3,
                elements.len(),
                coords.len()
            ));
        }
        if let Some(pos) = coords.iter().position(|c| !c.is_finite()) {
            return Err(format!(
                "atom {} has a non-finite coordinate ({})",
                pos / 3,
                coords[pos]
            ));
        }
        Ok(Self::new(elements, coords))
    }

    /// Builds a geometry sharing `self`'s elements but with new coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `coords` has a different length from `self.coords`.
    pub fn with_coords(&self, coords: DVector<f64>) -> Self {
        assert_eq!(coords.len(), self.coords.len());
        Self {
            elements: self.elements.clone(),
            coords,
            num_atoms: self.num_atoms,
        }
    }

    /// Get the Cartesian coordinates of a specific atom.
    ///
    /// # Examples
    ///
    /// ```
    /// use openneb::geometry::Geometry;
    ///
    /// let geometry = Geometry::new(
    ///     vec!["H".to_string(), "H".to_string()],
    ///     vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0],
    /// );
    /// assert_eq!(geometry.get_atom_coords(1), [0.74, 0.0, 0.0]);
    /// ```
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Overwrites the position of a single atom.
    pub fn set_atom_coords(&mut self, atom_idx: usize, position: [f64; 3]) {
        let i = atom_idx * 3;
        self.coords[i] = position[0];
        self.coords[i + 1] = position[1];
        self.coords[i + 2] = position[2];
    }

    fn position(&self, atom_idx: usize) -> Vector3<f64> {
        let [x, y, z] = self.get_atom_coords(atom_idx);
        Vector3::new(x, y, z)
    }

    /// Distance between two atoms in Angstrom.
    ///
    /// ```text
    /// r₁₂ = |r₂ - r₁|
    /// ```
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        (self.position(b) - self.position(a)).norm()
    }

    /// Bond angle a-b-c in degrees, with `b` as the vertex.
    ///
    /// ```text
    /// θ = arccos[(r_ba · r_bc) / (|r_ba| × |r_bc|)]
    /// ```
    ///
    /// Returns 0 when either arm has zero length.
    pub fn angle(&self, a: usize, b: usize, c: usize) -> f64 {
        let ba = self.position(a) - self.position(b);
        let bc = self.position(c) - self.position(b);
        let denom = ba.norm() * bc.norm();
        if denom < 1e-12 {
            return 0.0;
        }
        (ba.dot(&bc) / denom).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Signed dihedral angle a-b-c-d in degrees, in (-180, 180].
    ///
    /// ```text
    /// n₁ = r_ab × r_bc,  n₂ = r_bc × r_cd
    /// φ = atan2[(r̂_bc · (n₁ × n₂)), (n₁ · n₂)]
    /// ```
    ///
    /// The sign follows the IUPAC convention (clockwise looking down b→c is
    /// positive), so the order of the four atoms matters.
    pub fn dihedral(&self, a: usize, b: usize, c: usize, d: usize) -> f64 {
        let b1 = self.position(b) - self.position(a);
        let b2 = self.position(c) - self.position(b);
        let b3 = self.position(d) - self.position(c);

        let n1 = b1.cross(&b2);
        let n2 = b2.cross(&b3);
        let b2_norm = b2.norm();
        if b2_norm < 1e-12 {
            return 0.0;
        }

        let y = (b2 / b2_norm).dot(&n1.cross(&n2));
        let x = n1.dot(&n2);
        y.atan2(x).to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn butane_like() -> Geometry {
        Geometry::new(
            vec![
                "C".to_string(),
                "C".to_string(),
                "C".to_string(),
                "C".to_string(),
            ],
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
        )
    }

    #[test]
    fn test_distance_and_angle() {
        let geometry = butane_like();
        assert!((geometry.distance(0, 1) - 1.0).abs() < 1e-12);
        assert!((geometry.distance(0, 2) - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((geometry.angle(0, 1, 2) - 90.0).abs() < 1e-10);
    }

    #[test]
    fn test_dihedral_sign_depends_on_order() {
        let geometry = butane_like();
        let forward = geometry.dihedral(0, 1, 2, 3);
        let reverse = geometry.dihedral(3, 2, 1, 0);
        assert!((forward.abs() - 90.0).abs() < 1e-10, "got {}", forward);
        assert!((forward - reverse).abs() < 1e-10);

        let mut mirrored = geometry.clone();
        mirrored.set_atom_coords(3, [1.0, 0.0, -1.0]);
        assert!((mirrored.dihedral(0, 1, 2, 3) + forward).abs() < 1e-10);
    }

    #[test]
    fn test_dihedral_planar_trans() {
        let geometry = Geometry::new(
            vec!["C".to_string(); 4],
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, -1.0, 0.0],
        );
        assert!((geometry.dihedral(0, 1, 2, 3).abs() - 180.0).abs() < 1e-10);
    }

    #[test]
    fn test_try_new_rejects_bad_input() {
        assert!(Geometry::try_new(vec!["H".to_string()], vec![0.0, 0.0]).is_err());
        assert!(Geometry::try_new(vec!["H".to_string()], vec![0.0, f64::NAN, 0.0]).is_err());
        assert!(Geometry::try_new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]).is_ok());
    }

    #[test]
    fn test_with_coords_keeps_elements() {
        let geometry = butane_like();
        let moved = geometry.with_coords(&geometry.coords * 2.0);
        assert_eq!(moved.elements, geometry.elements);
        assert_eq!(moved.get_atom_coords(2), [2.0, 0.0, 0.0]);
    }
}
