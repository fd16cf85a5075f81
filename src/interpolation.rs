//! Initial band construction between reactant and product.
//!
//! [`PathInterpolator`] builds the starting [`Chain`] for a band run:
//!
//! - **Linear**: every atom moves on a straight line from its reactant to its
//!   product position, images equally spaced in the interpolation parameter.
//!   The endpoints are exact copies of the inputs.
//! - **Driven**: the linear path, refined so that between any two consecutive
//!   images no interatomic distance changes by more than a fraction of its
//!   previous value. Segments that break the bound get equally spaced
//!   sub-steps, so the chain can hold more images than requested.
//!
//! Unlike structure-aligning synchronous-transit schemes, no rotation is
//! applied to either endpoint; the reactant and product must already share
//! a frame.

use crate::chain::Chain;
use crate::error::NebError;
use crate::geometry::Geometry;
use log::debug;
use serde::{Deserialize, Serialize};

/// How the initial band is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// Straight-line interpolation of each atom
    #[default]
    Linear,
    /// Linear path with sub-steps where bond lengths change too quickly
    Driven {
        /// Largest allowed |Δr| / r for any atom pair between consecutive images
        max_fractional_change: f64,
    },
}

/// Builds the initial chain for a band run.
#[derive(Debug, Clone)]
pub struct PathInterpolator {
    method: InterpolationMethod,
    /// Each segment is split into at most 2^max_depth sub-steps
    max_depth: u32,
}

impl PathInterpolator {
    /// Interpolator for `method`.
    pub fn new(method: InterpolationMethod) -> Self {
        Self {
            method,
            max_depth: 12,
        }
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Builds a chain of `n_images` images (endpoints included).
    ///
    /// # Errors
    ///
    /// [`NebError::InvalidInput`] if `n_images < 3`, the endpoints differ in
    /// atom count or element order, or a driven bound is not positive or
    /// cannot be met because atoms collide along the path.
    ///
    /// # Examples
    ///
    /// ```
    /// use openneb::geometry::Geometry;
    /// use openneb::interpolation::{InterpolationMethod, PathInterpolator};
    ///
    /// let h2 = |r: f64| Geometry::new(
    ///     vec!["H".to_string(), "H".to_string()],
    ///     vec![0.0, 0.0, 0.0, r, 0.0, 0.0],
    /// );
    /// let chain = PathInterpolator::new(InterpolationMethod::Linear)
    ///     .build(&h2(1.0), &h2(2.0), 5)
    ///     .unwrap();
    /// assert_eq!(chain.len(), 5);
    /// assert!((chain.images()[2].geometry.distance(0, 1) - 1.5).abs() < 1e-12);
    /// ```
    pub fn build(
        &self,
        reactant: &Geometry,
        product: &Geometry,
        n_images: usize,
    ) -> Result<Chain, NebError> {
        if n_images < 3 {
            return Err(NebError::InvalidInput(format!(
                "a band needs at least 3 images, got {}",
                n_images
            )));
        }
        check_endpoints(reactant, product)?;

        let linear = interpolate_linear(reactant, product, n_images);
        let path = match self.method {
            InterpolationMethod::Linear => linear,
            InterpolationMethod::Driven {
                max_fractional_change,
            } => {
                if !max_fractional_change.is_finite() || max_fractional_change <= 0.0 {
                    return Err(NebError::InvalidInput(format!(
                        "max fractional change must be positive, got {}",
                        max_fractional_change
                    )));
                }
                refine_driven(&linear, max_fractional_change, self.max_depth)
                    .map_err(NebError::InvalidInput)?
            }
        };

        debug!(
            "Initial band: {} images, path length {:.4} Å",
            path.len(),
            path_length(&path)
        );

        Chain::from_geometries(path)
    }
}

fn check_endpoints(reactant: &Geometry, product: &Geometry) -> Result<(), NebError> {
    if reactant.num_atoms != product.num_atoms {
        return Err(NebError::InvalidInput(format!(
            "reactant has {} atoms but product has {}",
            reactant.num_atoms, product.num_atoms
        )));
    }
    if reactant.elements != product.elements {
        return Err(NebError::InvalidInput(
            "reactant and product atoms differ in element or order".into(),
        ));
    }
    Ok(())
}

/// Linear interpolation with `n_images` points including both endpoints.
///
/// ```text
/// R_k = (1 - t_k) R_reactant + t_k R_product,   t_k = k / (n - 1)
/// ```
///
/// Image 0 and image `n - 1` are clones of the inputs, not recomputed.
pub fn interpolate_linear(reactant: &Geometry, product: &Geometry, n_images: usize) -> Vec<Geometry> {
    let mut geometries = Vec::with_capacity(n_images);
    geometries.push(reactant.clone());

    let last = n_images.saturating_sub(1).max(1);
    for k in 1..last {
        let t = k as f64 / last as f64;
        let coords = &reactant.coords * (1.0 - t) + &product.coords * t;
        geometries.push(reactant.with_coords(coords));
    }

    geometries.push(product.clone());
    geometries
}

/// Largest |Δr| / r over every atom pair between two geometries, where r is
/// the pair distance in `from`.
pub fn max_fractional_change(from: &Geometry, to: &Geometry) -> f64 {
    let mut max_change: f64 = 0.0;
    for i in 0..from.num_atoms {
        for j in (i + 1)..from.num_atoms {
            let r0 = from.distance(i, j);
            if r0 < 1e-8 {
                continue;
            }
            let r1 = to.distance(i, j);
            max_change = max_change.max((r1 - r0).abs() / r0);
        }
    }
    max_change
}

/// Splits every segment of `path` into the fewest power-of-two equal
/// sub-steps that keep each pair distance within `max_change`.
///
/// Fails when a segment still breaks the bound after `2^max_depth` sub-steps,
/// which happens when two atoms collide or nearly collide along the path.
fn refine_driven(
    path: &[Geometry],
    max_change: f64,
    max_depth: u32,
) -> Result<Vec<Geometry>, String> {
    let mut refined = Vec::with_capacity(path.len());
    refined.push(path[0].clone());

    for (seg, pair) in path.windows(2).enumerate() {
        let (start, end) = (&pair[0], &pair[1]);

        let mut depth = 0;
        let mut sub = vec![start.clone(), end.clone()];
        while segment_exceeds(&sub, max_change) && depth < max_depth {
            depth += 1;
            sub = interpolate_linear(start, end, (1 << depth) + 1);
        }
        if segment_exceeds(&sub, max_change) {
            let worst = sub
                .windows(2)
                .map(|w| max_fractional_change(&w[0], &w[1]))
                .fold(0.0, f64::max);
            return Err(format!(
                "segment {} cannot keep distance changes within {:.0}% (worst {:.0}% after {} sub-steps); atoms pass too close",
                seg,
                max_change * 100.0,
                worst * 100.0,
                sub.len() - 1
            ));
        } else if depth > 0 {
            debug!("Segment {} split into {} sub-steps", seg, sub.len() - 1);
        }

        refined.extend(sub.into_iter().skip(1));
    }

    // The last pushed geometry is an exact clone of the product.
    Ok(refined)
}

fn segment_exceeds(sub: &[Geometry], max_change: f64) -> bool {
    sub.windows(2)
        .any(|w| max_fractional_change(&w[0], &w[1]) > max_change)
}

/// Checks that a list of geometries can form a band.
///
/// All geometries must share atom count and element order, and every
/// coordinate must be finite.
pub fn validate_path(geometries: &[Geometry]) -> Result<(), String> {
    let first = geometries
        .first()
        .ok_or_else(|| "No geometries to validate".to_string())?;

    for (i, geom) in geometries.iter().enumerate() {
        if geom.num_atoms != first.num_atoms {
            return Err(format!(
                "Geometry {} has {} atoms, expected {}",
                i, geom.num_atoms, first.num_atoms
            ));
        }
        if geom.elements != first.elements {
            return Err(format!("Geometry {} has different elements than reference", i));
        }
        if let Some(pos) = geom.coords.iter().position(|c| !c.is_finite()) {
            return Err(format!(
                "Geometry {} atom {} has non-finite coordinate: {}",
                i,
                pos / 3,
                geom.coords[pos]
            ));
        }
    }

    Ok(())
}

/// Summed Euclidean distance between consecutive geometries, in Angstrom.
pub fn path_length(geometries: &[Geometry]) -> f64 {
    geometries
        .windows(2)
        .map(|w| (&w[1].coords - &w[0].coords).norm())
        .sum()
}
