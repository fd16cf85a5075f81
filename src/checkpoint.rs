//! Checkpoint system for restarting band runs.
//!
//! A checkpoint stores every image of the chain (geometry plus cached energy
//! and gradient), the iteration counter and the climbing image of the last
//! completed iteration. It is written as pretty-printed JSON so an
//! interrupted run can be inspected by hand and resumed with
//! [`crate::band::BandOptimizer::resume`].
//!
//! # Serialization Strategy
//!
//! `DVector<f64>` is stored as a plain `Vec<f64>` through the wrapper types
//! [`SerializableGeometry`] and [`SerializableImage`].
//!
//! ```no_run
//! use openneb::checkpoint::ChainCheckpoint;
//! use std::path::Path;
//!
//! let checkpoint = ChainCheckpoint::load(Path::new("neb_checkpoint.json"))?;
//! let chain = checkpoint.to_chain()?;
//! # Ok::<(), openneb::checkpoint::CheckpointError>(())
//! ```

use crate::chain::{Chain, Image};
use crate::geometry::Geometry;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while saving or loading checkpoints.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Checkpoint file is not valid JSON for this format
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Checkpoint contents do not form a usable chain
    #[error("Checkpoint mismatch: {0}")]
    Mismatch(String),
}

/// Serializable wrapper for Geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableGeometry {
    /// Chemical element symbols
    elements: Vec<String>,
    /// Flattened coordinates
    coords: Vec<f64>,
}

impl From<&Geometry> for SerializableGeometry {
    fn from(geom: &Geometry) -> Self {
        Self {
            elements: geom.elements.clone(),
            coords: geom.coords.iter().copied().collect(),
        }
    }
}

impl TryFrom<SerializableGeometry> for Geometry {
    type Error = CheckpointError;

    fn try_from(ser_geom: SerializableGeometry) -> Result<Self, Self::Error> {
        Geometry::try_new(ser_geom.elements, ser_geom.coords).map_err(CheckpointError::Mismatch)
    }
}

/// Serializable wrapper for one band image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableImage {
    geometry: SerializableGeometry,
    energy: Option<f64>,
    gradient: Option<Vec<f64>>,
}

impl From<&Image> for SerializableImage {
    fn from(image: &Image) -> Self {
        Self {
            geometry: SerializableGeometry::from(&image.geometry),
            energy: image.energy,
            gradient: image.gradient.as_ref().map(|g| g.iter().copied().collect()),
        }
    }
}

/// Saved state of a band run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    /// Name of the run that wrote the checkpoint
    pub run_name: String,
    /// Completed band iterations
    pub iteration: usize,
    /// Climbing image of the last completed iteration
    pub climbing_image: Option<usize>,
    /// Images from reactant to product
    pub images: Vec<SerializableImage>,
}

impl ChainCheckpoint {
    pub fn new(run_name: &str, chain: &Chain, iteration: usize, climbing_image: Option<usize>) -> Self {
        Self {
            run_name: run_name.to_string(),
            iteration,
            climbing_image,
            images: chain.images().iter().map(SerializableImage::from).collect(),
        }
    }

    /// Writes the checkpoint as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Rebuilds the chain with its cached energies and gradients.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Mismatch`] for fewer than three images, images that
    /// disagree in atom count or element order, or a gradient whose length is
    /// not `3N`.
    pub fn to_chain(&self) -> Result<Chain, CheckpointError> {
        let mut images = Vec::with_capacity(self.images.len());
        for (idx, saved) in self.images.iter().enumerate() {
            let geometry = Geometry::try_from(saved.geometry.clone())?;
            let mut image = Image::new(geometry);
            if let (Some(energy), Some(gradient)) = (saved.energy, &saved.gradient) {
                if gradient.len() != image.geometry.coords.len() {
                    return Err(CheckpointError::Mismatch(format!(
                        "image {} has {} gradient components for {} coordinates",
                        idx,
                        gradient.len(),
                        image.geometry.coords.len()
                    )));
                }
                image.set_evaluation(energy, DVector::from_vec(gradient.clone()));
            }
            images.push(image);
        }

        let geometries: Vec<Geometry> = images.iter().map(|img| img.geometry.clone()).collect();
        crate::interpolation::validate_path(&geometries).map_err(CheckpointError::Mismatch)?;

        let n_images = images.len();
        let chain = Chain::from_images(images).ok_or_else(|| {
            CheckpointError::Mismatch(format!("checkpoint holds {} images, need at least 3", n_images))
        })?;
        if let Some(idx) = self.climbing_image {
            if !chain.is_interior(idx) {
                return Err(CheckpointError::Mismatch(format!(
                    "climbing image {} is not an interior image",
                    idx
                )));
            }
        }
        Ok(chain)
    }
}
