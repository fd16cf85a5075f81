//! Configuration for band runs.
//!
//! [`NebConfig`] gathers every tunable of a run: spring constant, climbing
//! image warm-up, step control, convergence thresholds, worker budget and
//! file handling. It can be built in code (starting from
//! [`NebConfig::default`]) or read from the `[neb]` section of an INI file:
//!
//! ```ini
//! [neb]
//! spring_constant = 0.1
//! climbing = true
//! climb_after = 5
//! step_size = 1.0
//! max_displacement = 0.05
//! max_force = 0.0025
//! rms_force = 0.001
//! max_iterations = 200
//! n_cores = 4
//! interpolation = driven
//! max_fractional_change = 0.25
//! keep_files = true
//! checkpoint_every = 0
//! log_every = 10
//! ```
//!
//! Keys that are absent keep their default value.
//!
//! # Units
//!
//! - Forces: Hartree/Angstrom
//! - Displacements: Angstrom
//! - Spring constant: Hartree/Angstrom²
//! - Step size: Angstrom²/Hartree (displacement per unit force)

use crate::interpolation::InterpolationMethod;
use configparser::ini::Ini;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading or validating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Default fractional bond-length change allowed by driven interpolation.
pub const DEFAULT_MAX_FRACTIONAL_CHANGE: f64 = 0.25;

/// Parameters of a band run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NebConfig {
    /// Spring constant k in Hartree/Angstrom²
    pub spring_constant: f64,
    /// Use a climbing image once warm-up is over
    pub climbing: bool,
    /// Plain NEB iterations before the climbing image is activated
    pub climb_after: usize,
    /// Steepest-descent coefficient: displacement = step_size × force
    pub step_size: f64,
    /// Largest displacement of any atom in one iteration, Angstrom
    pub max_displacement: f64,
    /// Convergence threshold on the largest force component
    pub max_force: f64,
    /// Convergence threshold on the RMS force component
    pub rms_force: f64,
    /// Iteration budget before giving up
    pub max_iterations: usize,
    /// Total cores shared by concurrent image evaluations
    pub n_cores: usize,
    /// Layout of the initial band
    pub interpolation: InterpolationMethod,
    /// Keep the working directory and write trajectory files
    pub keep_files: bool,
    /// Write a checkpoint every N iterations, 0 to disable
    pub checkpoint_every: usize,
    /// Log a progress line at info level every N iterations
    pub log_every: usize,
}

impl Default for NebConfig {
    fn default() -> Self {
        Self {
            spring_constant: 0.1,
            climbing: true,
            climb_after: 5,
            step_size: 1.0,
            max_displacement: 0.05,
            max_force: 2.5e-3,
            rms_force: 1.0e-3,
            max_iterations: 200,
            n_cores: 4,
            interpolation: InterpolationMethod::Linear,
            keep_files: true,
            checkpoint_every: 0,
            log_every: 10,
        }
    }
}

impl NebConfig {
    /// Reads the `[neb]` section of an INI file on top of the defaults.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_ini_str(&content)?;
        debug!("Loaded NEB configuration from {}", path.display());
        Ok(config)
    }

    /// Parses INI text; a missing `[neb]` section yields the defaults.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        let mut config = Self::default();
        if let Some(section) = ini.get_map_ref().get("neb") {
            config.apply_section(section)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_section(&mut self, section: &HashMap<String, Option<String>>) -> Result<(), ConfigError> {
        parse_into(section, "spring_constant", &mut self.spring_constant)?;
        parse_into(section, "climbing", &mut self.climbing)?;
        parse_into(section, "climb_after", &mut self.climb_after)?;
        parse_into(section, "step_size", &mut self.step_size)?;
        parse_into(section, "max_displacement", &mut self.max_displacement)?;
        parse_into(section, "max_force", &mut self.max_force)?;
        parse_into(section, "rms_force", &mut self.rms_force)?;
        parse_into(section, "max_iterations", &mut self.max_iterations)?;
        parse_into(section, "n_cores", &mut self.n_cores)?;
        parse_into(section, "keep_files", &mut self.keep_files)?;
        parse_into(section, "checkpoint_every", &mut self.checkpoint_every)?;
        parse_into(section, "log_every", &mut self.log_every)?;

        let mut max_fractional_change = DEFAULT_MAX_FRACTIONAL_CHANGE;
        parse_into(section, "max_fractional_change", &mut max_fractional_change)?;
        if let Some(Some(method)) = section.get("interpolation") {
            self.interpolation = match method.trim().to_ascii_lowercase().as_str() {
                "linear" => InterpolationMethod::Linear,
                "driven" => InterpolationMethod::Driven {
                    max_fractional_change,
                },
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid interpolation: {} (expected linear or driven)",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    /// Rejects values the optimizer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("spring_constant", self.spring_constant),
            ("step_size", self.step_size),
            ("max_displacement", self.max_displacement),
            ("max_force", self.max_force),
            ("rms_force", self.rms_force),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.n_cores == 0 {
            return Err(ConfigError::InvalidValue("n_cores must be at least 1".into()));
        }
        if let InterpolationMethod::Driven {
            max_fractional_change,
        } = self.interpolation
        {
            if !max_fractional_change.is_finite() || max_fractional_change <= 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "max_fractional_change must be positive, got {}",
                    max_fractional_change
                )));
            }
        }
        Ok(())
    }
}

fn parse_into<T: FromStr>(
    section: &HashMap<String, Option<String>>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(Some(raw)) = section.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("Invalid {}: {}", key, raw)))?;
    }
    Ok(())
}
