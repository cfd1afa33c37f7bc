//! Static instrument geometry: regions of interest per detector quadrant.
//!
//! Geometry files are TOML. Every detector shares the ordered `[[quadrant]]`
//! region layout; thresholds come from `[defaults]` and may be overridden
//! per detector/quadrant with `[[override]]` entries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::image::Region;

/// Geometry of the instrument shipped with the crate.
const BUILTIN_VIS: &str = include_str!("../config/vis.toml");

/// Errors raised while loading or querying instrument geometry.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The geometry file could not be read.
    #[error("failed to read instrument file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The geometry file is not valid TOML for the expected layout.
    #[error("failed to parse instrument geometry: {0}")]
    Parse(#[from] toml::de::Error),

    /// The geometry is self-inconsistent.
    #[error("invalid geometry for {instrument}: {detail}")]
    Invalid {
        /// Instrument name.
        instrument: String,
        /// What was wrong.
        detail: String,
    },

    /// No geometry is registered under this name.
    #[error("unknown instrument {0}")]
    UnknownInstrument(String),

    /// The detector/quadrant coordinate is out of range.
    #[error("{instrument} has no detector {detector} quadrant {quadrant}")]
    NoSuchQuadrant {
        /// Instrument name.
        instrument: String,
        /// Requested detector index.
        detector: usize,
        /// Requested quadrant index.
        quadrant: usize,
    },
}

#[derive(Debug, Deserialize)]
struct GeometryFile {
    name: String,
    detectors: usize,
    #[serde(default = "default_grid_columns")]
    grid_columns: usize,
    #[serde(default)]
    defaults: Limits,
    quadrant: Vec<QuadrantRegions>,
    #[serde(default, rename = "override")]
    overrides: Vec<LimitOverride>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct QuadrantRegions {
    prescan: Region,
    overscan: Region,
    science: Region,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Limits {
    #[serde(default = "default_overscan_threshold")]
    overscan_threshold: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            overscan_threshold: default_overscan_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LimitOverride {
    detector: usize,
    quadrant: usize,
    overscan_threshold: f64,
}

fn default_grid_columns() -> usize {
    6
}
fn default_overscan_threshold() -> f64 {
    1000.0
}

/// Regions and thresholds of one read-out quadrant.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrant {
    /// Pre-scan (serial underscan) columns.
    pub prescan: Region,
    /// Over-scan columns.
    pub overscan: Region,
    /// Light-sensitive area.
    pub science: Region,
    /// Row-average level above which an over-scan line is flagged.
    pub overscan_threshold: f64,
}

/// Geometry of one instrument.
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    grid_columns: usize,
    detectors: Vec<Vec<Quadrant>>,
}

impl Instrument {
    /// Parse a TOML geometry document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or inconsistent.
    pub fn from_toml_str(contents: &str) -> Result<Self, InstrumentError> {
        let file: GeometryFile = toml::from_str(contents)?;
        let invalid = |detail: String| InstrumentError::Invalid {
            instrument: file.name.clone(),
            detail,
        };
        if file.detectors == 0 {
            return Err(invalid("no detectors".to_owned()));
        }
        if file.quadrant.is_empty() {
            return Err(invalid("no quadrants".to_owned()));
        }

        let layout: Vec<Quadrant> = file
            .quadrant
            .iter()
            .map(|q| Quadrant {
                prescan: q.prescan,
                overscan: q.overscan,
                science: q.science,
                overscan_threshold: file.defaults.overscan_threshold,
            })
            .collect();
        let mut detectors = vec![layout; file.detectors];

        for o in &file.overrides {
            let quadrant = detectors
                .get_mut(o.detector)
                .and_then(|d| d.get_mut(o.quadrant))
                .ok_or_else(|| {
                    invalid(format!(
                        "override for detector {} quadrant {} is out of range",
                        o.detector, o.quadrant
                    ))
                })?;
            quadrant.overscan_threshold = o.overscan_threshold;
        }

        Ok(Self {
            name: file.name.to_uppercase(),
            grid_columns: file.grid_columns,
            detectors,
        })
    }

    /// Read and parse a TOML geometry file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, InstrumentError> {
        let contents = std::fs::read_to_string(path).map_err(|source| InstrumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Built-in VIS geometry.
    ///
    /// # Errors
    ///
    /// Returns an error only if the embedded document is broken.
    pub fn builtin_vis() -> Result<Self, InstrumentError> {
        Self::from_toml_str(BUILTIN_VIS)
    }

    /// Instrument name (upper case).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width of the detector grid (for `CCDX`/`CCDY` addressing).
    pub fn grid_columns(&self) -> usize {
        self.grid_columns
    }

    /// Number of detectors.
    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Geometry of one quadrant.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::NoSuchQuadrant`] for out-of-range indices.
    pub fn quadrant(&self, detector: usize, quadrant: usize) -> Result<&Quadrant, InstrumentError> {
        self.detectors
            .get(detector)
            .and_then(|d| d.get(quadrant))
            .ok_or_else(|| InstrumentError::NoSuchQuadrant {
                instrument: self.name.clone(),
                detector,
                quadrant,
            })
    }
}

/// Name-keyed set of instrument geometries, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    instruments: HashMap<String, Arc<Instrument>>,
}

impl InstrumentCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an instrument.
    pub fn insert(&mut self, instrument: Instrument) {
        self.instruments
            .insert(instrument.name().to_owned(), Arc::new(instrument));
    }

    /// Look up an instrument by name.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::UnknownInstrument`] if absent.
    pub fn get(&self, name: &str) -> Result<&Instrument, InstrumentError> {
        self.instruments
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| InstrumentError::UnknownInstrument(name.to_owned()))
    }

    /// Sorted instrument names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instruments.keys().cloned().collect();
        names.sort();
        names
    }

    /// Largest detector-grid width across instruments (6 when empty).
    pub fn grid_columns(&self) -> usize {
        self.instruments
            .values()
            .map(|i| i.grid_columns())
            .max()
            .unwrap_or_else(default_grid_columns)
    }
}
