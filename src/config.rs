use serde::{Deserialize, Serialize};

use crate::error::GridError;

const THRESHOLD: u8 = 127;
const MIN_AREA: usize = 5;
const SPACING_TOLERANCE: f64 = 0.2;
const MAX_ROTATION_DEG: f64 = 30.0;
const MAX_EXTENT: usize = 4096;
const SAMPLE_SIZE: usize = 1024;
const SYMBOL_MIN_OFFSET: f64 = 0.08;

/// Pixel adjacency used when grouping foreground pixels into dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

/// Configuration for one grid detection run.
///
/// The value is read-only for the duration of a run. Missing fields fall back
/// to their defaults when deserialized, so a JSON file only needs to name the
/// options it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Fixed binarization threshold; `None` picks one with Otsu's method.
    pub threshold: Option<u8>,
    /// Regions with fewer pixels than this are discarded as noise.
    pub min_area: usize,
    /// Regions with more pixels than this are discarded as smudges.
    pub max_area: Option<usize>,
    pub connectivity: Connectivity,
    /// Expected (column step, row step) magnitudes in pixels.
    pub expected_spacing: Option<(f64, f64)>,
    /// Allowed relative deviation from `expected_spacing`.
    pub spacing_tolerance: f64,
    /// Largest accepted rotation of the column step in degrees, below 45.
    pub max_rotation_deg: f64,
    /// Upper bound on the normalized row and column count.
    pub max_extent: usize,
    /// Number of observations sampled for neighbor displacements.
    pub sample_size: usize,
    /// Minimum displacement, in cell units, for a dot to carry a symbol.
    pub symbol_min_offset: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            threshold: Some(THRESHOLD),
            min_area: MIN_AREA,
            max_area: None,
            connectivity: Connectivity::default(),
            expected_spacing: None,
            spacing_tolerance: SPACING_TOLERANCE,
            max_rotation_deg: MAX_ROTATION_DEG,
            max_extent: MAX_EXTENT,
            sample_size: SAMPLE_SIZE,
            symbol_min_offset: SYMBOL_MIN_OFFSET,
        }
    }
}

impl GridConfig {
    /// Parses a (possibly partial) JSON configuration and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, GridError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GridError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.min_area == 0 {
            return Err(invalid("min_area must be at least 1 pixel"));
        }
        if let Some(max_area) = self.max_area
            && max_area < self.min_area
        {
            return Err(invalid(format!(
                "max_area {max_area} is below min_area {}",
                self.min_area
            )));
        }
        if let Some((dx, dy)) = self.expected_spacing
            && !(dx.is_finite() && dy.is_finite() && dx > 0.0 && dy > 0.0)
        {
            return Err(invalid(format!(
                "expected_spacing must be positive, got ({dx}, {dy})"
            )));
        }
        if !(self.spacing_tolerance.is_finite() && self.spacing_tolerance >= 0.0) {
            return Err(invalid(format!(
                "spacing_tolerance must be a non-negative fraction, got {}",
                self.spacing_tolerance
            )));
        }
        // At 45 degrees the column and row families cannot be told apart.
        if !(0.0..45.0).contains(&self.max_rotation_deg) {
            return Err(invalid(format!(
                "max_rotation_deg must lie in 0..45, got {}",
                self.max_rotation_deg
            )));
        }
        if self.max_extent == 0 {
            return Err(invalid("max_extent must be at least 1"));
        }
        if self.sample_size < 2 {
            return Err(invalid("sample_size must be at least 2"));
        }
        if !(0.0..0.5).contains(&self.symbol_min_offset) {
            return Err(invalid(format!(
                "symbol_min_offset must lie in 0..0.5 cells, got {}",
                self.symbol_min_offset
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> GridError {
    GridError::InvalidConfig(message.into())
}
