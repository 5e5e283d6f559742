use serde::{Deserialize, Serialize};

/// Inclusive pixel bounds of a detected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

impl BoundingBox {
    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }
}

/// One detected dot candidate, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub position: (f64, f64),
    pub area: f64,
    pub bbox: Option<BoundingBox>,
}

impl Observation {
    /// A point observation with unit area and no bounds, as produced by
    /// callers that already hold dot centers.
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            position: (x, y),
            area: 1.0,
            bbox: None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.0.is_finite() && self.position.1.is_finite()
    }
}
