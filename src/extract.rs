//! Turns a binary mask into dot observations.

use std::collections::VecDeque;

use crate::config::{Connectivity, GridConfig};
use crate::observation::{BoundingBox, Observation};

const FOUR_NEIGHBORS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const EIGHT_NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Row-major binary image; `true` marks ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    /// All-background mask; `None` when `width * height` overflows.
    pub fn new(width: usize, height: usize) -> Option<Self> {
        Some(Self {
            width,
            height,
            data: vec![false; width.checked_mul(height)?],
        })
    }

    /// Mask with pixel (x, y) set to `f(x, y)`; `None` when `width * height` overflows.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Option<Self> {
        let mut data = Vec::with_capacity(width.checked_mul(height)?);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Some(Self { width, height, data })
    }

    /// Marks pixels at or below `threshold` as foreground (dark ink on paper).
    ///
    /// Returns `None` when `pixels` does not hold exactly `width * height` values.
    pub fn from_luma(width: usize, height: usize, pixels: &[u8], threshold: u8) -> Option<Self> {
        if pixels.len() != width.checked_mul(height)? {
            return None;
        }
        Some(Self {
            width,
            height,
            data: pixels.iter().map(|&v| v <= threshold).collect(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn invert(&mut self) {
        for px in self.data.iter_mut() {
            *px = !*px;
        }
    }
}

/// Source of dot observations for the grid pipeline.
pub trait Extractor {
    fn extract(&self, mask: &Mask) -> Vec<Observation>;
}

/// Connected-component labelling with an area filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedComponents {
    pub min_area: usize,
    pub max_area: Option<usize>,
    pub connectivity: Connectivity,
}

impl ConnectedComponents {
    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            min_area: config.min_area,
            max_area: config.max_area,
            connectivity: config.connectivity,
        }
    }

    fn accepts(&self, area: usize) -> bool {
        area >= self.min_area && self.max_area.is_none_or(|max| area <= max)
    }
}

impl Default for ConnectedComponents {
    fn default() -> Self {
        Self::from_config(&GridConfig::default())
    }
}

impl Extractor for ConnectedComponents {
    fn extract(&self, mask: &Mask) -> Vec<Observation> {
        let (width, height) = (mask.width, mask.height);
        let neighbors: &[(isize, isize)] = match self.connectivity {
            Connectivity::Four => &FOUR_NEIGHBORS,
            Connectivity::Eight => &EIGHT_NEIGHBORS,
        };

        let mut visited = vec![false; mask.data.len()];
        let mut queue = VecDeque::new();
        let mut out = Vec::new();
        let mut rejected = 0usize;

        for start in 0..mask.data.len() {
            if !mask.data[start] || visited[start] {
                continue;
            }

            queue.clear();
            queue.push_back(start);
            visited[start] = true;

            let mut sum_x = 0f64;
            let mut sum_y = 0f64;
            let mut count = 0usize;
            let mut bbox = BoundingBox {
                min_x: start % width,
                min_y: start / width,
                max_x: start % width,
                max_y: start / width,
            };

            while let Some(idx) = queue.pop_front() {
                let y = idx / width;
                let x = idx % width;
                sum_x += x as f64;
                sum_y += y as f64;
                count += 1;
                bbox.min_x = bbox.min_x.min(x);
                bbox.max_x = bbox.max_x.max(x);
                bbox.min_y = bbox.min_y.min(y);
                bbox.max_y = bbox.max_y.max(y);

                for &(dx, dy) in neighbors {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                        continue;
                    }
                    let next = ny as usize * width + nx as usize;
                    if !mask.data[next] || visited[next] {
                        continue;
                    }
                    visited[next] = true;
                    queue.push_back(next);
                }
            }

            if !self.accepts(count) {
                rejected += 1;
                continue;
            }

            out.push(Observation {
                position: (sum_x / count as f64, sum_y / count as f64),
                area: count as f64,
                bbox: Some(bbox),
            });
        }

        log::debug!(
            "extracted {} components from {}x{} mask ({} rejected by area)",
            out.len(),
            width,
            height,
            rejected
        );
        out
    }
}
