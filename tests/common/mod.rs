#![allow(dead_code)]

use anoto_grid::{Mask, Observation, Symbol};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Synthetic dot lattice in row-major order.
#[derive(Debug, Clone, Copy)]
pub struct Lattice {
    pub rows: usize,
    pub cols: usize,
    /// Pixel position of dot (0, 0).
    pub origin: (f64, f64),
    /// (column step, row step) in pixels.
    pub step: (f64, f64),
    /// Rotation about `origin`, in degrees.
    pub angle_deg: f64,
}

impl Lattice {
    pub fn new(rows: usize, cols: usize, step: f64) -> Self {
        Self {
            rows,
            cols,
            origin: (20.0, 20.0),
            step: (step, step),
            angle_deg: 0.0,
        }
    }

    pub fn rotated(self, angle_deg: f64) -> Self {
        Self { angle_deg, ..self }
    }

    /// Position of the intersection at (row, col) shifted by `offset` cells
    /// along the (column, row) axes.
    pub fn point(&self, row: usize, col: usize, offset: (f64, f64)) -> (f64, f64) {
        let (s, c) = self.angle_deg.to_radians().sin_cos();
        let u = (col as f64 + offset.0) * self.step.0;
        let v = (row as f64 + offset.1) * self.step.1;
        (self.origin.0 + c * u - s * v, self.origin.1 + s * u + c * v)
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.cells()
            .map(|(r, c)| {
                let (x, y) = self.point(r, c, (0.0, 0.0));
                Observation::at(x, y)
            })
            .collect()
    }

    /// Dots displaced by `amount` cells in the direction given by `pattern`.
    pub fn displaced(&self, amount: f64, pattern: impl Fn(usize, usize) -> Symbol) -> Vec<Observation> {
        self.cells()
            .map(|(r, c)| {
                let offset = match pattern(r, c) {
                    Symbol::Up => (0.0, -amount),
                    Symbol::Down => (0.0, amount),
                    Symbol::Left => (-amount, 0.0),
                    Symbol::Right => (amount, 0.0),
                };
                let (x, y) = self.point(r, c, offset);
                Observation::at(x, y)
            })
            .collect()
    }

    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + use<> {
        let cols = self.cols;
        (0..self.rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
    }
}

/// Pseudo-random symbol per cell, as printed on Anoto paper.
pub fn random_symbols(count: usize, seed: u64) -> Vec<Symbol> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| match rng.gen_range(0..4) {
            0 => Symbol::Up,
            1 => Symbol::Down,
            2 => Symbol::Left,
            _ => Symbol::Right,
        })
        .collect()
}

/// Moves every observation by a random vector shorter than `max_radius`.
pub fn jitter(observations: &[Observation], max_radius: f64, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    observations
        .iter()
        .map(|o| {
            let angle = rng.gen_range(0.0..std::f64::consts::TAU);
            let radius = rng.gen_range(0.0..max_radius);
            Observation::at(o.position.0 + radius * angle.cos(), o.position.1 + radius * angle.sin())
        })
        .collect()
}

/// Moves every observation by independent offsets in `(-max, max)` along x and y.
pub fn jitter_axes(observations: &[Observation], max: f64, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    observations
        .iter()
        .map(|o| {
            let dx = rng.gen_range(-max..max);
            let dy = rng.gen_range(-max..max);
            Observation::at(o.position.0 + dx, o.position.1 + dy)
        })
        .collect()
}

/// Filled discs of `radius` pixels around each center.
pub fn render_mask(width: usize, height: usize, centers: &[(f64, f64)], radius: f64) -> Mask {
    let mut mask = Mask::new(width, height).expect("mask size");
    for &(cx, cy) in centers {
        let r = radius.ceil() as isize;
        let (x0, y0) = (cx.round() as isize, cy.round() as isize);
        for y in y0 - r..=y0 + r {
            for x in x0 - r..=x0 + r {
                if x < 0 || y < 0 {
                    continue;
                }
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                if dx * dx + dy * dy <= radius * radius {
                    mask.set(x as usize, y as usize, true);
                }
            }
        }
    }
    mask
}
