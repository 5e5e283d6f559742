//! Dominant dot spacing and orientation from nearest-neighbor displacements.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use nalgebra::{Matrix2, Vector2};

use crate::config::GridConfig;
use crate::error::GridError;
use crate::observation::Observation;

const NEIGHBORS_PER_SAMPLE: usize = 4;
const HISTOGRAM_BINS: usize = 90;
const HISTOGRAM_SMOOTHING: isize = 2;
/// Half-width of the window the orientation median is taken over.
const ORIENTATION_WINDOW_DEG: f64 = 30.0;
const ORIENTATION_PASSES: usize = 8;
const ANGLE_TOLERANCE_DEG: f64 = 20.0;
/// Family fits recenter on their own median direction this many times.
const FAMILY_PASSES: usize = 2;
const LENGTH_TOLERANCE: f64 = 0.5;
const MIN_FAMILY_SUPPORT: usize = 2;
const MIN_FAMILY_FRACTION: f64 = 0.05;
/// Smallest |sin| of the angle between the two basis vectors.
const MIN_BASIS_SINE: f64 = 0.2;
const EPS: f64 = 1e-9;

/// Column step `dx` and row step `dy` of the dot lattice, in pixels.
///
/// `dx` belongs to the more horizontal displacement family and points
/// towards +x; `dy` points towards +y (down the image). Values are built
/// once through [`SpacingModel::from_basis`] and never edited afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpacingModel {
    dx: Vector2<f64>,
    dy: Vector2<f64>,
    angle: f64,
    inverse: Matrix2<f64>,
}

impl SpacingModel {
    /// Returns `None` for non-finite, vanishing or nearly parallel vectors.
    pub fn from_basis(dx: Vector2<f64>, dy: Vector2<f64>) -> Option<Self> {
        if !(dx.iter().all(|v| v.is_finite()) && dy.iter().all(|v| v.is_finite())) {
            return None;
        }
        let (ndx, ndy) = (dx.norm(), dy.norm());
        if ndx <= EPS || ndy <= EPS {
            return None;
        }
        let cross = dx.x * dy.y - dx.y * dy.x;
        if (cross / (ndx * ndy)).abs() < MIN_BASIS_SINE {
            return None;
        }
        let inverse = Matrix2::from_columns(&[dx, dy]).try_inverse()?;
        Some(Self {
            dx,
            dy,
            angle: dx.y.atan2(dx.x),
            inverse,
        })
    }

    pub fn dx(&self) -> Vector2<f64> {
        self.dx
    }

    pub fn dy(&self) -> Vector2<f64> {
        self.dy
    }

    /// Rotation of the column step in radians.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn angle_deg(&self) -> f64 {
        self.angle.to_degrees()
    }

    /// (column step, row step) magnitudes in pixels.
    pub fn spacing(&self) -> (f64, f64) {
        (self.dx.norm(), self.dy.norm())
    }

    /// Pixel displacement expressed as (column, row) lattice units.
    pub fn to_basis(&self, pixels: Vector2<f64>) -> Vector2<f64> {
        self.inverse * pixels
    }

    /// (column, row) lattice units expressed as a pixel displacement.
    pub fn to_pixels(&self, cells: Vector2<f64>) -> Vector2<f64> {
        self.dx * cells.x + self.dy * cells.y
    }
}

/// Estimates the lattice basis of the observed dots.
///
/// Fails with [`GridError::InsufficientObservations`] below two distinct
/// positions and with [`GridError::InsufficientPattern`] when the neighbor
/// displacements do not form two separable families.
pub fn estimate_spacing(
    observations: &[Observation],
    config: &GridConfig,
) -> Result<SpacingModel, GridError> {
    let points: Vec<Vector2<f64>> = observations
        .iter()
        .filter(|o| o.is_finite())
        .map(|o| Vector2::new(o.position.0, o.position.1))
        .collect();

    let distinct = count_distinct(&points);
    if distinct < 2 {
        return Err(GridError::InsufficientObservations { found: distinct });
    }

    let displacements = neighbor_displacements(&points, config.sample_size);
    let total = displacements.len();
    let pattern_error = |reason, column_support, row_support| GridError::InsufficientPattern {
        reason,
        displacements: total,
        column_support,
        row_support,
    };

    let orientation =
        dominant_orientation(&displacements).ok_or(pattern_error("no neighbor displacements", 0, 0))?;

    let mut column_family = Vec::new();
    let mut row_family = Vec::new();
    for &v in &displacements {
        let theta = v.y.atan2(v.x);
        let deviation = wrap_half_turn(theta - orientation);
        if deviation.abs() <= FRAC_PI_4 {
            column_family.push(v);
        } else {
            row_family.push(v);
        }
    }

    let min_support = MIN_FAMILY_SUPPORT.max((MIN_FAMILY_FRACTION * total as f64).ceil() as usize);
    let column = fit_family(&column_family, orientation);
    let row = fit_family(&row_family, orientation + FRAC_PI_2);
    let column_support = column.map_or(0, |f| f.support);
    let row_support = row.map_or(0, |f| f.support);
    let (Some(column), Some(row)) = (column, row) else {
        return Err(pattern_error(
            "fewer than two displacement clusters",
            column_support,
            row_support,
        ));
    };
    if column.support < min_support || row.support < min_support {
        return Err(pattern_error(
            "displacement cluster too weak",
            column_support,
            row_support,
        ));
    }

    let dx = Vector2::new(column.angle.cos(), column.angle.sin()) * column.length;
    let dy = Vector2::new(row.angle.cos(), row.angle.sin()) * row.length;
    let model = SpacingModel::from_basis(dx, dy).ok_or(pattern_error(
        "degenerate basis",
        column_support,
        row_support,
    ))?;

    log::debug!(
        "spacing: dx=({:.3}, {:.3}) dy=({:.3}, {:.3}) angle={:.2}deg support={}/{} of {}",
        dx.x,
        dx.y,
        dy.x,
        dy.y,
        model.angle_deg(),
        column_support,
        row_support,
        total
    );

    if model.angle_deg().abs() > config.max_rotation_deg {
        return Err(GridError::RotationOutOfRange {
            angle_deg: model.angle_deg(),
            max_deg: config.max_rotation_deg,
        });
    }

    if let Some(expected) = config.expected_spacing {
        let estimated = model.spacing();
        let off = |est: f64, exp: f64| (est - exp).abs() / exp > config.spacing_tolerance;
        if off(estimated.0, expected.0) || off(estimated.1, expected.1) {
            return Err(GridError::SpacingOutOfTolerance {
                expected,
                estimated,
                tolerance: config.spacing_tolerance,
            });
        }
    }

    Ok(model)
}

#[derive(Debug, Clone, Copy)]
struct FamilyFit {
    length: f64,
    angle: f64,
    support: usize,
}

/// Median length and direction of one displacement family around `axis`.
///
/// The direction is recentered on the family's own median [`FAMILY_PASSES`]
/// times before the length is taken along it.
fn fit_family(members: &[Vector2<f64>], axis: f64) -> Option<FamilyFit> {
    let (mut inliers, mut angle) = family_pass(members, axis)?;
    for _ in 1..FAMILY_PASSES {
        (inliers, angle) = family_pass(members, angle)?;
    }

    let refined = Vector2::new(angle.cos(), angle.sin());
    let mut lengths: Vec<f64> = inliers.iter().map(|v| v.dot(&refined).abs()).collect();
    let length = median(&mut lengths)?;

    Some(FamilyFit {
        length,
        angle,
        support: inliers.len(),
    })
}

/// Members within [`ANGLE_TOLERANCE_DEG`] of `angle` and of typical length,
/// with the median direction of those members.
fn family_pass(members: &[Vector2<f64>], angle: f64) -> Option<(Vec<Vector2<f64>>, f64)> {
    let tolerance = ANGLE_TOLERANCE_DEG.to_radians();
    let aligned: Vec<(Vector2<f64>, f64)> = members
        .iter()
        .map(|&v| (v, wrap_half_turn(v.y.atan2(v.x) - angle)))
        .filter(|(_, deviation)| deviation.abs() <= tolerance)
        .collect();

    let unit = Vector2::new(angle.cos(), angle.sin());
    let mut lengths: Vec<f64> = aligned.iter().map(|(v, _)| v.dot(&unit).abs()).collect();
    let typical = median(&mut lengths)?;
    let (inliers, mut deviations): (Vec<Vector2<f64>>, Vec<f64>) = aligned
        .into_iter()
        .filter(|(v, _)| (v.dot(&unit).abs() - typical).abs() <= LENGTH_TOLERANCE * typical)
        .unzip();
    if inliers.len() < MIN_FAMILY_SUPPORT {
        return None;
    }

    let shift = median(&mut deviations)?;
    Some((inliers, angle + shift))
}

/// Up to [`NEIGHBORS_PER_SAMPLE`] nearest-neighbor displacements for an
/// evenly strided sample of at most `sample_size` points, folded into the
/// half-plane of angles in (-90°, 90°].
fn neighbor_displacements(points: &[Vector2<f64>], sample_size: usize) -> Vec<Vector2<f64>> {
    let stride = points.len().div_ceil(sample_size.max(1)).max(1);
    let mut out = Vec::with_capacity(points.len().div_ceil(stride) * NEIGHBORS_PER_SAMPLE);
    let mut nearest: Vec<(f64, usize)> = Vec::with_capacity(NEIGHBORS_PER_SAMPLE + 1);

    for i in (0..points.len()).step_by(stride) {
        let p = points[i];
        nearest.clear();
        for (j, q) in points.iter().enumerate() {
            let d2 = (q - p).norm_squared();
            if j == i || d2 <= EPS {
                continue;
            }
            if nearest.len() == NEIGHBORS_PER_SAMPLE && d2 >= nearest[NEIGHBORS_PER_SAMPLE - 1].0 {
                continue;
            }
            let at = nearest.partition_point(|&(d, _)| d <= d2);
            nearest.insert(at, (d2, j));
            nearest.truncate(NEIGHBORS_PER_SAMPLE);
        }
        out.extend(nearest.iter().map(|&(_, j)| fold_half_plane(points[j] - p)));
    }

    out
}

/// Lattice orientation in [-45°, 45°), as radians.
///
/// Row and column displacements coincide once angles are folded modulo 90°,
/// so the mode of a smoothed histogram over that range gives a coarse
/// orientation shared by both families. The estimate is then moved to the
/// median of the angles within [`ORIENTATION_WINDOW_DEG`] of it until it
/// settles.
fn dominant_orientation(displacements: &[Vector2<f64>]) -> Option<f64> {
    if displacements.is_empty() {
        return None;
    }

    let folded: Vec<f64> = displacements
        .iter()
        .map(|v| v.y.atan2(v.x).to_degrees().rem_euclid(90.0))
        .collect();

    let mut histogram = [0usize; HISTOGRAM_BINS];
    for &deg in &folded {
        let bin = (deg.floor() as usize).min(HISTOGRAM_BINS - 1);
        histogram[bin] += 1;
    }

    let bins = HISTOGRAM_BINS as isize;
    let mut best_bin = 0usize;
    let mut best_score = 0usize;
    for bin in 0..bins {
        let score: usize = (-HISTOGRAM_SMOOTHING..=HISTOGRAM_SMOOTHING)
            .map(|k| histogram[(bin + k).rem_euclid(bins) as usize])
            .sum();
        if score > best_score {
            best_score = score;
            best_bin = bin as usize;
        }
    }

    let mut estimate = best_bin as f64 + 0.5;
    for _ in 0..ORIENTATION_PASSES {
        let mut near: Vec<f64> = folded
            .iter()
            .map(|&deg| wrap_quarter_turn_deg(deg - estimate))
            .filter(|d| d.abs() <= ORIENTATION_WINDOW_DEG)
            .collect();
        let Some(shift) = median(&mut near) else {
            break;
        };
        estimate = wrap_quarter_turn_deg(estimate + shift);
        if shift.abs() <= EPS {
            break;
        }
    }
    Some(estimate.to_radians())
}

fn count_distinct(points: &[Vector2<f64>]) -> usize {
    let mut keys: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
    keys.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    keys.dedup();
    keys.len()
}

fn fold_half_plane(v: Vector2<f64>) -> Vector2<f64> {
    if v.x < 0.0 || (v.x == 0.0 && v.y < 0.0) {
        -v
    } else {
        v
    }
}

/// Wraps an angle into [-π/2, π/2).
fn wrap_half_turn(radians: f64) -> f64 {
    (radians + FRAC_PI_2).rem_euclid(PI) - FRAC_PI_2
}

/// Wraps an angle in degrees into [-45, 45).
fn wrap_quarter_turn_deg(degrees: f64) -> f64 {
    (degrees + 45.0).rem_euclid(90.0) - 45.0
}

/// Median with the mean of the two middle values for even counts.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}
