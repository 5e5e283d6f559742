//! Assigns each observation an integer (row, column) address.

use std::collections::{BTreeMap, HashMap, btree_map, hash_map};
use std::f64::consts::TAU;

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::error::GridWarning;
use crate::observation::Observation;
use crate::spacing::{SpacingModel, median};

/// Observations further than this from their cell, in lattice units, are
/// left out of the least-squares refit.
const REFIT_MAX_OFFSET: f64 = 0.35;
/// Cell reach around the anchor for each refit pass; `None` takes every cell.
const REFIT_REACH: [Option<u64>; 5] = [Some(2), Some(4), Some(8), None, None];
/// Only observations within this many cells of the anchor set the phase.
const PHASE_REACH: f64 = 2.5;
/// A refit may change a step vector by at most this fraction of its length.
const REFIT_MAX_CHANGE: f64 = 0.25;
const EPS: f64 = 1e-9;
/// Residuals closer than this, in pixels, count as a tie.
const TIE_EPS: f64 = 1e-9;

/// A spacing model pinned to the pixel position of lattice cell (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    origin: Vector2<f64>,
    model: SpacingModel,
}

impl Lattice {
    pub fn new(origin: Vector2<f64>, model: SpacingModel) -> Self {
        Self { origin, model }
    }

    pub fn origin(&self) -> Vector2<f64> {
        self.origin
    }

    pub fn model(&self) -> &SpacingModel {
        &self.model
    }

    /// Pixel position of a (possibly fractional) lattice address.
    pub fn cell_center(&self, row: f64, col: f64) -> Vector2<f64> {
        self.origin + self.model.to_pixels(Vector2::new(col, row))
    }

    /// Real-valued (column, row) address of a pixel position.
    pub fn locate(&self, pixel: Vector2<f64>) -> Vector2<f64> {
        self.model.to_basis(pixel - self.origin)
    }
}

/// One observation placed on the lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedObservation {
    /// Position of the observation in the input slice.
    pub observation: usize,
    pub row: i64,
    pub col: i64,
    /// Displacement from the nominal intersection as (column, row) cell units.
    pub offset: (f64, f64),
    /// Distance from the nominal intersection in pixels.
    pub residual: f64,
}

/// Sparse lattice addresses; unoccupied cells are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct GridIndex {
    pub lattice: Lattice,
    pub entries: Vec<IndexedObservation>,
    pub warnings: Vec<GridWarning>,
}

/// Places every finite observation on the lattice described by `model`.
///
/// The sub-cell phase is taken from the circular mean of the fractional
/// addresses around the anchor. Origin and basis are then refitted by least
/// squares over a window of cells that widens pass by pass, before the final
/// rounding. When two observations round to the same cell the one with
/// the smaller residual wins; on an exact tie the earlier one is kept.
pub fn index_observations(observations: &[Observation], model: &SpacingModel) -> GridIndex {
    let mut warnings = Vec::new();
    let mut points = Vec::with_capacity(observations.len());
    for (idx, obs) in observations.iter().enumerate() {
        if obs.is_finite() {
            points.push((idx, Vector2::new(obs.position.0, obs.position.1)));
        } else {
            warnings.push(GridWarning::NonFiniteObservationSkipped { observation: idx });
        }
    }

    let Some(anchor) = lower_median_position(&points) else {
        return GridIndex {
            lattice: Lattice::new(Vector2::zeros(), *model),
            entries: Vec::new(),
            warnings,
        };
    };

    let phase = circular_phase(&points, anchor, model);
    let mut lattice = Lattice::new(anchor + model.to_pixels(phase), *model);
    for reach in REFIT_REACH {
        if let Some(refined) = refit(&points, &lattice, reach) {
            lattice = refined;
        }
    }

    let entries = assign(&points, &lattice, &mut warnings);
    log::debug!(
        "indexed {} of {} observations, {} warnings",
        entries.len(),
        observations.len(),
        warnings.len()
    );

    GridIndex {
        lattice,
        entries,
        warnings,
    }
}

fn assign(
    points: &[(usize, Vector2<f64>)],
    lattice: &Lattice,
    warnings: &mut Vec<GridWarning>,
) -> Vec<IndexedObservation> {
    let mut entries: Vec<IndexedObservation> = Vec::with_capacity(points.len());
    let mut slots: HashMap<(i64, i64), usize> = HashMap::with_capacity(points.len());

    for &(observation, pixel) in points {
        let address = lattice.locate(pixel);
        let cell = address.map(f64::round);
        let offset = address - cell;
        let candidate = IndexedObservation {
            observation,
            row: cell.y as i64,
            col: cell.x as i64,
            offset: (offset.x, offset.y),
            residual: lattice.model().to_pixels(offset).norm(),
        };

        match slots.entry((candidate.row, candidate.col)) {
            hash_map::Entry::Vacant(slot) => {
                slot.insert(entries.len());
                entries.push(candidate);
            }
            hash_map::Entry::Occupied(slot) => {
                let held = &mut entries[*slot.get()];
                let (kept, discarded) = if candidate.residual < held.residual - TIE_EPS {
                    let previous = *held;
                    *held = candidate;
                    (candidate, previous)
                } else {
                    (*held, candidate)
                };
                log::trace!(
                    "cell ({}, {}): discarding observation {} in favour of {}",
                    kept.row,
                    kept.col,
                    discarded.observation,
                    kept.observation
                );
                warnings.push(GridWarning::DuplicateObservationDiscarded {
                    row: kept.row,
                    col: kept.col,
                    kept: kept.observation,
                    discarded: discarded.observation,
                    kept_residual: kept.residual,
                    discarded_residual: discarded.residual,
                });
            }
        }
    }

    entries
}

/// Component-wise lower median, so the anchor of an exact lattice lies on it.
fn lower_median_position(points: &[(usize, Vector2<f64>)]) -> Option<Vector2<f64>> {
    if points.is_empty() {
        return None;
    }
    let mut xs: Vec<f64> = points.iter().map(|(_, p)| p.x).collect();
    let mut ys: Vec<f64> = points.iter().map(|(_, p)| p.y).collect();
    xs.sort_by(f64::total_cmp);
    ys.sort_by(f64::total_cmp);
    let mid = (points.len() - 1) / 2;
    Some(Vector2::new(xs[mid], ys[mid]))
}

/// Sub-cell offset of the lattice relative to `anchor`, in (column, row) units.
fn circular_phase(
    points: &[(usize, Vector2<f64>)],
    anchor: Vector2<f64>,
    model: &SpacingModel,
) -> Vector2<f64> {
    let mut sums = [(0f64, 0f64); 2];
    for (_, p) in points {
        let address = model.to_basis(p - anchor);
        if address.x.abs() > PHASE_REACH || address.y.abs() > PHASE_REACH {
            continue;
        }
        for (sum, value) in sums.iter_mut().zip([address.x, address.y]) {
            let theta = TAU * value;
            sum.0 += theta.cos();
            sum.1 += theta.sin();
        }
    }
    let phase = |(c, s): (f64, f64)| {
        if c.hypot(s) <= EPS * points.len() as f64 {
            0.0
        } else {
            s.atan2(c) / TAU
        }
    };
    Vector2::new(phase(sums[0]), phase(sums[1]))
}

/// Least-squares fit of origin and step vectors to the provisional addresses
/// of cells within `reach` of cell (0, 0).
fn refit(points: &[(usize, Vector2<f64>)], lattice: &Lattice, reach: Option<u64>) -> Option<Lattice> {
    // Only the closest observation of each cell takes part.
    let mut closest: BTreeMap<(i64, i64), (f64, Vector2<f64>)> = BTreeMap::new();
    for (_, pixel) in points {
        let address = lattice.locate(*pixel);
        let cell = address.map(f64::round);
        let offset = address - cell;
        if offset.x.abs() > REFIT_MAX_OFFSET || offset.y.abs() > REFIT_MAX_OFFSET {
            continue;
        }
        let (row, col) = (cell.y as i64, cell.x as i64);
        if reach.is_some_and(|r| row.unsigned_abs() > r || col.unsigned_abs() > r) {
            continue;
        }
        let distance = offset.norm();
        match closest.entry((row, col)) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert((distance, *pixel));
            }
            btree_map::Entry::Occupied(mut slot) => {
                if distance < slot.get().0 {
                    slot.insert((distance, *pixel));
                }
            }
        }
    }

    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs_x = Vector3::<f64>::zeros();
    let mut rhs_y = Vector3::<f64>::zeros();
    let mut offsets = Vec::with_capacity(closest.len());
    let mut used = 0usize;

    for (&(row, col), &(distance, pixel)) in &closest {
        let design = Vector3::new(1.0, col as f64, row as f64);
        normal += design * design.transpose();
        rhs_x += design * pixel.x;
        rhs_y += design * pixel.y;
        offsets.push(distance);
        used += 1;
    }
    if used < 3 {
        return None;
    }

    let inverse = normal.try_inverse()?;
    let sx = inverse * rhs_x;
    let sy = inverse * rhs_y;
    let dx = Vector2::new(sx[1], sy[1]);
    let dy = Vector2::new(sx[2], sy[2]);

    let previous = lattice.model();
    let drifted = |new: Vector2<f64>, old: Vector2<f64>| (new - old).norm() > REFIT_MAX_CHANGE * old.norm();
    if drifted(dx, previous.dx()) || drifted(dy, previous.dy()) {
        log::debug!("refit rejected: step vectors moved too far");
        return None;
    }

    let model = SpacingModel::from_basis(dx, dy)?;
    let origin = Vector2::new(sx[0], sy[0]);
    if !(origin.x.is_finite() && origin.y.is_finite()) {
        return None;
    }
    log::trace!(
        "refit over {used} observations, median offset {:.4} cells",
        median(&mut offsets).unwrap_or(0.0)
    );
    Some(Lattice::new(origin, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square_model(step: f64) -> SpacingModel {
        SpacingModel::from_basis(Vector2::new(step, 0.0), Vector2::new(0.0, step)).expect("basis")
    }

    fn dots(coords: &[(f64, f64)]) -> Vec<Observation> {
        coords.iter().map(|&(x, y)| Observation::at(x, y)).collect()
    }

    fn cell_of(index: &GridIndex, observation: usize) -> Option<(i64, i64)> {
        index
            .entries
            .iter()
            .find(|e| e.observation == observation)
            .map(|e| (e.row, e.col))
    }

    #[test]
    fn addresses_follow_the_basis() {
        let obs = dots(&[(10.0, 10.0), (30.0, 10.0), (10.0, 30.0), (50.0, 50.0)]);
        let index = index_observations(&obs, &square_model(20.0));
        assert!(index.warnings.is_empty());
        let origin = cell_of(&index, 0).expect("indexed");
        let rel = |i| {
            let (r, c) = cell_of(&index, i).expect("indexed");
            (r - origin.0, c - origin.1)
        };
        assert_eq!(rel(1), (0, 1));
        assert_eq!(rel(2), (1, 0));
        assert_eq!(rel(3), (2, 2));
    }

    #[test]
    fn lattice_passes_through_exact_dots() {
        let obs = dots(&[(19.0, 19.0), (39.0, 19.0), (19.0, 39.0), (39.0, 39.0), (59.0, 59.0)]);
        let index = index_observations(&obs, &square_model(20.0));
        for entry in &index.entries {
            assert!(entry.residual < 1e-6, "residual {}", entry.residual);
        }
        assert_eq!(index.entries.len(), 5);
    }

    #[test]
    fn gaps_are_not_filled() {
        let obs = dots(&[(0.0, 0.0), (20.0, 0.0), (60.0, 0.0), (0.0, 20.0), (60.0, 20.0)]);
        let index = index_observations(&obs, &square_model(20.0));
        assert_eq!(index.entries.len(), 5);
        let (r0, c0) = cell_of(&index, 0).expect("indexed");
        let (r2, c2) = cell_of(&index, 2).expect("indexed");
        assert_eq!((r2 - r0, c2 - c0), (0, 3));
    }

    #[test]
    fn collision_keeps_the_closer_observation() {
        let mut coords = Vec::new();
        for r in 0..4 {
            for c in 0..4 {
                coords.push((c as f64 * 20.0, r as f64 * 20.0));
            }
        }
        // Two stray dots near the intersection of observation 5 at (20, 20).
        coords.push((23.0, 20.0));
        coords.push((20.5, 20.0));
        let obs = dots(&coords);
        let index = index_observations(&obs, &square_model(20.0));

        assert_eq!(index.entries.len(), 16);
        assert_eq!(index.warnings.len(), 2);
        let owner = index
            .entries
            .iter()
            .find(|e| e.observation == 5 || e.observation >= 16)
            .expect("cell occupied");
        assert_eq!(owner.observation, 5);
        for warning in &index.warnings {
            match warning {
                GridWarning::DuplicateObservationDiscarded {
                    kept,
                    discarded,
                    kept_residual,
                    discarded_residual,
                    ..
                } => {
                    assert_eq!(*kept, 5);
                    assert!(*discarded >= 16);
                    assert!(kept_residual < discarded_residual);
                }
                other => panic!("unexpected warning {other:?}"),
            }
        }
    }

    #[test]
    fn exact_tie_keeps_the_first_observation() {
        let mut coords = Vec::new();
        for r in 0..3 {
            for c in 0..3 {
                coords.push((c as f64 * 20.0, r as f64 * 20.0));
            }
        }
        // Symmetric pair around the empty intersection at (60, 20).
        coords.push((52.0, 20.0));
        coords.push((68.0, 20.0));
        let obs = dots(&coords);
        let index = index_observations(&obs, &square_model(20.0));
        let tie: Vec<_> = index
            .warnings
            .iter()
            .filter_map(|w| match w {
                GridWarning::DuplicateObservationDiscarded { kept, discarded, .. } => Some((*kept, *discarded)),
                _ => None,
            })
            .collect();
        assert_eq!(tie, vec![(9, 10)]);
        assert!(index.entries.iter().any(|e| e.observation == 9));
        assert!(!index.entries.iter().any(|e| e.observation == 10));
    }

    #[test]
    fn non_finite_positions_are_skipped() {
        let obs = dots(&[(0.0, 0.0), (f64::NAN, 3.0), (20.0, 0.0), (0.0, 20.0)]);
        let index = index_observations(&obs, &square_model(20.0));
        assert_eq!(index.entries.len(), 3);
        assert_eq!(
            index.warnings,
            vec![GridWarning::NonFiniteObservationSkipped { observation: 1 }]
        );
    }

    #[test]
    fn refit_corrects_a_biased_step() {
        let mut coords = Vec::new();
        for r in 0..10 {
            for c in 0..10 {
                coords.push((5.0 + c as f64 * 20.0, 7.0 + r as f64 * 20.0));
            }
        }
        let obs = dots(&coords);
        // Estimated step is 3% short; without the refit the far columns drift.
        let index = index_observations(&obs, &square_model(19.4));
        let (sx, sy) = index.lattice.model().spacing();
        assert_abs_diff_eq!(sx, 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sy, 20.0, epsilon = 1e-9);
        for entry in &index.entries {
            assert!(entry.residual < 1e-6);
        }
    }

    #[test]
    fn step_off_by_a_tenth_still_addresses_every_dot() {
        let mut coords = Vec::new();
        for r in 0..12 {
            for c in 0..12 {
                coords.push((5.0 + c as f64 * 20.0, 7.0 + r as f64 * 20.0));
            }
        }
        let obs = dots(&coords);
        for step in [18.0, 22.0] {
            let index = index_observations(&obs, &square_model(step));
            assert!(index.warnings.is_empty(), "step {step}: {:?}", index.warnings);
            assert_eq!(index.entries.len(), 144);
            let (r0, c0) = cell_of(&index, 0).expect("indexed");
            for (k, entry) in index.entries.iter().enumerate() {
                assert_eq!(entry.observation, k);
                assert_eq!((entry.row - r0, entry.col - c0), ((k / 12) as i64, (k % 12) as i64), "step {step}");
            }
            let (sx, sy) = index.lattice.model().spacing();
            assert_abs_diff_eq!(sx, 20.0, epsilon = 1e-9);
            assert_abs_diff_eq!(sy, 20.0, epsilon = 1e-9);
        }
    }
}
