use crate::config::GridConfig;
use crate::error::{GridError, GridWarning};
use crate::extract::{Extractor, Mask};
use crate::grid::{Grid, materialize};
use crate::indexer::{Lattice, index_observations};
use crate::observation::Observation;
use crate::origin::resolve_origin;
use crate::spacing::{SpacingModel, estimate_spacing};

/// Outcome of a successful detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDetection {
    pub grid: Grid,
    /// Spacing as estimated from neighbor displacements, before refinement.
    pub spacing: SpacingModel,
    /// Refined lattice the observations were indexed against.
    pub lattice: Lattice,
    /// Number of observations that ended up in a grid cell.
    pub observations_used: usize,
    pub warnings: Vec<GridWarning>,
}

/// Runs spacing estimation, indexing, origin resolution and
/// materialization over already extracted dot observations.
pub fn detect_grid(
    observations: &[Observation],
    config: &GridConfig,
) -> Result<GridDetection, GridError> {
    config.validate()?;

    let spacing = estimate_spacing(observations, config)?;

    let index = index_observations(observations, &spacing);
    let frame = resolve_origin(&index, config.max_extent)?;
    let grid = materialize(&index, &frame, config.symbol_min_offset);

    for warning in &index.warnings {
        log::debug!("{warning}");
    }
    log::debug!(
        "grid {}x{} with {} of {} observations placed",
        grid.rows,
        grid.cols,
        grid.present_count(),
        observations.len()
    );

    Ok(GridDetection {
        observations_used: grid.present_count(),
        grid,
        spacing,
        lattice: index.lattice,
        warnings: index.warnings,
    })
}

/// Extracts observations from `mask` and runs [`detect_grid`] on them.
pub fn detect_grid_in_mask(
    extractor: &impl Extractor,
    mask: &Mask,
    config: &GridConfig,
) -> Result<GridDetection, GridError> {
    config.validate()?;
    let observations = extractor.extract(mask);
    detect_grid(&observations, config)
}
