use serde::Serialize;

/// Hard failures of a grid detection run.
///
/// Each stage fails closed: the pipeline stops at the first of these rather
/// than returning a plausible but wrong grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("found {found} distinct dot positions, at least 2 are needed")]
    InsufficientObservations { found: usize },

    #[error(
        "no regular dot pattern: {reason} ({displacements} displacements, \
         column support {column_support}, row support {row_support})"
    )]
    InsufficientPattern {
        reason: &'static str,
        displacements: usize,
        column_support: usize,
        row_support: usize,
    },

    #[error(
        "estimated spacing ({:.2}, {:.2}) differs from expected ({:.2}, {:.2}) by more than {:.0}%",
        .estimated.0, .estimated.1, .expected.0, .expected.1, .tolerance * 100.0
    )]
    SpacingOutOfTolerance {
        expected: (f64, f64),
        estimated: (f64, f64),
        tolerance: f64,
    },

    #[error("pattern rotated by {angle_deg:.2} degrees, limit is {max_deg:.2}")]
    RotationOutOfRange { angle_deg: f64, max_deg: f64 },

    #[error("grid of {rows}x{cols} cells exceeds the {max_extent} cell limit per axis")]
    GridTooLarge { rows: u64, cols: u64, max_extent: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Non-fatal conditions collected alongside a successful grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GridWarning {
    /// Two observations claimed the same cell; the one further from the
    /// nominal intersection was dropped.
    DuplicateObservationDiscarded {
        row: i64,
        col: i64,
        kept: usize,
        discarded: usize,
        kept_residual: f64,
        discarded_residual: f64,
    },
    NonFiniteObservationSkipped { observation: usize },
}

impl std::fmt::Display for GridWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateObservationDiscarded {
                row,
                col,
                kept,
                discarded,
                kept_residual,
                discarded_residual,
            } => write!(
                f,
                "cell ({row}, {col}): kept observation {kept} ({kept_residual:.2}px), \
                 discarded {discarded} ({discarded_residual:.2}px)"
            ),
            Self::NonFiniteObservationSkipped { observation } => {
                write!(f, "observation {observation} has a non-finite position")
            }
        }
    }
}
