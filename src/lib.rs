//! Grid reconstruction for Anoto-style dot patterns.
//!
//! Detected ink dots flow through five stages: component extraction
//! ([`extract`]), spacing estimation ([`spacing`]), grid indexing
//! ([`indexer`]), origin resolution ([`origin`]) and materialization
//! ([`grid`]). [`pipeline::detect_grid`] runs them in order.

pub mod config;
pub mod error;
pub mod extract;
pub mod grid;
pub mod indexer;
pub mod kornia;
pub mod observation;
pub mod origin;
pub mod pipeline;
pub mod plot_grid;
pub mod spacing;

pub use config::{Connectivity, GridConfig};
pub use error::{GridError, GridWarning};
pub use extract::{ConnectedComponents, Extractor, Mask};
pub use grid::{Grid, Symbol};
pub use indexer::{GridIndex, IndexedObservation, Lattice};
pub use observation::{BoundingBox, Observation};
pub use origin::OriginFrame;
pub use pipeline::{GridDetection, detect_grid, detect_grid_in_mask};
pub use spacing::SpacingModel;
