//! Diagnostic overlay of a detected grid, rendered with plotters.

use plotters::prelude::*;

use crate::grid::Symbol;
use crate::observation::Observation;
use crate::pipeline::GridDetection;

const LATTICE: RGBColor = RGBColor(210, 210, 210);
const RAW_DOT: RGBColor = RGBColor(150, 150, 150);
const CENTERED: RGBColor = RGBColor(40, 40, 40);
const MISSING: RGBColor = RGBColor(220, 40, 40);
const UP: RGBColor = RGBColor(110, 170, 90);
const DOWN: RGBColor = RGBColor(230, 130, 30);
const LEFT: RGBColor = RGBColor(60, 110, 220);
const RIGHT: RGBColor = RGBColor(210, 70, 210);

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("{width}x{height} canvas is too large")]
    CanvasTooLarge { width: u32, height: u32 },
    #[error("drawing failed: {0}")]
    Draw(String),
}

fn draw_err(e: impl std::fmt::Display) -> PlotError {
    PlotError::Draw(e.to_string())
}

fn symbol_color(symbol: Option<Symbol>) -> RGBColor {
    match symbol {
        Some(Symbol::Up) => UP,
        Some(Symbol::Down) => DOWN,
        Some(Symbol::Left) => LEFT,
        Some(Symbol::Right) => RIGHT,
        None => CENTERED,
    }
}

fn to_px((x, y): (f64, f64)) -> (i32, i32) {
    (x.round() as i32, y.round() as i32)
}

/// Renders the overlay as a `width * height` RGBA buffer.
///
/// Lattice lines run through every row and column of cell centers. Raw
/// observations are small grey dots, occupied cells get a filled marker
/// colored by symbol and empty cells a hollow red ring.
pub fn render_grid_overlay_rgba(
    width: u32,
    height: u32,
    observations: &[Observation],
    detection: &GridDetection,
) -> Result<Vec<u8>, PlotError> {
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .filter(|n| n.checked_mul(4).is_some())
        .ok_or(PlotError::CanvasTooLarge { width, height })?;

    let grid = &detection.grid;
    let mut rgb = vec![255u8; pixel_count * 3];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        if grid.rows > 0 && grid.cols > 0 {
            let (last_row, last_col) = (grid.rows - 1, grid.cols - 1);
            for r in 0..grid.rows {
                let line = [to_px(grid.cell_center(r, 0)), to_px(grid.cell_center(r, last_col))];
                root.draw(&PathElement::new(line, LATTICE)).map_err(draw_err)?;
            }
            for c in 0..grid.cols {
                let line = [to_px(grid.cell_center(0, c)), to_px(grid.cell_center(last_row, c))];
                root.draw(&PathElement::new(line, LATTICE)).map_err(draw_err)?;
            }
        }

        for obs in observations.iter().filter(|o| o.is_finite()) {
            root.draw(&Circle::new(to_px(obs.position), 2, RAW_DOT.filled()))
                .map_err(draw_err)?;
        }

        for r in 0..grid.rows {
            for c in 0..grid.cols {
                let center = to_px(grid.cell_center(r, c));
                if grid.get(r, c) {
                    let color = symbol_color(grid.symbol(r, c));
                    root.draw(&Circle::new(center, 4, color.filled()))
                        .map_err(draw_err)?;
                } else {
                    root.draw(&Circle::new(center, 4, MISSING.stroke_width(1)))
                        .map_err(draw_err)?;
                }
            }
        }

        root.present().map_err(draw_err)?;
    }

    let mut rgba = Vec::with_capacity(pixel_count * 4);
    for px in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    Ok(rgba)
}
