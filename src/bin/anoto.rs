use clap::{ArgGroup, Parser};
use image::GenericImageView;
use std::error::Error;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anoto_grid::{Grid, GridConfig};
use anoto_grid::kornia::detect_observations;
use anoto_grid::pipeline::detect_grid;
use anoto_grid::plot_grid::render_grid_overlay_rgba;

#[derive(Parser, Debug)]
#[command(
    name = "anoto",
    about = "Reconstruct the dot grid of Anoto pattern images as JSON, arrow text and overlay plots",
    version,
    group(
        ArgGroup::new("input")
            .required(true)
            .args(["dir", "image"])
    ),
    group(
        ArgGroup::new("action")
            .required(true)
            .multiple(true)
            .args(["plot", "grid", "arrows"])
    )
)]
struct Cli {
    /// Directory containing input images
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Input image (repeatable)
    #[arg(short = 'i', long = "image")]
    image: Vec<PathBuf>,

    /// JSON configuration file; flags below override its values
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Fixed binarization threshold (0-255)
    #[arg(long, conflicts_with = "otsu")]
    threshold: Option<u8>,

    /// Pick the binarization threshold with Otsu's method
    #[arg(long)]
    otsu: bool,

    /// Smallest dot area in pixels
    #[arg(long = "min-area")]
    min_area: Option<usize>,

    /// Expected column and row spacing in pixels, as DX,DY
    #[arg(long, value_parser = parse_spacing)]
    spacing: Option<(f64, f64)>,

    /// Allowed relative deviation from --spacing
    #[arg(long)]
    tolerance: Option<f64>,

    /// Largest accepted pattern rotation in degrees, below 45
    #[arg(long = "max-rotation")]
    max_rotation: Option<f64>,

    /// Output directory
    #[arg(short = 'o', long = "out", default_value = ".")]
    out: PathBuf,

    /// Write overlay plot PNGs
    #[arg(long = "plot", short = 'p')]
    plot: bool,

    /// Write the grid as JSON
    #[arg(long = "grid", short = 'g')]
    grid: bool,

    /// Write the arrow grid as text and JSON
    #[arg(long = "arrows", short = 'a')]
    arrows: bool,
}

fn parse_spacing(s: &str) -> Result<(f64, f64), String> {
    let (dx, dy) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got {s:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid spacing {v:?}: {e}"))
    };
    Ok((parse(dx)?, parse(dy)?))
}

fn is_image_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "bmp" | "gif" | "tif" | "tiff" | "webp"
    )
}

fn write_text_file(path: &Path, contents: &str) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<GridConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => GridConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => GridConfig::default(),
    };
    if cli.otsu {
        config.threshold = None;
    }
    if let Some(t) = cli.threshold {
        config.threshold = Some(t);
    }
    if let Some(min_area) = cli.min_area {
        config.min_area = min_area;
    }
    if let Some(spacing) = cli.spacing {
        config.expected_spacing = Some(spacing);
    }
    if let Some(tolerance) = cli.tolerance {
        config.spacing_tolerance = tolerance;
    }
    if let Some(max_rotation) = cli.max_rotation {
        config.max_rotation_deg = max_rotation;
    }
    config.validate()?;
    Ok(config)
}

fn collect_images(cli: &Cli) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut images = cli.image.clone();
    if let Some(dir) = &cli.dir {
        if !dir.is_dir() {
            return Err(format!("Not a directory: {}", dir.display()).into());
        }
        let mut found: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        found.sort();
        images.extend(found);
    }
    Ok(images)
}

fn process(cli: &Cli, config: &GridConfig, i: usize, image_path: &Path) -> Result<(), Box<dyn Error>> {
    let img = image::open(image_path)?;
    let observations = detect_observations(&img, config)?;
    let detection = detect_grid(&observations, config)?;
    log::info!(
        "{}: {}x{} grid, {} dots placed, {} warnings",
        image_path.display(),
        detection.grid.rows,
        detection.grid.cols,
        detection.observations_used,
        detection.warnings.len()
    );
    write_grid_outputs(cli, i, &detection.grid)?;
    if !cli.plot {
        return Ok(());
    }

    let out_plot = cli.out.join(format!("anoto_{i}_plot.png"));
    let (w, h) = img.dimensions();
    let pixels = render_grid_overlay_rgba(w, h, &observations, &detection)?;
    let rgba = image::RgbaImage::from_raw(w, h, pixels)
        .ok_or_else(|| format!("Failed to build RGBA image for plot {} ({w}x{h})", out_plot.display()))?;
    fs::create_dir_all(&cli.out)?;
    rgba.save(&out_plot)?;
    Ok(())
}

fn write_grid_outputs(cli: &Cli, i: usize, grid: &Grid) -> Result<(), Box<dyn Error>> {
    if cli.grid {
        let out_grid = cli.out.join(format!("anoto_{i}_grid.json"));
        write_text_file(&out_grid, &serde_json::to_string_pretty(grid)?)?;
    }
    if cli.arrows {
        write_text_file(&cli.out.join(format!("anoto_{i}_arrows.txt")), &grid.to_arrow_text())?;
        write_text_file(&cli.out.join(format!("anoto_{i}_arrows.json")), &grid.to_arrow_json())?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let images = collect_images(&cli)?;
    if images.is_empty() {
        log::warn!("No images to process");
        return Ok(());
    }

    for (i, image_path) in images.iter().enumerate() {
        if let Err(e) = process(&cli, &config, i, image_path) {
            log::warn!("Skipping {}: {e}", image_path.display());
        }
    }

    Ok(())
}
