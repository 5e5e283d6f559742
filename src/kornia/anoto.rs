//! Raster front end: binarizes a decoded image with kornia and hands the
//! resulting mask to the grid pipeline.

use image::DynamicImage;
use kornia::{
    image::{Image, ImageError, ImageSize, allocator::CpuAllocator},
    imgproc,
};

use crate::config::GridConfig;
use crate::error::GridError;
use crate::extract::{ConnectedComponents, Extractor, Mask};
use crate::observation::Observation;
use crate::pipeline::{GridDetection, detect_grid};

type CpuImage<T, const C: usize> = Image<T, C, CpuAllocator>;

/// Errors from the raster path.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("kornia image error: {0}")]
    Kornia(#[from] ImageError),
    #[error("binarized buffer of {len} bytes does not match a {width}x{height} image")]
    BufferSize { width: usize, height: usize, len: usize },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Binarizes `source` so that ink dots become foreground.
///
/// With `threshold` set, pixels at or below it are ink; with `None` the
/// threshold comes from Otsu's method. A mask that ends up mostly
/// foreground is inverted, which handles light dots on a dark scan.
pub fn mask_from_image(source: &DynamicImage, threshold: Option<u8>) -> Result<Mask, DetectionError> {
    let rgb = source.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    if width == 0 || height == 0 {
        return Mask::new(width, height).ok_or(DetectionError::BufferSize { width, height, len: 0 });
    }

    let image = CpuImage::<u8, 3>::new(ImageSize { width, height }, rgb.into_raw(), CpuAllocator)?;
    let mut gray = CpuImage::<u8, 1>::from_size_val(image.size(), 0u8, CpuAllocator)?;
    imgproc::color::gray_from_rgb_u8(&image, &mut gray)?;

    let threshold = threshold.unwrap_or_else(|| otsu_threshold(gray.as_slice()));
    let mut binary = CpuImage::<u8, 1>::from_size_val(gray.size(), 0u8, CpuAllocator)?;
    imgproc::threshold::threshold_binary(&gray, &mut binary, threshold, 255)?;

    // Pixels at or below the threshold come out as 0.
    let pixels = binary.as_slice();
    let mut mask = Mask::from_luma(width, height, pixels, 0).ok_or(DetectionError::BufferSize {
        width,
        height,
        len: pixels.len(),
    })?;
    if mask.foreground_count() * 2 > width * height {
        log::debug!("mask is mostly foreground, inverting");
        mask.invert();
    }

    log::debug!(
        "binarized {width}x{height} image at threshold {threshold}: {} foreground pixels",
        mask.foreground_count()
    );
    Ok(mask)
}

/// Dot observations found in `source` under `config`.
pub fn detect_observations(
    source: &DynamicImage,
    config: &GridConfig,
) -> Result<Vec<Observation>, DetectionError> {
    config.validate()?;
    let mask = mask_from_image(source, config.threshold)?;
    Ok(ConnectedComponents::from_config(config).extract(&mask))
}

/// Full raster-to-grid run.
pub fn detect_grid_in_image(
    source: &DynamicImage,
    config: &GridConfig,
) -> Result<GridDetection, DetectionError> {
    let observations = detect_observations(source, config)?;
    Ok(detect_grid(&observations, config)?)
}

/// Threshold maximizing the between-class variance of the gray histogram.
pub fn otsu_threshold(pixels: &[u8]) -> u8 {
    let mut histogram = [0u64; 256];
    for &value in pixels {
        histogram[value as usize] += 1;
    }

    let total = pixels.len() as f64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut sum_dark = 0f64;
    let mut weight_dark = 0f64;
    let mut best_variance = f64::MIN;
    let mut threshold = 0u8;

    for (value, &count) in histogram.iter().enumerate() {
        weight_dark += count as f64;
        if weight_dark == 0.0 {
            continue;
        }
        let weight_light = total - weight_dark;
        if weight_light == 0.0 {
            break;
        }
        sum_dark += value as f64 * count as f64;

        let mean_dark = sum_dark / weight_dark;
        let mean_light = (sum_total - sum_dark) / weight_light;
        let variance = weight_dark * weight_light * (mean_dark - mean_light).powi(2);
        if variance > best_variance {
            best_variance = variance;
            threshold = value as u8;
        }
    }

    threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// 3x3 dark squares every `step` pixels on a light page.
    fn page(rows: u32, cols: u32, step: u32, ink: u8, paper: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn((cols + 1) * step, (rows + 1) * step, |x, y| {
            let on = (1..=cols).any(|c| x.abs_diff(c * step) <= 1)
                && (1..=rows).any(|r| y.abs_diff(r * step) <= 1);
            let v = if on { ink } else { paper };
            Rgb([v, v, v])
        }))
    }

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let mut pixels = vec![30u8; 100];
        pixels.extend(std::iter::repeat_n(220u8, 300));
        let t = otsu_threshold(&pixels);
        assert!((30..220).contains(&t), "threshold {t}");
    }

    #[test]
    fn empty_image_gives_empty_mask() {
        let mask = mask_from_image(&DynamicImage::new_rgb8(0, 0), Some(127)).expect("mask");
        assert!(mask.is_empty());
    }

    #[test]
    fn dark_pixels_become_foreground() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(4, 4, |x, _| {
            if x == 0 { Rgb([10, 10, 10]) } else { Rgb([240, 240, 240]) }
        }));
        let mask = mask_from_image(&img, Some(127)).expect("mask");
        assert_eq!(mask.foreground_count(), 4);
        assert!(mask.get(0, 3));
        assert!(!mask.get(1, 3));
    }

    #[test]
    fn mostly_dark_masks_are_inverted() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(4, 4, |x, _| {
            if x == 0 { Rgb([240, 240, 240]) } else { Rgb([10, 10, 10]) }
        }));
        let mask = mask_from_image(&img, Some(127)).expect("mask");
        assert_eq!(mask.foreground_count(), 4);
        assert!(mask.get(0, 0));
    }

    #[test]
    fn drawn_dots_are_detected() {
        let img = page(4, 5, 12, 20, 230);
        let observations = detect_observations(&img, &GridConfig::default()).expect("observations");
        assert_eq!(observations.len(), 20);
        for obs in &observations {
            assert_eq!(obs.area, 9.0);
        }

        let detection = detect_grid_in_image(&img, &GridConfig::default()).expect("grid");
        assert_eq!((detection.grid.rows, detection.grid.cols), (4, 5));
        assert_eq!(detection.grid.present_count(), 20);
    }

    #[test]
    fn otsu_path_matches_fixed_threshold() {
        let img = page(3, 3, 10, 60, 200);
        let config = GridConfig {
            threshold: None,
            ..GridConfig::default()
        };
        let detection = detect_grid_in_image(&img, &config).expect("grid");
        assert_eq!((detection.grid.rows, detection.grid.cols), (3, 3));
    }

    #[test]
    fn blank_page_has_no_grid() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 30, Rgb([250, 250, 250])));
        let err = detect_grid_in_image(&img, &GridConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DetectionError::Grid(GridError::InsufficientObservations { found: 0 })
        ));
    }
}
