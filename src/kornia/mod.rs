pub mod anoto;
pub use anoto::{
    DetectionError, detect_grid_in_image, detect_observations, mask_from_image, otsu_threshold,
};
