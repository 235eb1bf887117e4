//! Board-finding and cell-extraction pipeline: binary mask preprocessing,
//! quadrilateral grid location, perspective rectification, per-cell
//! segmentation/cleanup, and solution overlay rendering.

pub mod cells;
pub mod overlay;
pub mod preprocess;
pub mod quad;
pub mod rectify;

pub use cells::{cell_regions, clean_cell, CellConfig, CellRegion};
pub use overlay::{annotate_digits, draw_quad_outline};
pub use preprocess::{preprocess, preprocess_gray, AdaptiveMethod, PreprocessConfig};
pub use quad::{locate_grid, Point2, Quad};
pub use rectify::{warp_gray, warp_rgba, Homography, RectifyMap};

use thiserror::Error;

/// Everything here is recoverable at per-frame or per-cell granularity;
/// none of these should ever terminate the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VisionError {
    #[error("no four-cornered grid outline located in the mask")]
    GridNotFound,
    #[error("detected quadrilateral has zero area")]
    DegenerateQuad,
    #[error("perspective transform is not invertible")]
    SingularTransform,
}
