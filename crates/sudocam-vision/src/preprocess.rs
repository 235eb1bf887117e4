use image::{GrayImage, RgbaImage};
use imageproc::distance_transform::Norm;
use tracing::debug;

/// Neighborhood weighting for the adaptive threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMethod {
    Mean,
    Gaussian,
}

/// Mask-producing preprocessing pipeline. Every stage can be toggled off
/// independently; the stage order is fixed.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessConfig {
    pub use_clahe: bool,
    pub clahe_clip_limit: f32,
    /// Number of tiles per image side for local equalization.
    pub clahe_tiles: u32,

    pub use_equalize_hist: bool,

    pub use_contrast: bool,
    /// Gain applied to every pixel.
    pub contrast_alpha: f32,
    /// Offset added to every pixel.
    pub brightness_beta: f32,

    pub use_bilateral: bool,
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,

    pub use_blur: bool,
    /// Gaussian kernel size in pixels; even values are bumped to odd.
    pub blur_size: u32,

    pub use_adaptive_threshold: bool,
    pub adaptive_method: AdaptiveMethod,
    /// Neighborhood side length; even values are bumped to odd.
    pub block_size: u32,
    /// Constant subtracted from the neighborhood mean.
    pub threshold_c: f32,

    pub use_edges: bool,
    pub canny_low: f32,
    pub canny_high: f32,

    pub use_morph_close: bool,
    /// Closing kernel radius (kernel side = 2r + 1).
    pub morph_radius: u8,
}

impl PreprocessConfig {
    /// Profile tuned for finding the board outline: aggressive local
    /// contrast, wide threshold neighborhood, closing to heal grid lines.
    pub fn board() -> Self {
        Self {
            use_clahe: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            use_equalize_hist: true,
            use_contrast: true,
            contrast_alpha: 1.0,
            brightness_beta: 0.0,
            use_bilateral: false,
            bilateral_diameter: 5,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            use_blur: true,
            blur_size: 5,
            use_adaptive_threshold: true,
            adaptive_method: AdaptiveMethod::Gaussian,
            block_size: 41,
            threshold_c: 20.0,
            use_edges: false,
            canny_low: 50.0,
            canny_high: 150.0,
            use_morph_close: true,
            morph_radius: 1,
        }
    }

    /// Profile tuned for isolating digit ink inside a single cell: no
    /// global equalization, tight threshold neighborhood, no closing
    /// (closing bridges strokes into the surrounding grid lines).
    pub fn glyph() -> Self {
        Self {
            use_clahe: false,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            use_equalize_hist: false,
            use_contrast: true,
            contrast_alpha: 1.2,
            brightness_beta: 0.0,
            use_bilateral: false,
            bilateral_diameter: 5,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            use_blur: true,
            blur_size: 3,
            use_adaptive_threshold: true,
            adaptive_method: AdaptiveMethod::Mean,
            block_size: 25,
            threshold_c: 12.0,
            use_edges: false,
            canny_low: 50.0,
            canny_high: 150.0,
            use_morph_close: false,
            morph_radius: 1,
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::board()
    }
}

/// Run the full pipeline on a frame and return the binary mask
/// (foreground white). Pure function of the inputs; no stage is fatal.
pub fn preprocess(frame: &RgbaImage, config: &PreprocessConfig) -> GrayImage {
    let mut gray = image::imageops::grayscale(frame);
    preprocess_gray(&mut gray, config);
    gray
}

/// Same pipeline for an already-grayscale input, in place.
pub fn preprocess_gray(gray: &mut GrayImage, config: &PreprocessConfig) {
    let blur_size = make_odd(config.blur_size);
    let block_size = make_odd(config.block_size);

    if config.use_clahe {
        *gray = clahe(gray, config.clahe_clip_limit, config.clahe_tiles);
    }

    if config.use_equalize_hist {
        *gray = imageproc::contrast::equalize_histogram(gray);
    }

    if config.use_contrast {
        for p in gray.pixels_mut() {
            p[0] = (p[0] as f32 * config.contrast_alpha + config.brightness_beta)
                .clamp(0.0, 255.0) as u8;
        }
    }

    if config.use_bilateral {
        *gray = bilateral(
            gray,
            config.bilateral_diameter,
            config.bilateral_sigma_color,
            config.bilateral_sigma_space,
        );
    }

    if config.use_blur && blur_size > 1 {
        *gray = imageproc::filter::gaussian_blur_f32(gray, sigma_for_kernel(blur_size));
    }

    if config.use_adaptive_threshold {
        *gray = adaptive_threshold_inv(
            gray,
            config.adaptive_method,
            block_size,
            config.threshold_c,
        );
    }

    if config.use_edges {
        *gray = imageproc::edges::canny(gray, config.canny_low, config.canny_high);
    }

    if config.use_morph_close {
        *gray = imageproc::morphology::close(gray, Norm::LInf, config.morph_radius);
    }

    debug!(
        "Preprocessed {}x{} frame (blur {}, block {})",
        gray.width(),
        gray.height(),
        blur_size,
        block_size
    );
}

fn make_odd(size: u32) -> u32 {
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Sigma a kernel of the given odd size is meant to represent.
fn sigma_for_kernel(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Contrast-limited local histogram equalization over a `tiles`×`tiles`
/// grid, with bilinear blending between neighboring tile mappings.
fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles = tiles.clamp(1, w.min(h).max(1));
    let tile_w = w.div_ceil(tiles);
    let tile_h = h.div_ceil(tiles);

    // Identity mapping for tiles that end up empty on non-divisible sizes.
    let identity: [u8; 256] = std::array::from_fn(|v| v as u8);
    let mut luts = vec![identity; (tiles * tiles) as usize];

    for ty in 0..tiles {
        for tx in 0..tiles {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            if x0 >= x1 || y0 >= y1 {
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let count = ((x1 - x0) * (y1 - y0)) as f32;
            let clip = (clip_limit * count / 256.0).max(1.0) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redistribute = excess / 256;
            for bin in hist.iter_mut() {
                *bin += redistribute;
            }

            let lut = &mut luts[(ty * tiles + tx) as usize];
            let mut cdf = 0u32;
            for v in 0..256 {
                cdf += hist[v];
                lut[v] = ((cdf as f32 / count) * 255.0).min(255.0) as u8;
            }
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;

        let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (tiles - 1) as f32);
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (tiles - 1) as f32);
        let tx0 = fx.floor() as u32;
        let ty0 = fy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles - 1);
        let ty1 = (ty0 + 1).min(tiles - 1);
        let ax = fx - tx0 as f32;
        let ay = fy - ty0 as f32;

        let top = luts[(ty0 * tiles + tx0) as usize][v] as f32 * (1.0 - ax)
            + luts[(ty0 * tiles + tx1) as usize][v] as f32 * ax;
        let bottom = luts[(ty1 * tiles + tx0) as usize][v] as f32 * (1.0 - ax)
            + luts[(ty1 * tiles + tx1) as usize][v] as f32 * ax;
        image::Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Edge-preserving smoothing: each output pixel is a spatially and
/// photometrically weighted average of its neighborhood.
fn bilateral(gray: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let radius = (diameter.max(1) / 2) as i32;
    let inv_2ss = 1.0 / (2.0 * sigma_space * sigma_space);
    let inv_2sc = 1.0 / (2.0 * sigma_color * sigma_color);

    GrayImage::from_fn(w, h, |x, y| {
        let center = gray.get_pixel(x, y)[0] as f32;
        let mut num = 0.0f32;
        let mut den = 0.0f32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                    continue;
                }
                let sample = gray.get_pixel(nx as u32, ny as u32)[0] as f32;
                let d_color = sample - center;
                let weight = (-((dx * dx + dy * dy) as f32) * inv_2ss).exp()
                    * (-(d_color * d_color) * inv_2sc).exp();
                num += sample * weight;
                den += weight;
            }
        }
        image::Luma([(num / den).round().clamp(0.0, 255.0) as u8])
    })
}

/// Inverted adaptive threshold: a pixel becomes white (foreground) when it
/// is darker than its local neighborhood mean minus `c`.
fn adaptive_threshold_inv(
    gray: &GrayImage,
    method: AdaptiveMethod,
    block_size: u32,
    c: f32,
) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    match method {
        AdaptiveMethod::Gaussian => {
            let means = imageproc::filter::gaussian_blur_f32(gray, sigma_for_kernel(block_size));
            GrayImage::from_fn(w, h, |x, y| {
                let p = gray.get_pixel(x, y)[0] as f32;
                let t = means.get_pixel(x, y)[0] as f32 - c;
                image::Luma([if p <= t { 255u8 } else { 0u8 }])
            })
        }
        AdaptiveMethod::Mean => {
            // Row-major summed-area table with a leading zero row/column.
            let stride = (w + 1) as usize;
            let mut integral = vec![0u64; stride * (h + 1) as usize];
            for y in 0..h as usize {
                let mut row_sum = 0u64;
                for x in 0..w as usize {
                    row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
                    integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
                }
            }

            let radius = (block_size / 2) as i64;
            GrayImage::from_fn(w, h, |x, y| {
                let x0 = (x as i64 - radius).max(0) as usize;
                let y0 = (y as i64 - radius).max(0) as usize;
                let x1 = ((x as i64 + radius + 1).min(w as i64)) as usize;
                let y1 = ((y as i64 + radius + 1).min(h as i64)) as usize;
                let area = ((x1 - x0) * (y1 - y0)) as f32;
                let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                    - integral[y0 * stride + x1]
                    - integral[y1 * stride + x0];
                let mean = sum as f32 / area;
                let p = gray.get_pixel(x, y)[0] as f32;
                image::Luma([if p <= mean - c { 255u8 } else { 0u8 }])
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_dark_square(size: u32, inset: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let inside =
                x >= inset && x < size - inset && y >= inset && y < size - inset;
            if inside {
                image::Rgba([20, 20, 20, 255])
            } else {
                image::Rgba([230, 230, 230, 255])
            }
        })
    }

    #[test]
    fn test_make_odd() {
        assert_eq!(make_odd(4), 5);
        assert_eq!(make_odd(5), 5);
        assert_eq!(make_odd(40), 41);
    }

    #[test]
    fn test_dark_foreground_becomes_white() {
        let frame = frame_with_dark_square(120, 30);
        let mask = preprocess(&frame, &PreprocessConfig::board());
        // Center of the dark square is foreground, far corner is background.
        assert_eq!(mask.get_pixel(60, 60)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_adaptive_mean_matches_gaussian_polarity() {
        let frame = frame_with_dark_square(120, 30);
        let mut config = PreprocessConfig::board();
        config.adaptive_method = AdaptiveMethod::Mean;
        let mask = preprocess(&frame, &config);
        assert_eq!(mask.get_pixel(60, 60)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_stages_are_toggleable() {
        let frame = frame_with_dark_square(60, 15);
        let config = PreprocessConfig {
            use_clahe: false,
            use_equalize_hist: false,
            use_contrast: false,
            use_bilateral: false,
            use_blur: false,
            use_adaptive_threshold: false,
            use_edges: false,
            use_morph_close: false,
            ..PreprocessConfig::board()
        };
        let out = preprocess(&frame, &config);
        // With everything off the pipeline is plain grayscale conversion.
        assert_eq!(out, image::imageops::grayscale(&frame));
    }

    #[test]
    fn test_clahe_preserves_dimensions_and_spreads_contrast() {
        let gray = GrayImage::from_fn(64, 64, |x, _| image::Luma([100 + (x % 8) as u8]));
        let out = clahe(&gray, 2.0, 8);
        assert_eq!(out.dimensions(), (64, 64));
        let (min, max) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        assert!(max - min > 8, "local equalization should widen the range");
    }

    #[test]
    fn test_bilateral_preserves_strong_edges() {
        let gray = GrayImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                image::Luma([0u8])
            } else {
                image::Luma([255u8])
            }
        });
        let out = bilateral(&gray, 5, 30.0, 75.0);
        assert!(out.get_pixel(2, 16)[0] < 20);
        assert!(out.get_pixel(30, 16)[0] > 235);
    }
}
