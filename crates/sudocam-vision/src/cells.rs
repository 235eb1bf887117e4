use image::imageops::FilterType;
use image::GrayImage;
use imageproc::contours::{find_contours, Contour};
use tracing::trace;

use crate::quad::contour_area;

const GRID_SIZE: u32 = 9;

/// Pixel rectangle of one cell inside the rectified board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRegion {
    pub row: usize,
    pub col: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Cleanup parameters for a single extracted cell.
#[derive(Debug, Clone, Copy)]
pub struct CellConfig {
    /// Fraction cropped from each cell edge to drop grid lines.
    pub border_crop: f32,
    /// The initial center box spans 1/divisor of the cropped cell.
    pub center_divisor: u32,
    /// Minimum ink fraction in a one-pixel strip for the center box to
    /// keep growing toward that edge.
    pub expand_threshold: f32,
    /// Side length of the normalized output pattern.
    pub pattern_size: u32,
    /// Cells with fewer ink pixels than this are treated as empty.
    pub min_ink_pixels: u32,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            border_crop: 0.20,
            center_divisor: 3,
            expand_threshold: 0.001,
            pattern_size: 64,
            min_ink_pixels: 8,
        }
    }
}

/// Split a rectified board into 81 cell rectangles, row major. The last
/// row and column absorb the division remainder.
pub fn cell_regions(width: u32, height: u32) -> Vec<CellRegion> {
    let cell_w = width / GRID_SIZE;
    let cell_h = height / GRID_SIZE;
    let mut regions = Vec::with_capacity((GRID_SIZE * GRID_SIZE) as usize);
    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let x = col * cell_w;
            let y = row * cell_h;
            let w = if col == GRID_SIZE - 1 { width - x } else { cell_w };
            let h = if row == GRID_SIZE - 1 { height - y } else { cell_h };
            regions.push(CellRegion {
                row: row as usize,
                col: col as usize,
                x,
                y,
                width: w,
                height: h,
            });
        }
    }
    regions
}

/// Half-open crop window, clamped to the image it came from.
#[derive(Debug, Clone, Copy)]
struct TrimBox {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl TrimBox {
    fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

const EDGES: [Edge; 4] = [Edge::Left, Edge::Right, Edge::Top, Edge::Bottom];

impl Edge {
    fn can_expand(self, b: &TrimBox, width: u32, height: u32) -> bool {
        match self {
            Edge::Left => b.x0 > 0,
            Edge::Right => b.x1 < width,
            Edge::Top => b.y0 > 0,
            Edge::Bottom => b.y1 < height,
        }
    }

    /// Ink fraction of the one-pixel strip just outside the box.
    fn strip_ink_fraction(self, image: &GrayImage, b: &TrimBox) -> f32 {
        let mut ink = 0u32;
        let total;
        match self {
            Edge::Left => {
                total = b.height();
                for y in b.y0..b.y1 {
                    ink += (image.get_pixel(b.x0 - 1, y)[0] > 127) as u32;
                }
            }
            Edge::Right => {
                total = b.height();
                for y in b.y0..b.y1 {
                    ink += (image.get_pixel(b.x1, y)[0] > 127) as u32;
                }
            }
            Edge::Top => {
                total = b.width();
                for x in b.x0..b.x1 {
                    ink += (image.get_pixel(x, b.y0 - 1)[0] > 127) as u32;
                }
            }
            Edge::Bottom => {
                total = b.width();
                for x in b.x0..b.x1 {
                    ink += (image.get_pixel(x, b.y1)[0] > 127) as u32;
                }
            }
        }
        if total == 0 {
            return 0.0;
        }
        ink as f32 / total as f32
    }

    fn expand(self, b: &mut TrimBox) {
        match self {
            Edge::Left => b.x0 -= 1,
            Edge::Right => b.x1 += 1,
            Edge::Top => b.y0 -= 1,
            Edge::Bottom => b.y1 += 1,
        }
    }
}

/// Grow a box from the cell center: each edge keeps expanding while the
/// strip beyond it still carries ink, so the box ends up hugging the
/// glyph without re-including the border grid lines.
fn trim_from_center(image: &GrayImage, divisor: u32, threshold: f32) -> TrimBox {
    let (w, h) = image.dimensions();
    let divisor = divisor.max(1);
    let box_w = (w / divisor).max(1).min(w);
    let box_h = (h / divisor).max(1).min(h);
    let mut b = TrimBox {
        x0: (w - box_w) / 2,
        x1: (w - box_w) / 2 + box_w,
        y0: (h - box_h) / 2,
        y1: (h - box_h) / 2 + box_h,
    };
    loop {
        let mut changed = false;
        for edge in EDGES {
            if edge.can_expand(&b, w, h) && edge.strip_ink_fraction(image, &b) > threshold {
                edge.expand(&mut b);
                changed = true;
            }
        }
        if !changed {
            return b;
        }
    }
}

/// Bounding box of the largest contour, if any contour has positive
/// area. Thin one-pixel strokes report zero area and skip this trim.
fn largest_contour_box(image: &GrayImage) -> Option<TrimBox> {
    let contours: Vec<Contour<i32>> = find_contours(image);
    let largest = contours
        .iter()
        .filter(|c| contour_area(&c.points) > 0.0)
        .max_by(|a, b| {
            contour_area(&a.points)
                .partial_cmp(&contour_area(&b.points))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
    let mut x0 = i32::MAX;
    let mut y0 = i32::MAX;
    let mut x1 = i32::MIN;
    let mut y1 = i32::MIN;
    for p in &largest.points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Some(TrimBox {
        x0: x0.max(0) as u32,
        x1: (x1 + 1).min(image.width() as i32) as u32,
        y0: y0.max(0) as u32,
        y1: (y1 + 1).min(image.height() as i32) as u32,
    })
}

fn crop(image: &GrayImage, b: &TrimBox) -> GrayImage {
    image::imageops::crop_imm(image, b.x0, b.y0, b.width(), b.height()).to_image()
}

fn ink_pixels(image: &GrayImage) -> u32 {
    image.pixels().filter(|p| p[0] > 127).count() as u32
}

/// Normalize one binarized cell (white ink on black) to a fixed-size
/// binary pattern, or an all-black pattern when the cell is empty.
pub fn clean_cell(cell: &GrayImage, config: &CellConfig) -> GrayImage {
    let (w, h) = cell.dimensions();
    let blank = || GrayImage::new(config.pattern_size, config.pattern_size);
    if w < 4 || h < 4 {
        return blank();
    }

    // Drop a fixed margin so the surrounding grid lines never count as ink.
    let margin_x = ((w as f32 * config.border_crop) as u32).min(w / 2 - 1);
    let margin_y = ((h as f32 * config.border_crop) as u32).min(h / 2 - 1);
    let inner = crop(
        cell,
        &TrimBox {
            x0: margin_x,
            x1: w - margin_x,
            y0: margin_y,
            y1: h - margin_y,
        },
    );

    let centered = crop(
        &inner,
        &trim_from_center(&inner, config.center_divisor, config.expand_threshold),
    );

    let tight = match largest_contour_box(&centered) {
        Some(b) if b.width() > 0 && b.height() > 0 => crop(&centered, &b),
        _ => centered,
    };

    let ink = ink_pixels(&tight);
    if ink < config.min_ink_pixels {
        trace!("Cell has {} ink pixels, treating as empty", ink);
        return blank();
    }

    let mut pattern = image::imageops::resize(
        &tight,
        config.pattern_size,
        config.pattern_size,
        FilterType::Triangle,
    );
    for p in pattern.pixels_mut() {
        p[0] = if p[0] >= 128 { 255 } else { 0 };
    }
    pattern
}
