use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::VisionError;

/// Epsilon for polygon simplification, as a fraction of contour perimeter.
const APPROX_EPSILON_FRAC: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Four corners of a detected board, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub top_left: Point2,
    pub top_right: Point2,
    pub bottom_right: Point2,
    pub bottom_left: Point2,
}

impl Quad {
    /// Canonicalize four corners in arbitrary order: the top-left corner
    /// has the smallest x+y, the bottom-right the largest, the top-right
    /// the smallest y-x and the bottom-left the largest y-x.
    pub fn order_points(points: [Point2; 4]) -> Self {
        let mut top_left = points[0];
        let mut top_right = points[0];
        let mut bottom_right = points[0];
        let mut bottom_left = points[0];
        for p in points {
            if p.x + p.y < top_left.x + top_left.y {
                top_left = p;
            }
            if p.x + p.y > bottom_right.x + bottom_right.y {
                bottom_right = p;
            }
            if p.y - p.x < top_right.y - top_right.x {
                top_right = p;
            }
            if p.y - p.x > bottom_left.y - bottom_left.x {
                bottom_left = p;
            }
        }
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    pub fn corners(&self) -> [Point2; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Shoelace area of the quad.
    pub fn area(&self) -> f32 {
        let c = self.corners();
        let mut sum = 0.0f32;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            sum += a.x * b.y - b.x * a.y;
        }
        sum.abs() / 2.0
    }
}

pub(crate) fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0i64;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        sum += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    sum.abs() as f64 / 2.0
}

fn contour_perimeter(points: &[Point<i32>]) -> f64 {
    let mut total = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        let dx = (a.x - b.x) as f64;
        let dy = (a.y - b.y) as f64;
        total += (dx * dx + dy * dy).sqrt();
    }
    total
}

/// Locate the board in a binary mask: the largest outer contour must
/// simplify to exactly four corners.
pub fn locate_grid(mask: &image::GrayImage) -> Result<Quad, VisionError> {
    let contours: Vec<Contour<i32>> = find_contours(mask);
    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .max_by(|a, b| {
            contour_area(&a.points)
                .partial_cmp(&contour_area(&b.points))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(VisionError::GridNotFound)?;

    if contour_area(&largest.points) <= 0.0 {
        return Err(VisionError::GridNotFound);
    }

    let epsilon = APPROX_EPSILON_FRAC * contour_perimeter(&largest.points);
    let approx = imageproc::geometry::approximate_polygon_dp(&largest.points, epsilon, true);
    debug!(
        "Largest contour: {} points, simplified to {}",
        largest.points.len(),
        approx.len()
    );
    if approx.len() != 4 {
        return Err(VisionError::GridNotFound);
    }

    let quad = Quad::order_points([
        Point2::new(approx[0].x as f32, approx[0].y as f32),
        Point2::new(approx[1].x as f32, approx[1].y as f32),
        Point2::new(approx[2].x as f32, approx[2].y as f32),
        Point2::new(approx[3].x as f32, approx[3].y as f32),
    ]);
    if quad.area() <= 0.0 {
        return Err(VisionError::DegenerateQuad);
    }
    Ok(quad)
}
