use image::{GrayImage, RgbaImage};
use nalgebra::{Matrix3, OMatrix, OVector, Vector3, U8};
use tracing::debug;

use crate::quad::{Point2, Quad};
use crate::VisionError;

/// Plane projective transform, normalized so h33 = 1.
#[derive(Debug, Clone, Copy)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Homography {
    /// Solve for the homography mapping the four source points onto the
    /// four destination points. Eight equations, eight unknowns.
    pub fn from_correspondences(
        src: &[Point2; 4],
        dst: &[Point2; 4],
    ) -> Result<Self, VisionError> {
        let mut a = OMatrix::<f64, U8, U8>::zeros();
        let mut b = OVector::<f64, U8>::zeros();
        for i in 0..4 {
            let (x, y) = (src[i].x as f64, src[i].y as f64);
            let (u, v) = (dst[i].x as f64, dst[i].y as f64);
            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -x * u;
            a[(r, 7)] = -y * u;
            b[r] = u;
            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -x * v;
            a[(r + 1, 7)] = -y * v;
            b[r + 1] = v;
        }
        let h = a.lu().solve(&b).ok_or(VisionError::DegenerateQuad)?;
        Ok(Self {
            m: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Apply the transform with perspective divide.
    pub fn apply(&self, p: Point2) -> Point2 {
        let v = self.m * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new((v.x / v.z) as f32, (v.y / v.z) as f32)
    }

    pub fn inverse(&self) -> Result<Self, VisionError> {
        let inv = self.m.try_inverse().ok_or(VisionError::SingularTransform)?;
        Ok(Self { m: inv })
    }
}

/// Forward and inverse transforms between the source frame and the
/// rectified board, plus the rectified dimensions.
#[derive(Debug, Clone, Copy)]
pub struct RectifyMap {
    pub to_rect: Homography,
    pub to_src: Homography,
    pub width: u32,
    pub height: u32,
}

impl RectifyMap {
    /// Build the map for a detected board quad. The rectified size is
    /// taken from the longest opposing edge pair so no content shrinks.
    pub fn for_quad(quad: &Quad) -> Result<Self, VisionError> {
        let width_bottom = quad.bottom_right.distance(&quad.bottom_left);
        let width_top = quad.top_right.distance(&quad.top_left);
        let width = width_bottom.max(width_top).round() as u32;

        let height_right = quad.top_right.distance(&quad.bottom_right);
        let height_left = quad.top_left.distance(&quad.bottom_left);
        let height = height_right.max(height_left).round() as u32;

        if width < 2 || height < 2 {
            return Err(VisionError::DegenerateQuad);
        }

        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(width as f32 - 1.0, 0.0),
            Point2::new(width as f32 - 1.0, height as f32 - 1.0),
            Point2::new(0.0, height as f32 - 1.0),
        ];
        let to_rect = Homography::from_correspondences(&quad.corners(), &dst)?;
        let to_src = to_rect.inverse()?;
        debug!("Rectifying quad to {}x{}", width, height);
        Ok(Self {
            to_rect,
            to_src,
            width,
            height,
        })
    }
}

fn bilinear_gray(src: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = src.dimensions();
    if x < 0.0 || y < 0.0 || x > w as f32 - 1.0 || y > h as f32 - 1.0 {
        return 0;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let ax = x - x0 as f32;
    let ay = y - y0 as f32;
    let top = src.get_pixel(x0, y0)[0] as f32 * (1.0 - ax) + src.get_pixel(x1, y0)[0] as f32 * ax;
    let bottom =
        src.get_pixel(x0, y1)[0] as f32 * (1.0 - ax) + src.get_pixel(x1, y1)[0] as f32 * ax;
    (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8
}

fn bilinear_rgba(src: &RgbaImage, x: f32, y: f32) -> image::Rgba<u8> {
    let (w, h) = src.dimensions();
    if x < 0.0 || y < 0.0 || x > w as f32 - 1.0 || y > h as f32 - 1.0 {
        return image::Rgba([0, 0, 0, 0]);
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let ax = x - x0 as f32;
    let ay = y - y0 as f32;
    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = src.get_pixel(x0, y0)[c] as f32 * (1.0 - ax)
            + src.get_pixel(x1, y0)[c] as f32 * ax;
        let bottom = src.get_pixel(x0, y1)[c] as f32 * (1.0 - ax)
            + src.get_pixel(x1, y1)[c] as f32 * ax;
        *slot = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
    }
    image::Rgba(out)
}

/// Warp a grayscale frame into the rectified board by sampling the
/// source through the inverse transform.
pub fn warp_gray(src: &GrayImage, map: &RectifyMap) -> GrayImage {
    GrayImage::from_fn(map.width, map.height, |x, y| {
        let p = map.to_src.apply(Point2::new(x as f32, y as f32));
        image::Luma([bilinear_gray(src, p.x, p.y)])
    })
}

/// Same warp for a color frame. Pixels mapping outside the source are
/// transparent black.
pub fn warp_rgba(src: &RgbaImage, map: &RectifyMap) -> RgbaImage {
    RgbaImage::from_fn(map.width, map.height, |x, y| {
        let p = map.to_src.apply(Point2::new(x as f32, y as f32));
        bilinear_rgba(src, p.x, p.y)
    })
}
