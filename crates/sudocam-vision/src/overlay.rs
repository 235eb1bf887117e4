use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::cells::cell_regions;
use crate::quad::{Point2, Quad};
use crate::rectify::RectifyMap;

const CORNER_RADIUS: i32 = 4;
/// Fraction of the cell taken up by a rendered digit.
const GLYPH_SCALE: f32 = 0.5;

/// Segment bits per digit: top, top-left, top-right, middle,
/// bottom-left, bottom-right, bottom.
const SEGMENTS: [u8; 10] = [
    0b1110111, // 0
    0b0010010, // 1
    0b1011101, // 2
    0b1011011, // 3
    0b0111010, // 4
    0b1101011, // 5
    0b1101111, // 6
    0b1010010, // 7
    0b1111111, // 8
    0b1111011, // 9
];

/// Outline the detected board on the original frame: edges plus filled
/// corner dots.
pub fn draw_quad_outline(frame: &mut RgbaImage, quad: &Quad, color: Rgba<u8>) {
    let corners = quad.corners();
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        draw_line_segment_mut(frame, (a.x, a.y), (b.x, b.y), color);
    }
    for c in corners {
        draw_filled_circle_mut(frame, (c.x as i32, c.y as i32), CORNER_RADIUS, color);
    }
}

/// Draw digits on the original frame, one per non-zero entry, each
/// placed at its cell center mapped back through the inverse transform.
pub fn annotate_digits(
    frame: &mut RgbaImage,
    map: &RectifyMap,
    digits: &[[u8; 9]; 9],
    color: Rgba<u8>,
) {
    for region in cell_regions(map.width, map.height) {
        let digit = digits[region.row][region.col];
        if digit == 0 || digit > 9 {
            continue;
        }
        // Cell corners in rectified space, mapped back into the frame.
        let corners = [
            map.to_src.apply(Point2::new(region.x as f32, region.y as f32)),
            map.to_src
                .apply(Point2::new((region.x + region.width) as f32, region.y as f32)),
            map.to_src.apply(Point2::new(
                (region.x + region.width) as f32,
                (region.y + region.height) as f32,
            )),
            map.to_src
                .apply(Point2::new(region.x as f32, (region.y + region.height) as f32)),
        ];
        let cx = corners.iter().map(|c| c.x).sum::<f32>() / 4.0;
        let cy = corners.iter().map(|c| c.y).sum::<f32>() / 4.0;
        let cell_w = corners[0].distance(&corners[1]).min(corners[3].distance(&corners[2]));
        let cell_h = corners[0].distance(&corners[3]).min(corners[1].distance(&corners[2]));
        draw_digit(
            frame,
            cx,
            cy,
            cell_w * GLYPH_SCALE,
            cell_h * GLYPH_SCALE * 1.4,
            digit,
            color,
        );
    }
}

/// Seven-segment glyph centered at (cx, cy) inside a width x height box.
fn draw_digit(
    frame: &mut RgbaImage,
    cx: f32,
    cy: f32,
    width: f32,
    height: f32,
    digit: u8,
    color: Rgba<u8>,
) {
    let hw = (width / 2.0).max(1.0);
    let hh = (height / 2.0).max(1.0);
    // Endpoints in local glyph coordinates, same order as the bitmask.
    let segments: [((f32, f32), (f32, f32)); 7] = [
        ((-hw, -hh), (hw, -hh)),
        ((-hw, -hh), (-hw, 0.0)),
        ((hw, -hh), (hw, 0.0)),
        ((-hw, 0.0), (hw, 0.0)),
        ((-hw, 0.0), (-hw, hh)),
        ((hw, 0.0), (hw, hh)),
        ((-hw, hh), (hw, hh)),
    ];
    let mask = SEGMENTS[digit as usize];
    for (i, ((x0, y0), (x1, y1))) in segments.iter().enumerate() {
        if mask & (1 << (6 - i)) == 0 {
            continue;
        }
        // Offset passes give the strokes some thickness.
        for d in -1..=1i32 {
            let d = d as f32;
            draw_line_segment_mut(
                frame,
                (cx + x0 + d, cy + y0),
                (cx + x1 + d, cy + y1),
                color,
            );
            draw_line_segment_mut(
                frame,
                (cx + x0, cy + y0 + d),
                (cx + x1, cy + y1 + d),
                color,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn count_colored(frame: &RgbaImage, color: Rgba<u8>) -> usize {
        frame.pixels().filter(|&&p| p == color).count()
    }

    #[test]
    fn test_quad_outline_marks_edges_and_corners() {
        let mut frame = RgbaImage::from_pixel(120, 120, Rgba([0, 0, 0, 255]));
        let quad = Quad::order_points([
            Point2::new(20.0, 20.0),
            Point2::new(100.0, 20.0),
            Point2::new(100.0, 100.0),
            Point2::new(20.0, 100.0),
        ]);
        draw_quad_outline(&mut frame, &quad, GREEN);
        assert_eq!(*frame.get_pixel(60, 20), GREEN);
        assert_eq!(*frame.get_pixel(20, 60), GREEN);
        assert_eq!(*frame.get_pixel(22, 22), GREEN, "corner dots are filled");
        assert_eq!(*frame.get_pixel(60, 60), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_annotate_skips_zero_cells() {
        let mut frame = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let quad = Quad::order_points([
            Point2::new(10.0, 10.0),
            Point2::new(190.0, 10.0),
            Point2::new(190.0, 190.0),
            Point2::new(10.0, 190.0),
        ]);
        let map = RectifyMap::for_quad(&quad).unwrap();
        let digits = [[0u8; 9]; 9];
        annotate_digits(&mut frame, &map, &digits, GREEN);
        assert_eq!(count_colored(&frame, GREEN), 0);
    }

    #[test]
    fn test_annotate_draws_near_cell_center() {
        let mut frame = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let quad = Quad::order_points([
            Point2::new(10.0, 10.0),
            Point2::new(190.0, 10.0),
            Point2::new(190.0, 190.0),
            Point2::new(10.0, 190.0),
        ]);
        let map = RectifyMap::for_quad(&quad).unwrap();
        let mut digits = [[0u8; 9]; 9];
        digits[4][4] = 8;
        annotate_digits(&mut frame, &map, &digits, GREEN);
        assert!(count_colored(&frame, GREEN) > 20);
        // All drawn pixels sit inside the center cell of the board.
        for (x, y, p) in frame.enumerate_pixels() {
            if *p == GREEN {
                assert!((80..121).contains(&x) && (80..121).contains(&y));
            }
        }
    }

    #[test]
    fn test_every_digit_renders_something() {
        for digit in 1..=9u8 {
            let mut frame = RgbaImage::from_pixel(60, 60, Rgba([0, 0, 0, 255]));
            draw_digit(&mut frame, 30.0, 30.0, 14.0, 28.0, digit, GREEN);
            assert!(count_colored(&frame, GREEN) > 10, "digit {digit}");
        }
    }
}
