//! Debug rendering of the board and impacts into an RGB8 raster.
//!
//! Colors are cosmetic; nothing downstream reads them back.

use dart_types::board::{
    FIELDS, RADIUS_BOARD_MM, RADIUS_INNER_BULL_MM, RADIUS_INNER_DOUBLE_MM, RADIUS_INNER_TRIPLE_MM,
    RADIUS_OUTER_BULL_MM, RADIUS_OUTER_DOUBLE_MM, RADIUS_OUTER_TRIPLE_MM,
};
use dart_types::{BoardCoordinate, PixelBuffer};
use machine_vision_formats::pixel_format::RGB8;

use crate::CameraRay;

/// Half-size of the rendered canvas, millimetres from the bull.
const CANVAS_HALF_MM: f64 = 500.0;

/// The display crop keeps this much around the board rim.
pub const OVERLAY_MARGIN_MM: f64 = RADIUS_BOARD_MM * 1.2;

const COLOR_LIGHT: [u8; 3] = [204, 204, 204];
const COLOR_DARK: [u8; 3] = [26, 26, 26];
const COLOR_DARK_MULTI: [u8; 3] = [178, 25, 25];
const COLOR_LIGHT_MULTI: [u8; 3] = [0, 153, 25];
const COLOR_WIRE: [u8; 3] = [255, 255, 255];
const COLOR_IMPACT: [u8; 3] = [255, 0, 128];

const SECTOR_DEGREES: f64 = 360.0 / 20.0;
// sector 0 spans [-99, -81) degrees so that "20" straddles the top
const SECTOR_PHASE_DEGREES: f64 = 99.0;

const RING_RADII: [f64; 6] = [
    RADIUS_INNER_BULL_MM,
    RADIUS_OUTER_BULL_MM,
    RADIUS_INNER_TRIPLE_MM,
    RADIUS_OUTER_TRIPLE_MM,
    RADIUS_INNER_DOUBLE_MM,
    RADIUS_OUTER_DOUBLE_MM,
];

pub fn board_center_px(factor: f64) -> i64 {
    (CANVAS_HALF_MM * factor) as i64
}

#[inline]
fn put_px(im: &mut PixelBuffer<RGB8>, x: i64, y: i64, color: [u8; 3]) {
    if x < 0 || y < 0 || x >= im.width as i64 || y >= im.height as i64 {
        return;
    }
    let idx = y as usize * im.stride as usize + x as usize * 3;
    im.image_data[idx..idx + 3].copy_from_slice(&color);
}

fn sector_index(theta_degrees: f64) -> usize {
    let shifted = (theta_degrees + SECTOR_PHASE_DEGREES).rem_euclid(360.0);
    (shifted / SECTOR_DEGREES) as usize % 20
}

fn region_color(r_mm: f64, theta_degrees: f64) -> Option<[u8; 3]> {
    let sector = sector_index(theta_degrees);
    let base = if sector % 2 == 0 { COLOR_DARK } else { COLOR_LIGHT };
    let multi = if sector % 2 == 0 {
        COLOR_DARK_MULTI
    } else {
        COLOR_LIGHT_MULTI
    };
    if r_mm <= RADIUS_INNER_BULL_MM {
        Some(COLOR_DARK_MULTI)
    } else if r_mm <= RADIUS_OUTER_BULL_MM {
        Some(COLOR_LIGHT_MULTI)
    } else if r_mm <= RADIUS_INNER_TRIPLE_MM {
        Some(base)
    } else if r_mm <= RADIUS_OUTER_TRIPLE_MM {
        Some(multi)
    } else if r_mm <= RADIUS_INNER_DOUBLE_MM {
        Some(base)
    } else if r_mm <= RADIUS_OUTER_DOUBLE_MM {
        Some(multi)
    } else {
        None
    }
}

/// Render the static board: colored fields, ring outlines, sector wires and
/// sector numbers. `factor` is pixels per millimetre.
pub fn render_board(factor: f64) -> PixelBuffer<RGB8> {
    let center = CANVAS_HALF_MM * factor;
    let size = (2.0 * center) as u32;
    let mut im = PixelBuffer::<RGB8>::new_filled(size, size, 0);

    for y in 0..size as i64 {
        for x in 0..size as i64 {
            let dx = (x as f64 - center) / factor;
            let dy = (y as f64 - center) / factor;
            let r = (dx * dx + dy * dy).sqrt();
            let theta = dy.atan2(dx).to_degrees();

            let mut color = region_color(r, theta);

            // ring outlines and the outer rim
            if RING_RADII.iter().any(|&ring| (r - ring).abs() <= 0.6 / factor) {
                color = Some(COLOR_WIRE);
            }
            if (r - RADIUS_BOARD_MM).abs() <= 1.0 / factor {
                color = Some(COLOR_WIRE);
            }

            // sector wires between outer bull and outer double
            if r > RADIUS_OUTER_BULL_MM && r <= RADIUS_OUTER_DOUBLE_MM {
                let into_sector =
                    (theta + SECTOR_PHASE_DEGREES).rem_euclid(SECTOR_DEGREES);
                let to_boundary = into_sector.min(SECTOR_DEGREES - into_sector);
                let limit = (0.7 / r).to_degrees();
                if to_boundary <= limit {
                    color = Some(COLOR_WIRE);
                }
            }

            if let Some(color) = color {
                put_px(&mut im, x, y, color);
            }
        }
    }

    // sector numbers outside the double ring
    let label_radius = (RADIUS_OUTER_DOUBLE_MM + 20.0) * factor;
    for (i, &field) in FIELDS.iter().enumerate() {
        let angle = (i as f64 - 6.0) * SECTOR_DEGREES.to_radians();
        let x = center - 20.0 * factor + label_radius * angle.cos();
        let y = center + 10.0 * factor + label_radius * angle.sin();
        draw_number(&mut im, field, x as i64, y as i64, 3, COLOR_WIRE);
    }
    im
}

/// Mark an impact with a small ring.
pub fn draw_impact(im: &mut PixelBuffer<RGB8>, coordinate: &BoardCoordinate, factor: f64) {
    let center = CANVAS_HALF_MM * factor;
    let cx = center + coordinate.x * factor;
    let cy = center + coordinate.y * factor;
    let radius = 4.0 * factor;
    let span = (radius + 2.0).ceil() as i64;
    for dy in -span..=span {
        for dx in -span..=span {
            let d = ((dx * dx + dy * dy) as f64).sqrt();
            if (d - radius).abs() <= 1.0 {
                put_px(im, cx as i64 + dx, cy as i64 + dy, COLOR_IMPACT);
            }
        }
    }
}

/// Draw a camera sight line across the canvas.
pub fn draw_ray(im: &mut PixelBuffer<RGB8>, ray: &CameraRay, factor: f64, color_seed: usize) {
    let center = CANVAS_HALF_MM * factor;
    let color = if color_seed % 2 == 0 {
        [255, 255, 0]
    } else {
        [255, 0, 0]
    };
    // extend past p2 the way the ray leaves the camera
    let p1 = (center + ray.p1.x * factor, center + ray.p1.y * factor);
    let p2 = (
        center + (2.0 * ray.p2.x - ray.p1.x) * factor,
        center + (2.0 * ray.p2.y - ray.p1.y) * factor,
    );
    draw_line_rgb(im, p1, p2, color);
}

fn draw_line_rgb(im: &mut PixelBuffer<RGB8>, p1: (f64, f64), p2: (f64, f64), color: [u8; 3]) {
    let (mut x, mut y) = (p1.0 as i64, p1.1 as i64);
    let (ex, ey) = (p2.0 as i64, p2.1 as i64);
    let dx = (ex - x).abs();
    let dy = -(ey - y).abs();
    let sx = if x < ex { 1 } else { -1 };
    let sy = if y < ey { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_px(im, x, y, color);
        if x == ex && y == ey {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

// 3x5 digit glyphs, one bit row per entry
const GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

fn draw_number(im: &mut PixelBuffer<RGB8>, n: u8, x: i64, y: i64, scale: i64, color: [u8; 3]) {
    let digits: Vec<u8> = if n >= 10 {
        vec![n / 10, n % 10]
    } else {
        vec![n]
    };
    for (pos, &digit) in digits.iter().enumerate() {
        let origin_x = x + pos as i64 * 4 * scale;
        let glyph = &GLYPHS[digit as usize];
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) != 0 {
                    for sy in 0..scale {
                        for sx in 0..scale {
                            put_px(
                                im,
                                origin_x + col as i64 * scale + sx,
                                y + row as i64 * scale + sy,
                                color,
                            );
                        }
                    }
                }
            }
        }
    }
}
