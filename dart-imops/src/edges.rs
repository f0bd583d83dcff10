//! Canny edge detection.

use dart_types::PixelBuffer;
use machine_vision_formats::{pixel_format::Mono8, ImageData, ImageStride, Stride};

/// Canny edge map: Sobel gradients, non-maximum suppression along the
/// quantized gradient direction, then hysteresis between `low` and `high`
/// (L1 gradient magnitude). Edge pixels are 255, everything else 0.
pub fn canny<IM>(im: &IM, low: f64, high: f64) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    let w = im.width() as usize;
    let h = im.height() as usize;
    let stride = im.stride();
    let data = im.image_data();

    let at = |x: usize, y: usize| -> i32 { data[y * stride + x] as i32 };

    let mut gx = vec![0i32; w * h];
    let mut gy = vec![0i32; w * h];
    let mut mag = vec![0i32; w * h];
    if w >= 3 && h >= 3 {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let dx = -at(x - 1, y - 1) + at(x + 1, y - 1) - 2 * at(x - 1, y)
                    + 2 * at(x + 1, y)
                    - at(x - 1, y + 1)
                    + at(x + 1, y + 1);
                let dy = at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2 * at(x, y - 1)
                    - at(x + 1, y - 1);
                gx[y * w + x] = dx;
                gy[y * w + x] = dy;
                mag[y * w + x] = dx.abs() + dy.abs();
            }
        }
    }

    // non-maximum suppression along one of 4 directions
    let mut thin = vec![0i32; w * h];
    if w >= 3 && h >= 3 {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let m = mag[y * w + x];
                if m == 0 {
                    continue;
                }
                let dx = gx[y * w + x];
                let dy = gy[y * w + x];
                let (ax, ay) = (dx.abs() as f64, dy.abs() as f64);
                // sector 0: horizontal gradient, 1: diagonal /, 2: vertical, 3: diagonal \
                let (n1, n2) = if ax > 2.414 * ay {
                    (mag[y * w + x - 1], mag[y * w + x + 1])
                } else if ay > 2.414 * ax {
                    (mag[(y - 1) * w + x], mag[(y + 1) * w + x])
                } else if (dx > 0) == (dy > 0) {
                    (mag[(y - 1) * w + x - 1], mag[(y + 1) * w + x + 1])
                } else {
                    (mag[(y - 1) * w + x + 1], mag[(y + 1) * w + x - 1])
                };
                if m >= n1 && m >= n2 {
                    thin[y * w + x] = m;
                }
            }
        }
    }

    // hysteresis: strong seeds grow through weak neighbours
    let low = low as i32;
    let high = high as i32;
    let mut out = vec![0u8; w * h];
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if thin[y * w + x] > high && out[y * w + x] == 0 {
                out[y * w + x] = 255;
                stack.push((x, y));
                while let Some((cx, cy)) = stack.pop() {
                    for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                        for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                            let idx = ny * w + nx;
                            if out[idx] == 0 && thin[idx] > low {
                                out[idx] = 255;
                                stack.push((nx, ny));
                            }
                        }
                    }
                }
            }
        }
    }

    PixelBuffer::from_packed(w as u32, h as u32, out)
}
