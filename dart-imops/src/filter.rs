//! Smoothing and morphological filters.

use dart_types::PixelBuffer;
use machine_vision_formats::{pixel_format::Mono8, ImageData, ImageStride, Stride};

/// Reflect-101 border indexing (`dcb|abcdef|edc`).
#[inline]
fn reflect(i: i64, n: i64) -> usize {
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

/// Edge-preserving bilateral filter with window diameter `d`.
pub fn bilateral_filter<IM>(im: &IM, d: usize, sigma_color: f64, sigma_space: f64) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    let w = im.width() as i64;
    let h = im.height() as i64;
    let stride = im.stride();
    let data = im.image_data();
    let radius = (d / 2) as i64;

    // weight lookups: spatial by squared distance, range by intensity delta
    let mut space_w = Vec::with_capacity((2 * radius as usize + 1).pow(2));
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f64;
            space_w.push((-r2 / (2.0 * sigma_space * sigma_space)).exp());
        }
    }
    let color_w: Vec<f64> = (0..256)
        .map(|delta| {
            let delta = delta as f64;
            (-delta * delta / (2.0 * sigma_color * sigma_color)).exp()
        })
        .collect();

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let center = data[y as usize * stride + x as usize] as f64;
            let mut num = 0.0;
            let mut den = 0.0;
            let mut wi = 0;
            for dy in -radius..=radius {
                let sy = reflect(y + dy, h);
                let row = &data[sy * stride..];
                for dx in -radius..=radius {
                    let sx = reflect(x + dx, w);
                    let v = row[sx] as f64;
                    let weight = space_w[wi] * color_w[(v - center).abs() as usize];
                    num += weight * v;
                    den += weight;
                    wi += 1;
                }
            }
            out.push((num / den).round().clamp(0.0, 255.0) as u8);
        }
    }
    PixelBuffer::from_packed(w as u32, h as u32, out)
}

fn morph<IM>(im: &IM, k: usize, maximum: bool) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    let w = im.width() as i64;
    let h = im.height() as i64;
    let stride = im.stride();
    let data = im.image_data();
    // anchor at the kernel center, replicated borders
    let anchor = (k / 2) as i64;
    let k = k as i64;

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let mut acc: u8 = if maximum { 0 } else { 255 };
            for dy in 0..k {
                let sy = (y + dy - anchor).clamp(0, h - 1) as usize;
                let row = &data[sy * stride..];
                for dx in 0..k {
                    let sx = (x + dx - anchor).clamp(0, w - 1) as usize;
                    let v = row[sx];
                    acc = if maximum { acc.max(v) } else { acc.min(v) };
                }
            }
            out.push(acc);
        }
    }
    PixelBuffer::from_packed(w as u32, h as u32, out)
}

/// Morphological erosion with a square `k x k` kernel.
pub fn erode<IM>(im: &IM, k: usize) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    morph(im, k, false)
}

/// Morphological dilation with a square `k x k` kernel.
pub fn dilate<IM>(im: &IM, k: usize) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    morph(im, k, true)
}

/// Opening: erosion then dilation. Removes speckle smaller than the kernel.
pub fn morph_open<IM>(im: &IM, k: usize) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    dilate(&erode(im, k), k)
}

/// Closing: dilation then erosion. Fills gaps smaller than the kernel.
pub fn morph_close<IM>(im: &IM, k: usize) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    erode(&dilate(im, k), k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows;

    fn count_nonzero(im: &PixelBuffer<Mono8>) -> usize {
        rows(im).flatten().filter(|&&v| v > 0).count()
    }

    #[test]
    fn open_removes_single_speckle() {
        let mut im = PixelBuffer::<Mono8>::new_filled(9, 9, 0);
        im.image_data[4 * 9 + 4] = 255;
        let opened = morph_open(&im, 3);
        assert_eq!(count_nonzero(&opened), 0);
    }

    #[test]
    fn open_keeps_large_blob() {
        let mut im = PixelBuffer::<Mono8>::new_filled(9, 9, 0);
        for y in 2..7 {
            for x in 2..7 {
                im.image_data[y * 9 + x] = 255;
            }
        }
        let opened = morph_open(&im, 3);
        assert_eq!(count_nonzero(&opened), 25);
    }

    #[test]
    fn close_fills_pinhole() {
        let mut im = PixelBuffer::<Mono8>::new_filled(9, 9, 255);
        im.image_data[4 * 9 + 4] = 0;
        let closed = morph_close(&im, 3);
        assert_eq!(count_nonzero(&closed), 81);
    }

    #[test]
    fn bilateral_preserves_step_edge() {
        let mut im = PixelBuffer::<Mono8>::new_filled(10, 4, 10);
        for y in 0..4 {
            for x in 5..10 {
                im.image_data[y * 10 + x] = 200;
            }
        }
        let out = bilateral_filter(&im, 5, 57.0, 57.0);
        // the two plateaus stay essentially flat
        assert!(out.image_data[10 + 1] < 30);
        assert!(out.image_data[10 + 8] > 180);
    }

    #[test]
    fn bilateral_smooths_small_noise() {
        let mut im = PixelBuffer::<Mono8>::new_filled(7, 7, 100);
        im.image_data[3 * 7 + 3] = 120;
        let out = bilateral_filter(&im, 5, 57.0, 57.0);
        let center = out.image_data[3 * 7 + 3];
        assert!(center > 100 && center < 120);
    }
}
