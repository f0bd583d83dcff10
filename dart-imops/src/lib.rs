//! Image operations on strided mono8 buffers.
//!
//! All functions work on [`machine_vision_formats::ImageStride`] images and
//! panic if the image data is smaller than `stride * height`. Shape-changing
//! operations return owned [`PixelBuffer`]s; in-place operations take the
//! image by value and hand it back, following the convention of the
//! surrounding crates.

use dart_types::{Contour, ContourPoint, PixelBuffer};
use machine_vision_formats::{pixel_format::Mono8, ImageData, ImageMutData, ImageStride, Stride};

mod contours;
mod edges;
mod filter;

pub use contours::find_external_contours;
pub use edges::canny;
pub use filter::{bilateral_filter, dilate, erode, morph_close, morph_open};

/// Iterate the valid pixels of each row.
pub(crate) fn rows<IM>(im: &IM) -> impl Iterator<Item = &[u8]>
where
    IM: ImageStride<Mono8>,
{
    let width = im.width() as usize;
    let datalen = im.height() as usize * im.stride();
    im.image_data()[..datalen]
        .chunks_exact(im.stride())
        .map(move |row| &row[..width])
}

/// Mean pixel value over the whole image.
#[inline]
pub fn mean_luma<IM>(im: &IM) -> f64
where
    IM: ImageStride<Mono8>,
{
    let mut accum: u64 = 0;
    for row in rows(im) {
        accum += row.iter().map(|&v| v as u64).sum::<u64>();
    }
    accum as f64 / (im.width() as u64 * im.height() as u64) as f64
}

/// Sum of all pixel values. On a 0/255 mask this counts foreground pixels
/// scaled by 255.
#[inline]
pub fn saturated_sum<IM>(im: &IM) -> u64
where
    IM: ImageStride<Mono8>,
{
    let mut accum: u64 = 0;
    for row in rows(im) {
        accum += row.iter().map(|&v| v as u64).sum::<u64>();
    }
    accum
}

/// Nearest-neighbour resize.
pub fn resize_nearest<IM>(im: &IM, out_w: u32, out_h: u32) -> PixelBuffer<Mono8>
where
    IM: ImageStride<Mono8>,
{
    let (w, h) = (im.width() as usize, im.height() as usize);
    let stride = im.stride();
    let data = im.image_data();
    let mut out = Vec::with_capacity(out_w as usize * out_h as usize);
    for oy in 0..out_h as usize {
        let sy = oy * h / out_h as usize;
        let row = &data[sy * stride..sy * stride + w];
        for ox in 0..out_w as usize {
            let sx = ox * w / out_w as usize;
            out.push(row[sx]);
        }
    }
    PixelBuffer::from_packed(out_w, out_h, out)
}

/// Binarize in place: pixels above `thresh` become `maxval`, the rest 0.
pub fn threshold_binary<IM>(mut im: IM, thresh: u8, maxval: u8) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    let width = im.width() as usize;
    let height = im.height() as usize;
    let stride = im.stride();
    let data = &mut im.buffer_mut_ref().data[..height * stride];
    for row in data.chunks_exact_mut(stride) {
        for px in &mut row[..width] {
            *px = if *px > thresh { maxval } else { 0 };
        }
    }
    im
}

/// Draw a line segment in place (Bresenham), clipped to the image.
pub fn draw_line<IM>(mut im: IM, p1: (i64, i64), p2: (i64, i64), value: u8) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    let width = im.width() as i64;
    let height = im.height() as i64;
    let stride = im.stride();
    let data = &mut im.buffer_mut_ref().data[..];

    let (mut x, mut y) = p1;
    let dx = (p2.0 - p1.0).abs();
    let dy = -(p2.1 - p1.1).abs();
    let sx = if p1.0 < p2.0 { 1 } else { -1 };
    let sy = if p1.1 < p2.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && x < width && y >= 0 && y < height {
            data[y as usize * stride + x as usize] = value;
        }
        if x == p2.0 && y == p2.1 {
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
    im
}

/// Perimeter length of a contour polyline.
pub fn arc_length(contour: &Contour, closed: bool) -> f64 {
    if contour.len() < 2 {
        return 0.0;
    }
    let mut length = 0.0;
    for pair in contour.windows(2) {
        let dx = (pair[1].x - pair[0].x) as f64;
        let dy = (pair[1].y - pair[0].y) as f64;
        length += (dx * dx + dy * dy).sqrt();
    }
    if closed {
        let first = contour[0];
        let last = contour[contour.len() - 1];
        let dx = (first.x - last.x) as f64;
        let dy = (first.y - last.y) as f64;
        length += (dx * dx + dy * dy).sqrt();
    }
    length
}

/// max(y) - min(y) over the contour's vertices.
pub fn vertical_extent(contour: &Contour) -> i32 {
    let min = contour.iter().map(|p| p.y).min().unwrap_or(0);
    let max = contour.iter().map(|p| p.y).max().unwrap_or(0);
    max - min
}

/// A least-squares line through a point set: unit direction `(vx, vy)`
/// through the centroid `(x0, y0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedLine {
    pub vx: f64,
    pub vy: f64,
    pub x0: f64,
    pub y0: f64,
}

impl FittedLine {
    /// Solve for x at the given y. Returns `None` for a horizontal line.
    pub fn x_at_y(&self, y: f64) -> Option<f64> {
        if self.vy.abs() < f64::EPSILON {
            return None;
        }
        Some(self.x0 + self.vx * (y - self.y0) / self.vy)
    }

    /// Shift the line's centroid, e.g. from ROI to full-image coordinates.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            ..*self
        }
    }
}

/// L2 regression line through the points: centroid plus the principal
/// direction of the point scatter. Returns `None` for fewer than 2 points.
pub fn fit_line_l2(points: &[ContourPoint]) -> Option<FittedLine> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let x0 = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let y0 = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in points {
        let dx = p.x as f64 - x0;
        let dy = p.y as f64 - y0;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    // principal eigenvector of the 2x2 scatter matrix
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(FittedLine {
        vx: theta.cos(),
        vy: theta.sin(),
        x0,
        y0,
    })
}
