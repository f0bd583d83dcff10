//! External contour extraction from binary images.

use dart_types::{Contour, ContourPoint};
use machine_vision_formats::{pixel_format::Mono8, ImageData, ImageStride, Stride};

// Moore neighbourhood, clockwise: E, SE, S, SW, W, NW, N, NE.
const DX: [i64; 8] = [1, 1, 0, -1, -1, -1, 0, 1];
const DY: [i64; 8] = [0, 1, 1, 1, 0, -1, -1, -1];

/// Trace the outer boundary of the 8-connected component containing
/// `start`, which must be its topmost-leftmost pixel.
fn trace_boundary<F>(start: (i64, i64), is_fg: F, max_steps: usize) -> Contour
where
    F: Fn(i64, i64) -> bool,
{
    let mut contour = vec![ContourPoint::new(start.0 as i32, start.1 as i32)];
    let mut p = start;
    // the search resumes clockwise after the backtrack direction; the
    // west neighbour of a topmost-leftmost pixel is always background
    let mut backtrack: usize = 4;
    let mut first_move: Option<(usize, (i64, i64))> = None;

    for _ in 0..max_steps {
        let mut found = None;
        for i in 1..=8 {
            let dir = (backtrack + i) % 8;
            let q = (p.0 + DX[dir], p.1 + DY[dir]);
            if is_fg(q.0, q.1) {
                found = Some((dir, q));
                break;
            }
        }
        let Some((dir, q)) = found else {
            break; // isolated pixel
        };
        match first_move {
            None => first_move = Some((dir, q)),
            Some(first) => {
                if p == start && first == (dir, q) {
                    break; // completed the loop in the starting direction
                }
            }
        }
        contour.push(ContourPoint::new(q.0 as i32, q.1 as i32));
        backtrack = (dir + 6) % 8;
        p = q;
    }
    // the closing step re-adds the start pixel
    if contour.len() > 1 && contour.last() == Some(&contour[0]) {
        contour.pop();
    }
    contour
}

/// Find the outer boundary of every 8-connected foreground (non-zero)
/// component, in scan order.
pub fn find_external_contours<IM>(im: &IM) -> Vec<Contour>
where
    IM: ImageStride<Mono8>,
{
    let w = im.width() as i64;
    let h = im.height() as i64;
    let stride = im.stride();
    let data = im.image_data();

    let fg = |x: i64, y: i64| -> bool {
        x >= 0 && x < w && y >= 0 && y < h && data[y as usize * stride + x as usize] > 0
    };

    let mut labeled = vec![false; (w * h) as usize];
    let mut contours = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !fg(x, y) || labeled[(y * w + x) as usize] {
                continue;
            }
            // flood-fill the component so it is visited once
            let mut stack = vec![(x, y)];
            labeled[(y * w + x) as usize] = true;
            while let Some((cx, cy)) = stack.pop() {
                for dir in 0..8 {
                    let (nx, ny) = (cx + DX[dir], cy + DY[dir]);
                    if fg(nx, ny) && !labeled[(ny * w + nx) as usize] {
                        labeled[(ny * w + nx) as usize] = true;
                        stack.push((nx, ny));
                    }
                }
            }
            let max_steps = 4 * (w * h) as usize;
            contours.push(trace_boundary((x, y), fg, max_steps));
        }
    }
    contours
}
