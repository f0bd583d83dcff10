//! Planar dartboard model.
//!
//! The board coordinate system has its origin at the bull, x to the right
//! and y downwards (image convention), in millimetres. Two cameras sit in
//! the board plane at [`CAM_DIST_BOARD_CENTER_MM`] from the center: camera
//! 0 on the negative x axis, camera 1 on the negative y axis. Each camera
//! observes an impact as a pixel column; triangulation intersects the two
//! resulting rays.

use nalgebra::{Point2, Vector2};

use dart_types::board::RADIUS_OUTER_DOUBLE_MM;
use dart_types::{BoardCoordinate, CamId};

mod overlay;
pub use overlay::{board_center_px, draw_impact, draw_ray, render_board, OVERLAY_MARGIN_MM};

/// Distance from each camera to the board center, millimetres.
pub const CAM_DIST_BOARD_CENTER_MM: f64 = 460.0;

/// Rays closer to parallel than this determinant are rejected.
pub const PARALLEL_EPS: f64 = 1e-9;

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("lines parallel, rays do not intersect")]
    ParallelRays,
    #[error("no direction convention for camera {0}; only two cameras are supported")]
    UnsupportedCamera(CamId),
}

pub type Result<T> = std::result::Result<T, GeometryError>;

/// Pixel-offset sign convention per camera.
pub fn direction_factor(cam: CamId) -> Result<f64> {
    match cam.0 {
        0 => Ok(-1.0),
        1 => Ok(1.0),
        _ => Err(GeometryError::UnsupportedCamera(cam)),
    }
}

/// A sight line in board coordinates, as two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRay {
    pub p1: Point2<f64>,
    pub p2: Point2<f64>,
}

/// Build the board-plane ray for one camera's observed impact column.
///
/// `impact_x_px` and `bull_px` are image columns, `radius_px` the pixel
/// radius of the outer double ring.
pub fn camera_ray(
    cam: CamId,
    impact_x_px: f64,
    bull_px: f64,
    radius_px: f64,
    frame_width: u32,
) -> Result<CameraRay> {
    let dir = direction_factor(cam)?;
    let camera_center = frame_width as f64 / 2.0;

    // pixel offsets from the optical axis
    let impact_offset_px = (impact_x_px - camera_center) * dir;
    let bull_offset_px = (bull_px - camera_center) * dir;

    let mm_per_px = RADIUS_OUTER_DOUBLE_MM / radius_px;
    let bull_offset_mm = bull_offset_px * mm_per_px;
    let impact_mm = impact_offset_px * mm_per_px;

    let (p1, p2) = if cam.0 == 0 {
        (
            Point2::new(-CAM_DIST_BOARD_CENTER_MM, bull_offset_mm),
            Point2::new(0.0, impact_mm - bull_offset_mm),
        )
    } else {
        (
            Point2::new(bull_offset_mm, -CAM_DIST_BOARD_CENTER_MM),
            Point2::new(impact_mm - bull_offset_mm, 0.0),
        )
    };
    Ok(CameraRay { p1, p2 })
}

fn det(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Intersect two camera rays by the determinant formula.
pub fn intersect(a: &CameraRay, b: &CameraRay) -> Result<BoardCoordinate> {
    let xdiff = Vector2::new(a.p1.x - a.p2.x, b.p1.x - b.p2.x);
    let ydiff = Vector2::new(a.p1.y - a.p2.y, b.p1.y - b.p2.y);

    let div = det(xdiff, ydiff);
    if div.abs() < PARALLEL_EPS {
        return Err(GeometryError::ParallelRays);
    }

    let d = Vector2::new(
        det(a.p1.coords, a.p2.coords),
        det(b.p1.coords, b.p2.coords),
    );
    Ok(BoardCoordinate {
        x: det(d, xdiff) / div,
        y: det(d, ydiff) / div,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FRAME_WIDTH: u32 = 1920;

    /// Image column at which a camera sees a board point, for a centered
    /// bull and the given pixel scale. Inverse of the ray construction.
    fn project_to_camera(cam: CamId, point: (f64, f64), radius_px: f64) -> f64 {
        let dir = direction_factor(cam).unwrap();
        let camera_center = FRAME_WIDTH as f64 / 2.0;
        let mm_per_px = RADIUS_OUTER_DOUBLE_MM / radius_px;
        let (bx, by) = point;
        let impact_mm = match cam.0 {
            0 => by * CAM_DIST_BOARD_CENTER_MM / (bx + CAM_DIST_BOARD_CENTER_MM),
            _ => bx * CAM_DIST_BOARD_CENTER_MM / (by + CAM_DIST_BOARD_CENTER_MM),
        };
        camera_center + dir * impact_mm / mm_per_px
    }

    #[test]
    fn triangulation_round_trip() {
        let radius_px = 500.0;
        let bull_px = 960.0;
        for &(x, y) in &[
            (0.0, 0.0),
            (50.0, -30.0),
            (-101.0, 77.5),
            (160.0, 160.0),
            (-12.3, -155.0),
        ] {
            let px0 = project_to_camera(CamId(0), (x, y), radius_px);
            let px1 = project_to_camera(CamId(1), (x, y), radius_px);
            let ray0 = camera_ray(CamId(0), px0, bull_px, radius_px, FRAME_WIDTH).unwrap();
            let ray1 = camera_ray(CamId(1), px1, bull_px, radius_px, FRAME_WIDTH).unwrap();
            let hit = intersect(&ray0, &ray1).unwrap();
            // property 8: recovered within 2 mm
            assert!((hit.x - x).abs() < 2.0, "x: {} vs {}", hit.x, x);
            assert!((hit.y - y).abs() < 2.0, "y: {} vs {}", hit.y, y);
        }
    }

    #[test]
    fn off_center_bull_is_compensated() {
        // a dead-center dart with the bull off the optical axis
        let radius_px = 480.0;
        let bull_px = 935.0;
        let ray0 = camera_ray(CamId(0), bull_px, bull_px, radius_px, FRAME_WIDTH).unwrap();
        // impact at the bull: the ray from the camera through the origin
        let t = -ray0.p1.x / (ray0.p2.x - ray0.p1.x);
        let y_at_origin = ray0.p1.y + t * (ray0.p2.y - ray0.p1.y);
        assert_relative_eq!(y_at_origin, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn parallel_rays_are_rejected() {
        let a = CameraRay {
            p1: Point2::new(0.0, 0.0),
            p2: Point2::new(1.0, 1.0),
        };
        let b = CameraRay {
            p1: Point2::new(5.0, 0.0),
            p2: Point2::new(6.0, 1.0),
        };
        assert!(matches!(intersect(&a, &b), Err(GeometryError::ParallelRays)));
    }

    #[test]
    fn third_camera_has_no_convention() {
        assert!(matches!(
            camera_ray(CamId(2), 0.0, 0.0, 100.0, FRAME_WIDTH),
            Err(GeometryError::UnsupportedCamera(CamId(2)))
        ));
    }
}
