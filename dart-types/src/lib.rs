//! Shared data model for the dart recognition pipeline.
//!
//! Frames are modeled as a `(PixelBuffer, CameraInfo)` pair: the pixel data
//! is an owned strided buffer shared behind an [`std::sync::Arc`], while the
//! per-camera metadata travels by value and is cloned whenever a pipeline
//! stage annotates it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use machine_vision_formats::pixel_format::{Mono8, RGB8};
use serde::{Deserialize, Serialize};

mod pixel_buffer;
pub use pixel_buffer::PixelBuffer;

pub mod board;
pub mod calibration;
pub use calibration::{CalibrationRecord, CalibrationUpdate};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty multi-frame")]
    EmptyMultiFrame,
    #[error("empty contour collection")]
    EmptyContourCollection,
    #[error("frame id mismatch in bundle: {expected} vs {got}")]
    FrameIdMismatch { expected: FrameId, got: FrameId },
    #[error("duplicate camera {0} in bundle")]
    DuplicateCamera(CamId),
    #[error("calibration blob: {0}")]
    CalibrationBlob(#[from] serde_cbor::Error),
    #[error("calibration update: {0}")]
    CalibrationUpdate(#[from] serde_json::Error),
    #[error("unknown calibration parameter {0:?}")]
    UnknownCalibrationParam(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies one multi-camera capture tick. All frames grabbed on the same
/// tick share the id, across all cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Camera identifier within the configured rig.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CamId(pub u8);

impl std::fmt::Display for CamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Region of interest in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// Per-camera metadata attached to a [`Frame`].
///
/// Stages annotate a clone of this, never the original, so upstream caches
/// keep the metadata they saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub name: CamId,
    /// Capture timestamp set by the grabber.
    pub ts: Option<DateTime<Utc>>,
    /// Pixel column of the board center.
    pub bull: Option<i64>,
    /// Pixel radius of the outer double ring.
    pub radius: Option<i64>,
    /// Pixel row of the board surface line.
    pub board_surface_y: Option<i64>,
    /// ROI suggested by calibration, used by background subtraction.
    pub suggested_roi: Option<Roi>,
    /// ROI actually applied when extracting the foreground.
    pub roi: Option<Roi>,
    /// Raw (relative) calibration parameters for this camera.
    pub calibration: Option<BTreeMap<String, f64>>,
    /// Transport topic override for debug images.
    pub topic: Option<String>,
}

impl CameraInfo {
    pub fn new(name: CamId) -> Self {
        Self {
            name,
            ts: None,
            bull: None,
            radius: None,
            board_surface_y: None,
            suggested_roi: None,
            roi: None,
            calibration: None,
            topic: None,
        }
    }

    pub fn with_ts(name: CamId, ts: DateTime<Utc>) -> Self {
        Self {
            ts: Some(ts),
            ..Self::new(name)
        }
    }
}

/// One camera's view of one capture tick.
#[derive(Clone)]
pub struct Frame {
    pub pixels: Arc<PixelBuffer<Mono8>>,
    pub frame_id: FrameId,
    pub camera_info: CameraInfo,
}

impl Frame {
    pub fn new(pixels: PixelBuffer<Mono8>, frame_id: FrameId, camera_info: CameraInfo) -> Self {
        Self {
            pixels: Arc::new(pixels),
            frame_id,
            camera_info,
        }
    }

    /// Same pixels, new metadata.
    pub fn with_info(&self, camera_info: CameraInfo) -> Self {
        Self {
            pixels: self.pixels.clone(),
            frame_id: self.frame_id,
            camera_info,
        }
    }

    pub fn cam_id(&self) -> CamId {
        self.camera_info.name
    }

    pub fn width(&self) -> u32 {
        self.pixels.width
    }

    pub fn height(&self) -> u32 {
        self.pixels.height
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("cam", &self.camera_info.name)
            .field("width", &self.pixels.width)
            .field("height", &self.pixels.height)
            .finish()
    }
}

/// Synchronized bundle of per-camera frames for one capture tick.
#[derive(Debug, Clone)]
pub struct MultiFrame {
    frames: Vec<Frame>,
    frame_id: FrameId,
    pub has_processing_trigger: bool,
}

impl MultiFrame {
    /// Build a bundle, checking the frame-id and camera-uniqueness
    /// invariants.
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        let first = frames.first().ok_or(Error::EmptyMultiFrame)?;
        let frame_id = first.frame_id;
        let mut seen = Vec::with_capacity(frames.len());
        for frame in &frames {
            if frame.frame_id != frame_id {
                return Err(Error::FrameIdMismatch {
                    expected: frame_id,
                    got: frame.frame_id,
                });
            }
            if seen.contains(&frame.cam_id()) {
                return Err(Error::DuplicateCamera(frame.cam_id()));
            }
            seen.push(frame.cam_id());
        }
        Ok(Self {
            frames,
            frame_id,
            has_processing_trigger: false,
        })
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn cam_ids(&self) -> impl Iterator<Item = CamId> + '_ {
        self.frames.iter().map(|f| f.cam_id())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// An RGB rendering produced for humans, e.g. the projected board with the
/// impact marked.
#[derive(Clone)]
pub struct RgbFrame {
    pub pixels: Arc<PixelBuffer<RGB8>>,
    pub frame_id: FrameId,
    pub camera_info: CameraInfo,
}

impl RgbFrame {
    pub fn new(pixels: PixelBuffer<RGB8>, frame_id: FrameId, camera_info: CameraInfo) -> Self {
        Self {
            pixels: Arc::new(pixels),
            frame_id,
            camera_info,
        }
    }
}

impl std::fmt::Debug for RgbFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbFrame")
            .field("frame_id", &self.frame_id)
            .field("cam", &self.camera_info.name)
            .finish()
    }
}

/// One point of a contour polyline, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContourPoint {
    pub x: i32,
    pub y: i32,
}

impl ContourPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

pub type Contour = Vec<ContourPoint>;

/// Contours extracted from one camera's frame.
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub frame_id: FrameId,
    pub camera_info: CameraInfo,
}

/// One [`ContourSet`] per camera for a single capture tick.
#[derive(Debug, Clone)]
pub struct ContourCollection {
    sets: Vec<ContourSet>,
}

impl ContourCollection {
    pub fn new(sets: Vec<ContourSet>) -> Result<Self> {
        let first = sets.first().ok_or(Error::EmptyContourCollection)?;
        let frame_id = first.frame_id;
        for set in &sets {
            if set.frame_id != frame_id {
                return Err(Error::FrameIdMismatch {
                    expected: frame_id,
                    got: set.frame_id,
                });
            }
        }
        Ok(Self { sets })
    }

    pub fn frame_id(&self) -> FrameId {
        self.sets[0].frame_id
    }

    pub fn sets(&self) -> &[ContourSet] {
        &self.sets
    }
}

/// Image-plane pixel where a dart's axis meets the board surface line.
#[derive(Debug, Clone)]
pub struct ImpactPoint {
    pub x: f64,
    pub y: f64,
    pub frame_id: FrameId,
    pub camera_info: CameraInfo,
}

/// One [`ImpactPoint`] per camera, same capture tick.
#[derive(Debug, Clone)]
pub struct ImpactPoints {
    pub points: Vec<ImpactPoint>,
}

/// Millimetre coordinates in the board plane, origin at the bull.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardCoordinate {
    pub x: f64,
    pub y: f64,
}

/// Switches the background-subtraction model set. `dart_number` 0 returns to
/// the primary models; anything else activates a fresh temporary set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBackgroundTrigger {
    pub dart_number: u8,
}

/// Once-per-second grabber statistics, shipped on the `frame_rate` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRateReport {
    /// Achieved frame rate over the last interval.
    pub fr: f64,
    /// Mean per-camera wait for a buffered frame, seconds.
    pub s: Vec<f64>,
    /// Mean per-camera retrieval time, seconds.
    pub r: Vec<f64>,
}
