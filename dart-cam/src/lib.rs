//! Multi-camera frame acquisition.
//!
//! Device drivers live outside the core and implement [`FrameSource`]; the
//! [`CameraGrabber`] module turns a set of sources into synchronized
//! [`MultiFrame`] bundles with monotonic frame ids. [`SyntheticSource`] and
//! [`ReplaySource`] provide frames for tests and offline runs.

use dart_types::{CamId, PixelBuffer};
use machine_vision_formats::pixel_format::Mono8;

mod grabber;
pub use grabber::CameraGrabber;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// One camera delivering frames on demand. `grab` blocks until the next
/// frame is available.
pub trait FrameSource: Send {
    fn cam_id(&self) -> CamId;
    fn grab(&mut self) -> Result<PixelBuffer<Mono8>, SourceError>;
}

/// Generates frames from a closure of the tick number. Used in tests and
/// demo runs.
pub struct SyntheticSource {
    cam: CamId,
    tick: u64,
    render: Box<dyn FnMut(u64) -> PixelBuffer<Mono8> + Send>,
}

impl SyntheticSource {
    pub fn new<F>(cam: CamId, render: F) -> Self
    where
        F: FnMut(u64) -> PixelBuffer<Mono8> + Send + 'static,
    {
        Self {
            cam,
            tick: 0,
            render: Box::new(render),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn cam_id(&self) -> CamId {
        self.cam
    }

    fn grab(&mut self) -> Result<PixelBuffer<Mono8>, SourceError> {
        let frame = (self.render)(self.tick);
        self.tick += 1;
        Ok(frame)
    }
}

/// Loops over a pre-decoded frame sequence, for offline replay.
pub struct ReplaySource {
    cam: CamId,
    frames: Vec<PixelBuffer<Mono8>>,
    next: usize,
}

impl ReplaySource {
    pub fn new(cam: CamId, frames: Vec<PixelBuffer<Mono8>>) -> Self {
        Self {
            cam,
            frames,
            next: 0,
        }
    }
}

impl FrameSource for ReplaySource {
    fn cam_id(&self) -> CamId {
        self.cam
    }

    fn grab(&mut self) -> Result<PixelBuffer<Mono8>, SourceError> {
        if self.frames.is_empty() {
            return Err("replay source has no frames".into());
        }
        let frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        Ok(frame)
    }
}
