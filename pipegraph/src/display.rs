//! Display demultiplexer.
//!
//! Handlers run on worker threads but windowing toolkits are single
//! threaded, so `show_image` only queues frames here, batched per frame
//! name and camera. The pipeline spin loop (the only place allowed to talk
//! to a display) drains complete batches, concatenates the per-camera
//! images and hands one image per frame name to the sink.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use dart_types::{CamId, Frame, PixelBuffer};
use machine_vision_formats::pixel_format::Mono8;
use tracing::warn;

const PER_CAMERA_BACKLOG: usize = 10;

/// Concatenation axis for multi-camera display batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowAxis {
    /// Stack images on top of each other.
    #[default]
    Vertical,
    /// Place images side by side.
    Horizontal,
}

struct Group {
    axis: ShowAxis,
    per_cam: BTreeMap<CamId, VecDeque<Frame>>,
}

/// One lock around the whole image-show map.
#[derive(Default)]
pub struct DisplayDemux {
    groups: Mutex<HashMap<String, Group>>,
}

impl DisplayDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, frame_name: &str, frame: &Frame, axis: ShowAxis) {
        let mut groups = self.groups.lock().unwrap();
        let group = groups.entry(frame_name.to_string()).or_insert_with(|| Group {
            axis,
            per_cam: BTreeMap::new(),
        });
        group.axis = axis;
        let backlog = group.per_cam.entry(frame.cam_id()).or_default();
        if backlog.len() == PER_CAMERA_BACKLOG {
            backlog.pop_front();
        }
        backlog.push_back(frame.clone());
    }

    /// Pop one frame per camera from every group where all cameras have
    /// one pending, and concatenate. Incompatible shapes are skipped with
    /// a warning.
    pub fn drain_ready(&self) -> Vec<(String, PixelBuffer<Mono8>)> {
        let mut out = Vec::new();
        let mut groups = self.groups.lock().unwrap();
        for (name, group) in groups.iter_mut() {
            if group.per_cam.is_empty() || group.per_cam.values().any(|q| q.is_empty()) {
                continue;
            }
            let frames: Vec<Frame> = group
                .per_cam
                .values_mut()
                .map(|q| q.pop_front().unwrap())
                .collect();
            let buffers: Vec<&PixelBuffer<Mono8>> =
                frames.iter().map(|f| f.pixels.as_ref()).collect();
            match concat_mono8(&buffers, group.axis) {
                Some(image) => out.push((name.clone(), image)),
                None => {
                    let shapes: Vec<(u32, u32)> =
                        frames.iter().map(|f| (f.width(), f.height())).collect();
                    warn!("cannot concatenate {:?} images with shapes {:?}", name, shapes);
                }
            }
        }
        out
    }
}

/// Concatenate mono images along `axis`. Returns `None` when the shapes
/// are incompatible.
pub fn concat_mono8(images: &[&PixelBuffer<Mono8>], axis: ShowAxis) -> Option<PixelBuffer<Mono8>> {
    let first = images.first()?;
    match axis {
        ShowAxis::Vertical => {
            if images.iter().any(|im| im.width != first.width) {
                return None;
            }
            let height = images.iter().map(|im| im.height).sum();
            let mut data = Vec::with_capacity(first.width as usize * height as usize);
            for im in images {
                for row in 0..im.height as usize {
                    let start = row * im.stride as usize;
                    data.extend_from_slice(&im.image_data[start..start + im.width as usize]);
                }
            }
            Some(PixelBuffer::from_packed(first.width, height, data))
        }
        ShowAxis::Horizontal => {
            if images.iter().any(|im| im.height != first.height) {
                return None;
            }
            let width: u32 = images.iter().map(|im| im.width).sum();
            let mut data = Vec::with_capacity(width as usize * first.height as usize);
            for row in 0..first.height as usize {
                for im in images {
                    let start = row * im.stride as usize;
                    data.extend_from_slice(&im.image_data[start..start + im.width as usize]);
                }
            }
            Some(PixelBuffer::from_packed(width, first.height, data))
        }
    }
}

/// Final recipient of demuxed display images. Driven from the spin thread
/// only.
pub trait DisplaySink: Send {
    fn show(&mut self, frame_name: &str, image: &PixelBuffer<Mono8>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_types::{CameraInfo, FrameId};

    fn frame(cam: u8, w: u32, h: u32, fill: u8) -> Frame {
        Frame::new(
            PixelBuffer::<Mono8>::new_filled(w, h, fill),
            FrameId(1),
            CameraInfo::new(CamId(cam)),
        )
    }

    #[test]
    fn drains_only_complete_batches() {
        let demux = DisplayDemux::new();
        demux.show("fg", &frame(0, 4, 2, 10), ShowAxis::Vertical);
        assert!(demux.drain_ready().len() == 1);

        demux.show("fg", &frame(0, 4, 2, 10), ShowAxis::Vertical);
        demux.show("fg", &frame(1, 4, 2, 20), ShowAxis::Vertical);
        // now both cameras are known; one frame each -> one batch
        let ready = demux.drain_ready();
        assert_eq!(ready.len(), 1);
        let (name, image) = &ready[0];
        assert_eq!(name, "fg");
        assert_eq!((image.width, image.height), (4, 4));

        // camera 1 alone is not a complete batch anymore
        demux.show("fg", &frame(1, 4, 2, 20), ShowAxis::Vertical);
        assert!(demux.drain_ready().is_empty());
    }

    #[test]
    fn concat_axes() {
        let a = PixelBuffer::<Mono8>::new_filled(3, 2, 1);
        let b = PixelBuffer::<Mono8>::new_filled(3, 2, 2);
        let v = concat_mono8(&[&a, &b], ShowAxis::Vertical).unwrap();
        assert_eq!((v.width, v.height), (3, 4));
        let h = concat_mono8(&[&a, &b], ShowAxis::Horizontal).unwrap();
        assert_eq!((h.width, h.height), (6, 2));
        assert_eq!(&h.image_data[..6], &[1, 1, 1, 2, 2, 2]);

        let c = PixelBuffer::<Mono8>::new_filled(4, 2, 3);
        assert!(concat_mono8(&[&a, &c], ShowAxis::Vertical).is_none());
    }
}
