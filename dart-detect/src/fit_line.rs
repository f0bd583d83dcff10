//! Dart-axis fitting: one impact point per camera.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dart_types::{
    ContourCollection, Frame, ImpactPoint, ImpactPoints, MultiFrame, PixelBuffer,
};
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, PipelineContext,
};
use tracing::{debug, error};

/// Annotated bundles kept around for debug rendering; older ticks are
/// evicted first.
const FRAME_CACHE_DEPTH: usize = 10;

/// How many of the longest contours are considered per camera.
const MAX_CONTOURS: usize = 10;

pub struct FitLine {
    core: Arc<ModuleCore>,
    pub raw_image_in: Input<MultiFrame>,
    pub contour_collection_in: Input<ContourCollection>,
    pub impact_points_out: Output<ImpactPoints>,
    pub debug_images_out: Output<MultiFrame>,
    cache: Mutex<VecDeque<MultiFrame>>,
}

impl FitLine {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("FitLine");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);

        let raw_image_in = core.input("raw_image_in", &["cam_ids"]);
        let contour_collection_in = core.input("contour_collection_in", &["cam_ids"]);
        let impact_points_out = core.output("impact_points_out", &["cam_ids"]);
        let debug_images_out = core.output("debug_images_out", &["cam_ids"]);

        let this = Arc::new(Self {
            core,
            raw_image_in,
            contour_collection_in,
            impact_points_out,
            debug_images_out,
            cache: Mutex::new(VecDeque::with_capacity(FRAME_CACHE_DEPTH)),
        });
        let weak = Arc::downgrade(&this);
        this.raw_image_in.set_handler(move |frames: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_raw_images(frames),
            None => Ok(()),
        });
        let weak = Arc::downgrade(&this);
        this.contour_collection_in
            .set_handler(move |collection: ContourCollection| match weak.upgrade() {
                Some(this) => this.process_contours(collection),
                None => Ok(()),
            });
        this
    }

    fn process_raw_images(&self, frames: MultiFrame) -> HandlerResult {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() == FRAME_CACHE_DEPTH {
            cache.pop_front();
        }
        cache.push_back(frames);
        Ok(())
    }

    fn process_contours(&self, collection: ContourCollection) -> HandlerResult {
        let frame_id = collection.frame_id();
        let cached = {
            let mut cache = self.cache.lock().unwrap();
            match cache.iter().position(|mf| mf.frame_id() == frame_id) {
                Some(idx) => cache.remove(idx).unwrap(),
                None => {
                    // stale: the tick was evicted before its contours came in
                    error!("no cached frames for tick {frame_id}; dropping contours");
                    return Ok(());
                }
            }
        };

        let mut points = Vec::new();
        let mut debug_frames = Vec::new();

        for set in collection.sets() {
            let cam = set.camera_info.name;
            let Some(raw) = cached.frames().iter().find(|f| f.cam_id() == cam) else {
                error!("tick {frame_id} has no frame for camera {cam}");
                continue;
            };
            let roi = set.camera_info.roi.or(set.camera_info.suggested_roi);
            let (roi_x, roi_y) = roi.map(|r| (r.x as f64, r.y as f64)).unwrap_or((0.0, 0.0));

            let mut longest: Vec<_> = set.contours.iter().collect();
            longest.sort_by(|a, b| {
                dart_imops::arc_length(b, true)
                    .partial_cmp(&dart_imops::arc_length(a, true))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            longest.truncate(MAX_CONTOURS);

            // the longest contour is the dart shaft
            let Some(contour) = longest.first() else {
                continue;
            };
            let Some(line) = dart_imops::fit_line_l2(contour) else {
                continue;
            };
            let line = line.translated(roi_x, roi_y);

            // the topmost contour vertex is the tip in this geometry
            let tip_y = contour.iter().map(|p| p.y).min().unwrap_or(0) as f64 + roi_y;
            let Some(impact_x) = line.x_at_y(tip_y) else {
                debug!("horizontal axis fit for camera {cam}; dropping");
                continue;
            };

            points.push(ImpactPoint {
                x: impact_x,
                y: tip_y,
                frame_id,
                camera_info: set.camera_info.clone(),
            });

            debug_frames.push(self.render_debug_frame(raw, &line, (impact_x, tip_y)));
        }

        if !points.is_empty() {
            self.impact_points_out.publish(&ImpactPoints { points });
        }
        if !debug_frames.is_empty() {
            self.debug_images_out
                .publish(&MultiFrame::new(debug_frames)?);
        }
        Ok(())
    }

    fn render_debug_frame(
        &self,
        raw: &Frame,
        line: &dart_imops::FittedLine,
        impact: (f64, f64),
    ) -> Frame {
        let mut im = PixelBuffer::copy_from(raw.pixels.as_ref());
        let p1 = (
            (line.x0 - line.vx * 5000.0) as i64,
            (line.y0 - line.vy * 5000.0) as i64,
        );
        let p2 = (
            (line.x0 + line.vx * 5000.0) as i64,
            (line.y0 + line.vy * 5000.0) as i64,
        );
        im = dart_imops::draw_line(im, p1, p2, 255);
        // small cross at the impact
        let (ix, iy) = (impact.0 as i64, impact.1 as i64);
        im = dart_imops::draw_line(im, (ix - 7, iy), (ix + 7, iy), 255);
        im = dart_imops::draw_line(im, (ix, iy - 7), (ix, iy + 7), 255);

        let mut info = raw.camera_info.clone();
        info.topic = Some(self.core.name().to_string());
        Frame::new(im, raw.frame_id, info)
    }
}

impl Module for FitLine {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Probe;
    use dart_types::{CamId, CameraInfo, ContourPoint, ContourSet, FrameId, Roi};
    use machine_vision_formats::pixel_format::Mono8;

    fn raw_bundle(frame_id: u64) -> MultiFrame {
        let mut info0 = CameraInfo::new(CamId(0));
        info0.suggested_roi = Some(Roi::new(50, 350, 1850, 130));
        MultiFrame::new(vec![Frame::new(
            PixelBuffer::<Mono8>::new_filled(64, 64, 0),
            FrameId(frame_id),
            info0,
        )])
        .unwrap()
    }

    fn vertical_contour_set(frame_id: u64, x: i32) -> ContourSet {
        let mut info = CameraInfo::new(CamId(0));
        info.roi = Some(Roi::new(50, 350, 1850, 130));
        // a thin vertical shaft at roi-local column x
        let mut contour = Vec::new();
        for y in 10..60 {
            contour.push(ContourPoint::new(x, y));
        }
        for y in (10..60).rev() {
            contour.push(ContourPoint::new(x + 1, y));
        }
        ContourSet {
            contours: vec![contour],
            frame_id: FrameId(frame_id),
            camera_info: info,
        }
    }

    #[test]
    fn impact_point_is_roi_translated() {
        let ctx = PipelineContext::new();
        let fit = FitLine::new(&ctx);
        let probe = Probe::<ImpactPoints>::new(&ctx);
        fit.impact_points_out.connect(&probe.input).unwrap();

        fit.process_raw_images(raw_bundle(5)).unwrap();
        let collection =
            ContourCollection::new(vec![vertical_contour_set(5, 100)]).unwrap();
        fit.process_contours(collection).unwrap();

        let points = probe.take().expect("impact points");
        assert_eq!(points.points.len(), 1);
        let p = &points.points[0];
        // tip: topmost contour y (10) + roi.y (350)
        assert_eq!(p.y, 360.0);
        // shaft between roi-local columns 100 and 101, plus roi.x
        assert!((p.x - 150.5).abs() < 1.0, "x was {}", p.x);
        assert_eq!(p.frame_id, FrameId(5));
    }

    #[test]
    fn stale_contours_are_dropped() {
        let ctx = PipelineContext::new();
        let fit = FitLine::new(&ctx);
        let probe = Probe::<ImpactPoints>::new(&ctx);
        fit.impact_points_out.connect(&probe.input).unwrap();

        let collection = ContourCollection::new(vec![vertical_contour_set(99, 10)]).unwrap();
        fit.process_contours(collection).unwrap();
        assert!(probe.take().is_none());
    }

    #[test]
    fn cache_is_bounded_fifo() {
        let ctx = PipelineContext::new();
        let fit = FitLine::new(&ctx);
        for i in 0..15 {
            fit.process_raw_images(raw_bundle(i)).unwrap();
        }
        let cache = fit.cache.lock().unwrap();
        assert_eq!(cache.len(), FRAME_CACHE_DEPTH);
        assert_eq!(cache.front().unwrap().frame_id(), FrameId(5));
        assert_eq!(cache.back().unwrap().frame_id(), FrameId(14));
    }
}
