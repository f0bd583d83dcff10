//! Stamps geometric calibration onto frame bundles.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dart_types::calibration::{
    BOARD_RADIUS, BOARD_SURFACE, BULL_LOCATION, PARAM_NAMES, ROI_END, ROI_START,
};
use dart_types::{CalibrationRecord, CalibrationUpdate, Frame, MultiFrame, PixelBuffer, Roi};
use dart_types::board::{
    RADIUS_INNER_BULL_MM, RADIUS_INNER_DOUBLE_MM, RADIUS_INNER_TRIPLE_MM, RADIUS_OUTER_BULL_MM,
    RADIUS_OUTER_DOUBLE_MM, RADIUS_OUTER_TRIPLE_MM,
};
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, PipelineContext,
};
use tracing::{debug, warn};

/// Horizontal margin the suggested ROI keeps from the frame edges,
/// as a fraction of the frame width.
const ROI_X_MARGIN_FRAC: f64 = 50.0 / 1920.0;

/// Annotates every frame with absolute-pixel calibration values and applies
/// live calibration updates, persisting them between runs.
pub struct MetaDataWriter {
    core: Arc<ModuleCore>,
    pub raw_images_in: Input<MultiFrame>,
    pub config_in: Input<CalibrationUpdate>,
    pub calibrated_images_out: Output<MultiFrame>,
    pub display_images_out: Output<MultiFrame>,
    record: Mutex<CalibrationRecord>,
    blob_path: PathBuf,
}

impl MetaDataWriter {
    pub fn new(ctx: &PipelineContext, blob_path: PathBuf) -> Arc<Self> {
        let core = ctx.new_core("MetaDataWriter");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);

        let raw_images_in = core.input("raw_images_in", &["cam_ids"]);
        let config_in = core.input("config_in", &[]);
        let calibrated_images_out = core.output("calibrated_images_out", &["cam_ids"]);
        let display_images_out = core.output("display_images_out", &["cam_ids"]);

        let this = Arc::new(Self {
            core,
            raw_images_in,
            config_in,
            calibrated_images_out,
            display_images_out,
            record: Mutex::new(CalibrationRecord::default()),
            blob_path,
        });

        let weak = Arc::downgrade(&this);
        this.raw_images_in.set_handler(move |frames: MultiFrame| {
            match weak.upgrade() {
                Some(this) => this.process_raw_images(frames),
                None => Ok(()),
            }
        });
        let weak = Arc::downgrade(&this);
        this.config_in.set_handler(move |update: CalibrationUpdate| {
            match weak.upgrade() {
                Some(this) => this.process_config(update),
                None => Ok(()),
            }
        });
        this
    }

    pub fn record(&self) -> CalibrationRecord {
        self.record.lock().unwrap().clone()
    }

    fn process_raw_images(&self, raw_images: MultiFrame) -> HandlerResult {
        let mut processed = Vec::with_capacity(raw_images.len());
        let mut display = Vec::with_capacity(raw_images.len());
        let record = self.record.lock().unwrap().clone();

        for raw in raw_images.frames() {
            let cam = raw.cam_id();
            let (w, h) = (raw.width() as f64, raw.height() as f64);

            let bull_x = (w * record.get(BULL_LOCATION, cam).unwrap_or(0.5)) as i64;
            let board_rad = (w * record.get(BOARD_RADIUS, cam).unwrap_or(0.26)) as i64;
            let board_surface_y = (h * record.get(BOARD_SURFACE, cam).unwrap_or(0.3)) as i64;
            let roi_start_y = (h * record.get(ROI_START, cam).unwrap_or(0.32)) as u32;
            let roi_end_y = (h * record.get(ROI_END, cam).unwrap_or(0.4)) as u32;

            let x_margin = (w * ROI_X_MARGIN_FRAC) as u32;
            let roi = Roi::new(
                x_margin,
                roi_start_y.min(raw.height() - 1),
                raw.width() - 2 * x_margin,
                roi_end_y.saturating_sub(roi_start_y).max(1),
            );

            let mut info = raw.camera_info.clone();
            info.bull = Some(bull_x);
            info.radius = Some(board_rad);
            info.board_surface_y = Some(board_surface_y);
            info.suggested_roi = Some(roi);
            info.calibration = Some(
                PARAM_NAMES
                    .iter()
                    .filter_map(|&name| record.get(name, cam).map(|v| (name.to_string(), v)))
                    .collect(),
            );
            processed.push(raw.with_info(info.clone()));

            display.push(self.render_display_frame(raw, &info, bull_x, board_rad, board_surface_y));
        }

        let mut calibrated = MultiFrame::new(processed)?;
        calibrated.has_processing_trigger = raw_images.has_processing_trigger;
        self.calibrated_images_out.publish(&calibrated);
        self.display_images_out.publish(&MultiFrame::new(display)?);
        Ok(())
    }

    /// Copy of the frame with bull, ring and surface calibration lines
    /// burned in.
    fn render_display_frame(
        &self,
        raw: &Frame,
        info: &dart_types::CameraInfo,
        bull_x: i64,
        board_rad: i64,
        board_surface_y: i64,
    ) -> Frame {
        let h = raw.height() as i64;
        let w = raw.width() as i64;
        let mut im = PixelBuffer::copy_from(raw.pixels.as_ref());
        im = dart_imops::draw_line(im, (bull_x, 0), (bull_x, h - 1), 255);
        for ring in [
            RADIUS_OUTER_DOUBLE_MM,
            RADIUS_INNER_DOUBLE_MM,
            RADIUS_INNER_TRIPLE_MM,
            RADIUS_OUTER_TRIPLE_MM,
            RADIUS_INNER_BULL_MM,
            RADIUS_OUTER_BULL_MM,
        ] {
            let dx = (board_rad as f64 * ring / RADIUS_OUTER_DOUBLE_MM) as i64;
            im = dart_imops::draw_line(im, (bull_x - dx, 0), (bull_x - dx, h - 1), 200);
            im = dart_imops::draw_line(im, (bull_x + dx, 0), (bull_x + dx, h - 1), 200);
        }
        im = dart_imops::draw_line(im, (0, board_surface_y), (w - 1, board_surface_y), 255);

        let mut info = info.clone();
        info.topic = Some(self.core.name().to_string());
        Frame::new(im, raw.frame_id, info)
    }

    fn process_config(&self, update: CalibrationUpdate) -> HandlerResult {
        debug!("got calibration update {:?}", update);
        let mut record = self.record.lock().unwrap();
        record.merge(&update)?;
        record.save(&self.blob_path)?;
        Ok(())
    }
}

impl Module for MetaDataWriter {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }

    fn pre_start(&self) {
        match CalibrationRecord::load(&self.blob_path) {
            Ok(record) => {
                *self.record.lock().unwrap() = record;
                debug!("loaded calibration from {}", self.blob_path.display());
            }
            Err(e) => {
                warn!(
                    "no calibration data found at {} ({e}); using built-in defaults",
                    self.blob_path.display()
                );
            }
        }
    }
}
