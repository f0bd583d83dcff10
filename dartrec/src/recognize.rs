//! The dart recognition pipeline: module construction and wiring.

use std::path::PathBuf;
use std::sync::Arc;

use dart_cam::{CameraGrabber, FrameSource};
use dart_detect::{
    BackgroundSubtraction, CleanDifference, EdgeDetection, FitLine, MetaDataWriter,
    ProjectOnBoard, StateMachine,
};
use pipegraph::{ConnectError, Module as _, ParamValue, PipelineContext};

use crate::relay::{MessageRelay, MessageSink};

pub struct RecognizeDarts {
    pub grabber: Arc<CameraGrabber>,
    pub calibrator: Arc<MetaDataWriter>,
    pub bg_sub: Arc<BackgroundSubtraction>,
    pub clean_diff: Arc<CleanDifference>,
    pub edge_det: Arc<EdgeDetection>,
    pub fit_line: Arc<FitLine>,
    pub board_projection: Arc<ProjectOnBoard>,
    pub state_machine: Option<Arc<StateMachine>>,
    pub network_client: Arc<MessageRelay>,
}

impl RecognizeDarts {
    pub fn new(
        ctx: &PipelineContext,
        sources: Vec<Box<dyn FrameSource>>,
        calibration_path: PathBuf,
        sink: Arc<dyn MessageSink>,
        with_state_machine: bool,
    ) -> Self {
        let grabber = CameraGrabber::new(ctx, sources);
        let calibrator = MetaDataWriter::new(ctx, calibration_path);
        let bg_sub = BackgroundSubtraction::new(ctx);
        let clean_diff = CleanDifference::new(ctx);
        let edge_det = EdgeDetection::new(ctx);
        let fit_line = FitLine::new(ctx);
        let board_projection = ProjectOnBoard::new(ctx);
        let state_machine = with_state_machine.then(|| StateMachine::new(ctx));
        let network_client = MessageRelay::new(ctx, sink);

        let pipeline = Self {
            grabber,
            calibrator,
            bg_sub,
            clean_diff,
            edge_det,
            fit_line,
            board_projection,
            state_machine,
            network_client,
        };
        ctx.add_module(pipeline.grabber.clone());
        ctx.add_module(pipeline.calibrator.clone());
        ctx.add_module(pipeline.bg_sub.clone());
        ctx.add_module(pipeline.clean_diff.clone());
        ctx.add_module(pipeline.edge_det.clone());
        ctx.add_module(pipeline.fit_line.clone());
        ctx.add_module(pipeline.board_projection.clone());
        if let Some(sm) = &pipeline.state_machine {
            ctx.add_module(sm.clone());
        }
        ctx.add_module(pipeline.network_client.clone());
        pipeline
    }

    pub fn configure(&self, cam_ids: &[u8], frame_rate: f64, stabilize: bool) {
        self.grabber.configure(cam_ids);
        self.grabber
            .core()
            .set_param("frame_rate", ParamValue::Float(frame_rate));
        self.grabber
            .core()
            .set_param("stabilize_brightness", ParamValue::Bool(stabilize));
    }

    pub fn connect(&self) -> Result<(), ConnectError> {
        // grabbed images go through the calibrator first to add meta-info
        self.grabber.images_out.connect(&self.calibrator.raw_images_in)?;
        // background subtraction is where event detection happens
        self.calibrator
            .calibrated_images_out
            .connect(&self.bg_sub.images_in)?;
        // confirmed events produce foregrounds that get cleaned up
        self.bg_sub
            .synced_foregrounds_out
            .connect(&self.clean_diff.foregrounds_in)?;
        self.clean_diff.diff_out.connect(&self.edge_det.diff_in)?;
        // fit a dart axis per camera; the raw frames are only needed to
        // paint the debug overlay
        self.calibrator
            .calibrated_images_out
            .connect(&self.fit_line.raw_image_in)?;
        match &self.state_machine {
            None => {
                self.edge_det
                    .contours_out
                    .connect(&self.fit_line.contour_collection_in)?;
            }
            Some(sm) => {
                // alternative control path: per-camera sets drive the
                // dart-counting state machine, which matches them into
                // collections and resets backgrounds between darts
                self.edge_det.contour_sets_out.connect(&sm.contours_in)?;
                sm.contour_collection_out
                    .connect(&self.fit_line.contour_collection_in)?;
                sm.set_background_trigger_out
                    .connect(&self.bg_sub.set_background_trigger_in)?;
            }
        }
        // project the per-camera impact points onto the board
        self.fit_line
            .impact_points_out
            .connect(&self.board_projection.impact_points_in)?;
        // ship the coordinate to whoever wants it
        self.board_projection
            .coordinate_out
            .connect(&self.network_client.coordinate_in)?;
        // live calibration updates flow back into the calibrator
        self.network_client
            .calibration_config_out
            .connect(&self.calibrator.config_in)?;

        // the rest is optional remote debug information
        self.grabber
            .frame_rate_out
            .connect(&self.network_client.json_in)?;
        self.bg_sub
            .synced_foregrounds_out
            .connect(&self.network_client.multi_image_in)?;
        self.clean_diff
            .diff_out
            .connect(&self.network_client.multi_image_in)?;
        self.edge_det
            .edged_out
            .connect(&self.network_client.multi_image_in)?;
        self.fit_line
            .debug_images_out
            .connect(&self.network_client.multi_image_in)?;
        self.calibrator
            .display_images_out
            .connect(&self.network_client.multi_image_in)?;
        self.board_projection
            .dartboard_out
            .connect(&self.network_client.image_in)?;
        Ok(())
    }
}
