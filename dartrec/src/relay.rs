//! Outbound message relay.
//!
//! Network transports (MQTT, ROS) stay outside the core; they implement
//! [`MessageSink`] and receive topic-addressed payloads. Inbound live
//! calibration messages enter through [`MessageRelay::inject_calibration`].

use std::sync::Arc;

use dart_types::{
    BoardCoordinate, CalibrationUpdate, FrameRateReport, MultiFrame, PixelBuffer, RgbFrame,
};
use machine_vision_formats::pixel_format::{Mono8, RGB8};
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, PipelineContext,
};
use tracing::{debug, info};

/// Payload handed to a transport sink. Image encoding (JPEG/PNG) is the
/// transport's business.
pub enum SinkPayload<'a> {
    Json(String),
    Mono(&'a PixelBuffer<Mono8>),
    Rgb(&'a PixelBuffer<RGB8>),
}

pub trait MessageSink: Send + Sync {
    fn publish(&self, topic: &str, payload: SinkPayload<'_>);
}

/// Default sink: logs what would go out on the wire.
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn publish(&self, topic: &str, payload: SinkPayload<'_>) {
        match payload {
            SinkPayload::Json(json) => info!("[{topic}] {json}"),
            SinkPayload::Mono(im) => debug!("[{topic}] mono image {}x{}", im.width, im.height),
            SinkPayload::Rgb(im) => debug!("[{topic}] rgb image {}x{}", im.width, im.height),
        }
    }
}

/// Terminal module shipping results and debug images to a transport sink.
pub struct MessageRelay {
    core: Arc<ModuleCore>,
    pub coordinate_in: Input<BoardCoordinate>,
    pub json_in: Input<FrameRateReport>,
    pub image_in: Input<RgbFrame>,
    pub multi_image_in: Input<MultiFrame>,
    pub calibration_config_out: Output<CalibrationUpdate>,
    sink: Arc<dyn MessageSink>,
}

impl MessageRelay {
    pub fn new(ctx: &PipelineContext, sink: Arc<dyn MessageSink>) -> Arc<Self> {
        let core = ctx.new_core("MessageRelay");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);

        let coordinate_in = core.input("coordinate_in", &[]);
        let json_in = core.input("json_in", &[]);
        let image_in = core.input("image_in", &["cam_ids"]);
        let multi_image_in = core.input("multi_image_in", &["cam_ids"]);
        let calibration_config_out = core.output("calibration_config_out", &[]);

        let this = Arc::new(Self {
            core,
            coordinate_in,
            json_in,
            image_in,
            multi_image_in,
            calibration_config_out,
            sink,
        });

        let weak = Arc::downgrade(&this);
        this.coordinate_in.set_handler(move |coordinate: BoardCoordinate| {
            match weak.upgrade() {
                Some(this) => this.process_coordinate(coordinate),
                None => Ok(()),
            }
        });
        let weak = Arc::downgrade(&this);
        this.json_in.set_handler(move |report: FrameRateReport| match weak.upgrade() {
            Some(this) => this.process_report(report),
            None => Ok(()),
        });
        let weak = Arc::downgrade(&this);
        this.image_in.set_handler(move |frame: RgbFrame| match weak.upgrade() {
            Some(this) => this.process_image(frame),
            None => Ok(()),
        });
        let weak = Arc::downgrade(&this);
        this.multi_image_in.set_handler(move |frames: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_multi_image(frames),
            None => Ok(()),
        });
        this
    }

    fn process_coordinate(&self, coordinate: BoardCoordinate) -> HandlerResult {
        let json = serde_json::to_string(&coordinate)?;
        self.sink.publish("board_coordinate", SinkPayload::Json(json));
        Ok(())
    }

    fn process_report(&self, report: FrameRateReport) -> HandlerResult {
        let json = serde_json::to_string(&report)?;
        self.sink.publish("frame_rate", SinkPayload::Json(json));
        Ok(())
    }

    fn process_image(&self, frame: RgbFrame) -> HandlerResult {
        let topic = frame.camera_info.topic.as_deref().unwrap_or("image");
        self.sink.publish(topic, SinkPayload::Rgb(frame.pixels.as_ref()));
        Ok(())
    }

    fn process_multi_image(&self, frames: MultiFrame) -> HandlerResult {
        for frame in frames.frames() {
            let topic = frame.camera_info.topic.as_deref().unwrap_or("images");
            let topic = format!("{}/{}", topic, frame.cam_id());
            self.sink.publish(&topic, SinkPayload::Mono(frame.pixels.as_ref()));
        }
        Ok(())
    }

    /// Feed a live calibration message (`{"<cam>": {"<param>": value}}`,
    /// topic `calibration/data/new_calibration/<cam>`) into the pipeline.
    pub fn inject_calibration(&self, payload: &str) -> Result<(), dart_types::Error> {
        let update = CalibrationUpdate::from_json(payload)?;
        self.calibration_config_out.publish(&update);
        Ok(())
    }
}

impl Module for MessageRelay {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}
