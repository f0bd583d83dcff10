//! Morphological cleanup of raw foreground masks.

use std::sync::Arc;

use dart_types::{Frame, MultiFrame};
use pipegraph::{HandlerResult, Input, Module, ModuleCore, Output, ParamKind, PipelineContext};

pub struct CleanDifference {
    core: Arc<ModuleCore>,
    pub foregrounds_in: Input<MultiFrame>,
    pub diff_out: Output<MultiFrame>,
}

impl CleanDifference {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("CleanDifference");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        let foregrounds_in = core.input("foregrounds_in", &["cam_ids"]);
        let diff_out = core.output("diff_out", &["cam_ids"]);

        let this = Arc::new(Self {
            core,
            foregrounds_in,
            diff_out,
        });
        let weak = Arc::downgrade(&this);
        this.foregrounds_in.set_handler(move |fgs: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_foregrounds(fgs),
            None => Ok(()),
        });
        this
    }

    fn process_foregrounds(&self, fgs: MultiFrame) -> HandlerResult {
        let mut cleaned = Vec::with_capacity(fgs.len());
        for fg in fgs.frames() {
            let diff = dart_imops::bilateral_filter(fg.pixels.as_ref(), 11, 57.0, 57.0);
            let opened = dart_imops::morph_open(&diff, 3);
            let opened = dart_imops::morph_close(&opened, 3);
            let opened = dart_imops::threshold_binary(opened, 5, 255);
            let mut info = fg.camera_info.clone();
            info.topic = Some(self.core.name().to_string());
            cleaned.push(Frame::new(opened, fg.frame_id, info));
        }
        self.diff_out.publish(&MultiFrame::new(cleaned)?);
        Ok(())
    }
}

impl Module for CleanDifference {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_types::{CamId, CameraInfo, FrameId, PixelBuffer};
    use machine_vision_formats::pixel_format::Mono8;

    #[test]
    fn speckle_is_removed_blob_survives() {
        let ctx = PipelineContext::new();
        let clean = CleanDifference::new(&ctx);

        let mut buf = PixelBuffer::<Mono8>::new_filled(32, 32, 0);
        buf.image_data[5 * 32 + 5] = 255; // lone speckle
        for y in 10..26 {
            for x in 12..20 {
                buf.image_data[y * 32 + x] = 255; // solid blob
            }
        }
        let frame = Frame::new(buf, FrameId(1), CameraInfo::new(CamId(0)));
        // run the handler directly and inspect via a probe on the output
        let probe = crate::testutil::Probe::<MultiFrame>::new(&ctx);
        clean.diff_out.connect(&probe.input).unwrap();

        clean
            .process_foregrounds(MultiFrame::new(vec![frame]).unwrap())
            .unwrap();
        let got = probe.take().expect("cleaned bundle");
        let out = &got.frames()[0];
        assert_eq!(out.pixels.image_data[5 * 32 + 5], 0);
        assert!(out.pixels.image_data[15 * 32 + 15] > 0);
    }
}
