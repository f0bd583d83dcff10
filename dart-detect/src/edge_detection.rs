//! Canny edges and contour extraction on cleaned foregrounds.

use std::sync::Arc;

use dart_types::{ContourCollection, ContourSet, Frame, MultiFrame};
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, ParamValue, PipelineContext,
};

pub struct EdgeDetection {
    core: Arc<ModuleCore>,
    pub diff_in: Input<MultiFrame>,
    pub edged_out: Output<MultiFrame>,
    pub contours_out: Output<ContourCollection>,
    /// Per-camera contour sets, published every tick even when empty. The
    /// state-machine control path consumes these.
    pub contour_sets_out: Output<ContourSet>,
}

impl EdgeDetection {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("EdgeDetection");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        // contours shorter than 1/20th of a 1080-high frame are noise
        core.declare_param("edge_limit", ParamKind::Int, Some(ParamValue::Int(1080 / 20)), false);

        let diff_in = core.input("diff_in", &["cam_ids"]);
        let edged_out = core.output("edged_out", &["cam_ids"]);
        let contours_out = core.output("contours_out", &["cam_ids"]);
        let contour_sets_out = core.output("contour_sets_out", &["cam_ids"]);

        let this = Arc::new(Self {
            core,
            diff_in,
            edged_out,
            contours_out,
            contour_sets_out,
        });
        let weak = Arc::downgrade(&this);
        this.diff_in.set_handler(move |diffs: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_diffs(diffs),
            None => Ok(()),
        });
        this
    }

    fn edge_limit(&self) -> i32 {
        self.core
            .param("edge_limit")
            .and_then(|v| v.as_int())
            .unwrap_or(54) as i32
    }

    fn process_diffs(&self, diffs: MultiFrame) -> HandlerResult {
        let edge_limit = self.edge_limit();
        let mut edged_frames = Vec::with_capacity(diffs.len());
        let mut collection = Vec::new();

        for diff in diffs.frames() {
            let edged = dart_imops::canny(diff.pixels.as_ref(), 255.0 / 3.0, 255.0);
            let contours: Vec<_> = dart_imops::find_external_contours(&edged)
                .into_iter()
                .filter(|c| dart_imops::vertical_extent(c) > edge_limit)
                .collect();

            let set = ContourSet {
                contours,
                frame_id: diff.frame_id,
                camera_info: diff.camera_info.clone(),
            };
            self.contour_sets_out.publish(&set);
            if !set.contours.is_empty() {
                collection.push(set);
            }

            let mut info = diff.camera_info.clone();
            info.topic = Some(self.core.name().to_string());
            edged_frames.push(Frame::new(edged, diff.frame_id, info));
        }

        self.edged_out.publish(&MultiFrame::new(edged_frames)?);
        if !collection.is_empty() {
            self.contours_out.publish(&ContourCollection::new(collection)?);
        }
        Ok(())
    }
}

impl Module for EdgeDetection {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}
