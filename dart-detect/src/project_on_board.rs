//! Two-ray triangulation onto the planar board.

use std::sync::Arc;

use board_geom::{camera_ray, draw_impact, draw_ray, intersect, render_board, CameraRay};
use dart_types::board::RADIUS_BOARD_MM;
use dart_types::{BoardCoordinate, CamId, CameraInfo, ImpactPoints, PixelBuffer, RgbFrame};
use machine_vision_formats::pixel_format::RGB8;
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, ParamValue, PipelineContext,
};
use tracing::{debug, error, info};

use crate::Error;

/// Pixels per millimetre in the rendered debug board.
const BOARD_RENDER_FACTOR: f64 = 1.0;

pub struct ProjectOnBoard {
    core: Arc<ModuleCore>,
    pub impact_points_in: Input<ImpactPoints>,
    pub coordinate_out: Output<BoardCoordinate>,
    pub dartboard_out: Output<RgbFrame>,
    cached_board: PixelBuffer<RGB8>,
}

impl ProjectOnBoard {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("ProjectOnBoard");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        core.declare_param(
            "frame_width",
            ParamKind::Int,
            Some(ParamValue::Int(1920)),
            false,
        );

        let impact_points_in = core.input("impact_points_in", &["cam_ids"]);
        let coordinate_out = core.output("coordinate_out", &[]);
        let dartboard_out = core.output("dartboard_out", &[]);

        let this = Arc::new(Self {
            core,
            impact_points_in,
            coordinate_out,
            dartboard_out,
            cached_board: render_board(BOARD_RENDER_FACTOR),
        });
        let weak = Arc::downgrade(&this);
        this.impact_points_in
            .set_handler(move |points: ImpactPoints| match weak.upgrade() {
                Some(this) => this.process_impact_points(points),
                None => Ok(()),
            });
        this
    }

    fn frame_width(&self) -> u32 {
        self.core
            .param("frame_width")
            .and_then(|v| v.as_int())
            .unwrap_or(1920) as u32
    }

    fn process_impact_points(&self, impact_points: ImpactPoints) -> HandlerResult {
        let frame_width = self.frame_width();
        let mut rays: Vec<(CamId, CameraRay)> = Vec::with_capacity(impact_points.points.len());

        for point in &impact_points.points {
            let cam = point.camera_info.name;
            let bull = point
                .camera_info
                .bull
                .ok_or(Error::MissingAnnotation(cam, "bull"))?;
            let radius = point
                .camera_info
                .radius
                .ok_or(Error::MissingAnnotation(cam, "radius"))?;
            let ray = camera_ray(cam, point.x, bull as f64, radius as f64, frame_width)?;
            rays.push((cam, ray));
        }

        let Some(ray0) = rays.iter().find(|(c, _)| *c == CamId(0)).map(|(_, r)| *r) else {
            debug!("not enough lines");
            return Ok(());
        };
        let Some(ray1) = rays.iter().find(|(c, _)| *c == CamId(1)).map(|(_, r)| *r) else {
            debug!("not enough lines");
            return Ok(());
        };

        let coordinate = match intersect(&ray0, &ray1) {
            Ok(coordinate) => coordinate,
            Err(board_geom::GeometryError::ParallelRays) => {
                error!("lines parallel; dropping sample");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!("board coordinate: ({:.1}, {:.1}) mm", coordinate.x, coordinate.y);
        self.coordinate_out.publish(&coordinate);
        self.publish_debug_board(&impact_points, &[ray0, ray1], &coordinate);
        Ok(())
    }

    fn publish_debug_board(
        &self,
        impact_points: &ImpactPoints,
        rays: &[CameraRay],
        coordinate: &BoardCoordinate,
    ) {
        let mut board = self.cached_board.clone();
        for (i, ray) in rays.iter().enumerate() {
            draw_ray(&mut board, ray, BOARD_RENDER_FACTOR, i);
        }
        draw_impact(&mut board, coordinate, BOARD_RENDER_FACTOR);

        // crop to a margin around the rim for display
        let center = board.width / 2;
        let half = (RADIUS_BOARD_MM * 1.2 * BOARD_RENDER_FACTOR) as u32;
        let board = board.crop(center - half, center - half, 2 * half, 2 * half);

        let mut info = CameraInfo::new(CamId(0));
        info.topic = Some("dartboard".to_string());
        let frame_id = impact_points.points[0].frame_id;
        self.dartboard_out.publish(&RgbFrame::new(board, frame_id, info));
    }
}

impl Module for ProjectOnBoard {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }

    fn start(&self) -> HandlerResult {
        // the direction convention only covers two cameras
        if let Some(cams) = self.core.param("cam_ids").and_then(|v| v.as_int_list().map(|c| c.to_vec())) {
            if cams.len() > 2 {
                return Err(Error::TooManyCameras(cams.len()).into());
            }
        }
        Ok(())
    }
}
