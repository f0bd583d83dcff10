//! End-to-end scenarios over the assembled recognition pipeline, driven by
//! synthetic camera sources.

use std::sync::Arc;
use std::time::Duration;

use dart_cam::{FrameSource, SyntheticSource};
use dart_types::calibration::{
    BOARD_RADIUS, BOARD_SURFACE, BULL_LOCATION, ROI_END, ROI_START,
};
use dart_types::{BoardCoordinate, CalibrationRecord, CamId, MultiFrame, PixelBuffer};
use machine_vision_formats::pixel_format::Mono8;
use pipegraph::{
    ExitStatus, Input, Module as _, ParamValue, PipelineContext, SpinOpts,
};

use dartrec::{RecognizeDarts, TracingSink};

const W: u32 = 640;
const H: u32 = 360;
const BACKGROUND_LUMA: u8 = 80;

const BULL_PX: f64 = 320.0; // bull_location 0.5
const RADIUS_PX: f64 = 320.0; // board_radius 0.5
const MM_PER_PX: f64 = dart_types::board::RADIUS_OUTER_DOUBLE_MM / RADIUS_PX;
const CAM_DIST_MM: f64 = 460.0;

// The dart stand-in: a wide dark stripe whose tip starts just inside the
// ROI, so its edge map is one symmetric contour centred on the impact
// column.
const STRIPE_WIDTH: usize = 64;
const STRIPE_TOP: usize = 74;

fn test_calibration(dir: &std::path::Path) -> std::path::PathBuf {
    let mut record = CalibrationRecord::default();
    for cam in [CamId(0), CamId(1)] {
        record.set(BULL_LOCATION, cam, 0.5).unwrap();
        record.set(BOARD_RADIUS, cam, 0.5).unwrap();
        record.set(BOARD_SURFACE, cam, 0.3).unwrap();
        record.set(ROI_START, cam, 0.2).unwrap();
        record.set(ROI_END, cam, 0.28).unwrap();
    }
    let path = dir.join("CALIBRATION");
    record.save(&path).unwrap();
    path
}

fn uniform_frame() -> PixelBuffer<Mono8> {
    PixelBuffer::<Mono8>::new_filled(W, H, BACKGROUND_LUMA)
}

fn stripe_frame(center_x: f64) -> PixelBuffer<Mono8> {
    let mut im = uniform_frame();
    let x0 = (center_x - STRIPE_WIDTH as f64 / 2.0).round() as usize;
    for y in STRIPE_TOP..H as usize {
        for x in x0..x0 + STRIPE_WIDTH {
            im.image_data[y * W as usize + x] = 0;
        }
    }
    im
}

/// Image column at which `cam` sees a dart at board position `(bx, by)`.
fn impact_column(cam: u8, board: (f64, f64)) -> f64 {
    let (bx, by) = board;
    let impact_mm = if cam == 0 {
        by * CAM_DIST_MM / (bx + CAM_DIST_MM)
    } else {
        bx * CAM_DIST_MM / (by + CAM_DIST_MM)
    };
    let dir = if cam == 0 { -1.0 } else { 1.0 };
    BULL_PX + dir * impact_mm / MM_PER_PX
}

struct Probe<T> {
    input: Input<T>,
}

impl<T: pipegraph::Payload> Probe<T> {
    fn new(ctx: &PipelineContext, capacity: usize) -> Self {
        let core = ctx.new_core("Probe");
        let input = core.input_with_capacity("probe_in", &[], capacity);
        Self { input }
    }

    fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.input.try_take()).collect()
    }
}

fn build_pipeline(
    ctx: &PipelineContext,
    dir: &std::path::Path,
    dart_at: Option<(f64, f64)>,
    event_tick: u64,
) -> RecognizeDarts {
    let sources: Vec<Box<dyn FrameSource>> = [0u8, 1]
        .iter()
        .map(|&cam| {
            let column = dart_at.map(|board| impact_column(cam, board));
            Box::new(SyntheticSource::new(CamId(cam), move |tick| {
                match column {
                    Some(column) if tick == event_tick => stripe_frame(column),
                    _ => uniform_frame(),
                }
            })) as Box<dyn FrameSource>
        })
        .collect();

    RecognizeDarts::new(ctx, sources, test_calibration(dir), Arc::new(TracingSink), false)
}

/// S1: a steady background never produces an event, even with a raised
/// warm-up requirement.
#[test]
fn warm_up_produces_no_events() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = PipelineContext::new();
    let pipeline = build_pipeline(&ctx, dir.path(), None, u64::MAX);
    pipeline
        .bg_sub
        .core()
        .set_param("min_amount_of_initial_images", ParamValue::Int(5));
    pipeline
        .board_projection
        .core()
        .set_param("frame_width", ParamValue::Int(W as i64));

    let bundles = Probe::<MultiFrame>::new(&ctx, 64);
    let foregrounds = Probe::<MultiFrame>::new(&ctx, 64);
    let coordinates = Probe::<BoardCoordinate>::new(&ctx, 64);

    let bundle_input = bundles.input.clone();
    let status = ctx
        .start(
            || pipeline.configure(&[0, 1], 100.0, false),
            || {
                pipeline.connect()?;
                pipeline.grabber.images_out.connect(&bundles.input)?;
                pipeline
                    .bg_sub
                    .synced_foregrounds_out
                    .connect(&foregrounds.input)?;
                pipeline
                    .board_projection
                    .coordinate_out
                    .connect(&coordinates.input)?;
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(20)),
                exit_condition: Some(Box::new(move || bundle_input.queue_len() >= 10)),
                sink: None,
            },
        )
        .map_err(|e| eyre::eyre!("{e}"))?;

    assert_eq!(status, ExitStatus::Clean);
    assert!(bundles.drain().len() >= 10);
    assert!(foregrounds.drain().is_empty(), "no foreground may be published");
    assert!(coordinates.drain().is_empty(), "no coordinate may be published");
    Ok(())
}

/// S2: a dart seen by both cameras produces exactly one board coordinate,
/// within 2 mm of the analytically computed intersection.
#[test]
fn single_dart_event_recovers_board_coordinate() -> eyre::Result<()> {
    let target = (30.0, -40.0);
    let dir = tempfile::tempdir()?;
    let ctx = PipelineContext::new();
    let pipeline = build_pipeline(&ctx, dir.path(), Some(target), 6);
    pipeline
        .board_projection
        .core()
        .set_param("frame_width", ParamValue::Int(W as i64));
    // the shallow test ROI cannot hold 54-pixel contours
    pipeline
        .edge_det
        .core()
        .set_param("edge_limit", ParamValue::Int(15));

    let coordinates = Probe::<BoardCoordinate>::new(&ctx, 16);
    let foregrounds = Probe::<MultiFrame>::new(&ctx, 16);

    let coordinate_input = coordinates.input.clone();
    let status = ctx
        .start(
            // 5 Hz keeps the event tick inside the frame cache while the
            // foreground works its way through the pipeline
            || pipeline.configure(&[0, 1], 5.0, false),
            || {
                pipeline.connect()?;
                pipeline
                    .board_projection
                    .coordinate_out
                    .connect(&coordinates.input)?;
                pipeline
                    .bg_sub
                    .synced_foregrounds_out
                    .connect(&foregrounds.input)?;
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(30)),
                exit_condition: Some(Box::new(move || coordinate_input.queue_len() >= 1)),
                sink: None,
            },
        )
        .map_err(|e| eyre::eyre!("{e}"))?;

    assert_eq!(status, ExitStatus::Clean);
    let got = coordinates.drain();
    assert_eq!(got.len(), 1, "expected exactly one board coordinate");
    let hit = got[0];
    assert!(
        (hit.x - target.0).abs() < 2.0,
        "x {} vs expected {}",
        hit.x,
        target.0
    );
    assert!(
        (hit.y - target.1).abs() < 2.0,
        "y {} vs expected {}",
        hit.y,
        target.1
    );
    // the confirmed event published exactly one synchronized foreground
    let fg = foregrounds.drain();
    assert_eq!(fg.len(), 1);
    assert_eq!(fg[0].len(), 2);
    for frame in fg[0].frames() {
        assert!(frame.camera_info.roi.is_some());
    }
    Ok(())
}

/// S5: a live calibration update is persisted and reflected in subsequent
/// annotated frames.
#[test]
fn calibration_live_update_round_trips() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = PipelineContext::new();
    let pipeline = build_pipeline(&ctx, dir.path(), None, u64::MAX);
    pipeline
        .board_projection
        .core()
        .set_param("frame_width", ParamValue::Int(W as i64));

    let calibrated = Probe::<MultiFrame>::new(&ctx, 4096);

    let relay = pipeline.network_client.clone();
    let calibrated_input = calibrated.input.clone();
    let writer = pipeline.calibrator.clone();
    let seen_at_update = std::sync::atomic::AtomicUsize::new(usize::MAX);

    let status = ctx
        .start(
            || pipeline.configure(&[0, 1], 100.0, false),
            || {
                pipeline.connect()?;
                pipeline
                    .calibrator
                    .calibrated_images_out
                    .connect(&calibrated.input)?;
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(20)),
                exit_condition: Some(Box::new(move || {
                    use std::sync::atomic::Ordering;
                    let mark = seen_at_update.load(Ordering::SeqCst);
                    if mark == usize::MAX {
                        if calibrated_input.queue_len() > 0 {
                            // pipeline is flowing; inject the live update
                            relay
                                .inject_calibration(r#"{"1": {"board_surface": 0.42}}"#)
                                .expect("inject calibration");
                            seen_at_update.store(calibrated_input.queue_len(), Ordering::SeqCst);
                        }
                        return false;
                    }
                    // exit once the update landed and a few more annotated
                    // bundles came through after it
                    writer.record().get(BOARD_SURFACE, CamId(1)) == Some(0.42)
                        && calibrated_input.queue_len() > mark + 3
                })),
                sink: None,
            },
        )
        .map_err(|e| eyre::eyre!("{e}"))?;
    assert_eq!(status, ExitStatus::Clean);

    // persisted blob equals the in-memory record
    let blob = CalibrationRecord::load(&dir.path().join("CALIBRATION"))?;
    assert_eq!(blob.get(BOARD_SURFACE, CamId(1)), Some(0.42));
    assert_eq!(blob, pipeline.calibrator.record());

    // the newest annotated bundle reflects the updated surface line
    let bundles = calibrated.drain();
    let last = bundles.last().expect("annotated bundles");
    let cam1 = last
        .frames()
        .iter()
        .find(|f| f.cam_id() == CamId(1))
        .expect("camera 1 frame");
    assert_eq!(cam1.camera_info.board_surface_y, Some((0.42f64 * H as f64) as i64));
    Ok(())
}
