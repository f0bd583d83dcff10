use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dart_cam::{FrameSource, SyntheticSource};
use dart_types::{CamId, PixelBuffer};
use machine_vision_formats::pixel_format::Mono8;
use pipegraph::{PipelineContext, SpinOpts};
use tracing::error;

use dartrec::{init_logging, RecognizeDarts, TracingSink};

#[derive(Parser, Debug)]
#[command(name = "dartrec", about = "real-time dart recognition pipeline")]
struct Cli {
    /// Camera ids, in bundle order.
    #[arg(long, value_delimiter = ',', default_value = "0,1")]
    cams: Vec<u8>,

    /// Target capture rate, Hz.
    #[arg(long, default_value_t = 30.0)]
    frame_rate: f64,

    /// Calibration blob, loaded at startup and updated on live calibration.
    #[arg(long, default_value = "CALIBRATION")]
    calibration: PathBuf,

    /// Stop after this many seconds instead of running until interrupted.
    #[arg(long)]
    duration: Option<f64>,

    /// Skip the brightness stabilization phase.
    #[arg(long)]
    no_stabilize: bool,

    /// Use the dart-counting state machine to drive background resets.
    #[arg(long)]
    state_machine: bool,
}

/// Stand-in for real camera drivers: a static scene with a "dart" stripe
/// appearing periodically, so the full pipeline exercises end to end.
fn demo_source(cam: CamId) -> Box<dyn FrameSource> {
    const W: u32 = 1920;
    const H: u32 = 1080;
    Box::new(SyntheticSource::new(cam, move |tick| {
        let mut im = PixelBuffer::<Mono8>::new_filled(W, H, 70);
        if tick % 240 == 100 {
            // a dark shaft crossing the whole detection band
            let x0 = 800 + cam.0 as usize * 40;
            for y in 300..H as usize {
                for x in x0..x0 + 60 {
                    im.image_data[y * W as usize + x] = 0;
                }
            }
        }
        im
    }))
}

fn run() -> i32 {
    let cli = Cli::parse();

    let ctx = PipelineContext::new();
    let sources: Vec<Box<dyn FrameSource>> =
        cli.cams.iter().map(|&c| demo_source(CamId(c))).collect();
    let pipeline = RecognizeDarts::new(
        &ctx,
        sources,
        cli.calibration.clone(),
        Arc::new(TracingSink),
        cli.state_machine,
    );

    {
        let ctx = ctx.clone();
        if let Err(e) = ctrlc::set_handler(move || ctx.interrupt()) {
            error!("cannot install signal handler: {e}");
        }
    }

    let result = ctx.start(
        || pipeline.configure(&cli.cams, cli.frame_rate, !cli.no_stabilize),
        || pipeline.connect(),
        SpinOpts {
            timeout: cli.duration.map(Duration::from_secs_f64),
            exit_condition: None,
            sink: None,
        },
    );

    match result {
        Ok(status) => status.code(),
        Err(e) => {
            error!("startup failed: {e}");
            2
        }
    }
}

fn main() {
    init_logging();
    std::process::exit(run());
}
