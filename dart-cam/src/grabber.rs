//! Synchronized multi-camera grabber module.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dart_types::{CameraInfo, Frame, FrameId, FrameRateReport, MultiFrame};
use pipegraph::{
    CancelToken, HandlerResult, Module, ModuleCore, Output, ParamKind, ParamValue,
    PipelineContext,
};
use tracing::{debug, error, info};

use crate::FrameSource;

/// Cameras are warmed up until their mean luma drops below this value.
const BRIGHTNESS_STABLE_BELOW: f64 = 90.0;
/// Minimum samples per camera before the warm-up may end.
const MIN_STABILIZE_SAMPLES: usize = 10;

const RETRIEVAL_TIMES_KEPT: usize = 10;

/// Publishes one synchronized [`MultiFrame`] per tick at the target rate.
///
/// Frame ids are a monotonic per-run counter, shared by all frames of a
/// tick. Collection is synchronous: the tick waits on every camera.
pub struct CameraGrabber {
    core: Arc<ModuleCore>,
    pub images_out: Output<MultiFrame>,
    pub frame_rate_out: Output<FrameRateReport>,
    sources: Mutex<Option<Vec<Box<dyn FrameSource>>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl CameraGrabber {
    pub fn new(ctx: &PipelineContext, sources: Vec<Box<dyn FrameSource>>) -> Arc<Self> {
        let core = ctx.new_core("CameraGrabber");
        core.declare_param("cam_ids", ParamKind::IntList, None, true);
        core.declare_param(
            "frame_rate",
            ParamKind::Float,
            Some(ParamValue::Float(30.0)),
            false,
        );
        core.declare_param(
            "stabilize_brightness",
            ParamKind::Bool,
            Some(ParamValue::Bool(true)),
            false,
        );

        let images_out = core.output("images_out", &["cam_ids"]);
        let frame_rate_out = core.output("frame_rate_out", &[]);

        Arc::new(Self {
            core,
            images_out,
            frame_rate_out,
            sources: Mutex::new(Some(sources)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Set the camera list and propagate it downstream.
    pub fn configure(&self, cam_ids: &[u8]) {
        self.core.set_param(
            "cam_ids",
            ParamValue::IntList(cam_ids.iter().map(|&c| c as i64).collect()),
        );
    }

    fn frame_rate(&self) -> f64 {
        self.core
            .param("frame_rate")
            .and_then(|v| v.as_float())
            .unwrap_or(30.0)
    }

    /// Capture frames per camera until each is dark enough and has
    /// delivered a minimum number of samples.
    fn stabilize_brightness(sources: &mut [Box<dyn FrameSource>]) -> Result<(), crate::SourceError> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter_mut()
                .map(|source| {
                    scope.spawn(move || -> Result<(), crate::SourceError> {
                        let cam = source.cam_id();
                        let mut collected = 0;
                        let mut brightness = f64::INFINITY;
                        while brightness > BRIGHTNESS_STABLE_BELOW
                            || collected < MIN_STABILIZE_SAMPLES
                        {
                            let frame = source.grab()?;
                            brightness = dart_imops::mean_luma(&frame);
                            collected += 1;
                            debug!("camera {} brightness: {:.1}", cam, brightness);
                        }
                        info!("camera {} brightness stabilized", cam);
                        Ok(())
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("stabilization thread panicked")?;
            }
            Ok(())
        })
    }
}

/// State moved into the collection thread.
struct CollectionLoop {
    images_out: Output<MultiFrame>,
    frame_rate_out: Output<FrameRateReport>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
    sources: Vec<Box<dyn FrameSource>>,
    frame_rate: f64,
}

impl CollectionLoop {
    fn run(mut self) {
        let tick_budget = Duration::from_secs_f64(1.0 / self.frame_rate);
        let n_cams = self.sources.len();
        let mut next_frame_id: u64 = 0;

        let mut frame_count: u32 = 0;
        let mut total_wait = vec![0.0f64; n_cams];
        let mut retrieval_times: Vec<VecDeque<f64>> =
            vec![VecDeque::with_capacity(RETRIEVAL_TIMES_KEPT); n_cams];
        let mut interval_start = Instant::now();

        while self.running.load(Ordering::SeqCst) && !self.cancel.is_canceled() {
            let tick_start = Instant::now();
            let frame_id = FrameId(next_frame_id);
            next_frame_id += 1;
            let ts = chrono::Utc::now();

            let mut frames = Vec::with_capacity(n_cams);
            let mut failed = false;
            for (i, source) in self.sources.iter_mut().enumerate() {
                let wait_start = Instant::now();
                match source.grab() {
                    Ok(pixels) => {
                        let waited = wait_start.elapsed().as_secs_f64();
                        total_wait[i] += waited;
                        let times = &mut retrieval_times[i];
                        if times.len() == RETRIEVAL_TIMES_KEPT {
                            times.pop_front();
                        }
                        times.push_back(waited);
                        let info = CameraInfo::with_ts(source.cam_id(), ts);
                        frames.push(Frame::new(pixels, frame_id, info));
                    }
                    Err(e) => {
                        error!("camera {} failed to deliver a frame: {e}", source.cam_id());
                        self.cancel.cancel();
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                break;
            }

            match MultiFrame::new(frames) {
                Ok(bundle) => self.images_out.publish(&bundle),
                Err(e) => {
                    error!("dropping malformed bundle: {e}");
                    continue;
                }
            }
            frame_count += 1;

            let interval = interval_start.elapsed();
            if interval >= Duration::from_secs(1) {
                let fr = frame_count as f64 / interval.as_secs_f64();
                let s: Vec<f64> = total_wait
                    .iter()
                    .map(|t| (t / frame_count as f64 * 1e4).round() / 1e4)
                    .collect();
                let r: Vec<f64> = retrieval_times
                    .iter()
                    .map(|times| {
                        if times.is_empty() {
                            0.0
                        } else {
                            (times.iter().sum::<f64>() / times.len() as f64 * 1e4).round() / 1e4
                        }
                    })
                    .collect();
                debug!("frame rate: {:.1}", fr);
                self.frame_rate_out.publish(&FrameRateReport {
                    fr: (fr * 10.0).round() / 10.0,
                    s,
                    r,
                });
                interval_start = Instant::now();
                frame_count = 0;
                total_wait = vec![0.0; n_cams];
            }

            let elapsed = tick_start.elapsed();
            if elapsed < tick_budget {
                std::thread::sleep(tick_budget - elapsed);
            }
        }
        info!("collection loop stopped");
    }
}

impl Module for CameraGrabber {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }

    fn start(&self) -> HandlerResult {
        let mut sources = self
            .sources
            .lock()
            .unwrap()
            .take()
            .ok_or("grabber started twice")?;

        let stabilize = self
            .core
            .param("stabilize_brightness")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if stabilize {
            Self::stabilize_brightness(&mut sources)?;
            info!("brightness stabilization complete");
        }

        self.running.store(true, Ordering::SeqCst);
        let collection = CollectionLoop {
            images_out: self.images_out.clone(),
            frame_rate_out: self.frame_rate_out.clone(),
            running: self.running.clone(),
            cancel: self.core.cancel_token().clone(),
            sources,
            frame_rate: self.frame_rate(),
        };
        let handle = std::thread::Builder::new()
            .name("camera-grabber".to_string())
            .spawn(move || collection.run())?;
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// The grabber owns the cameras; bring it down first.
    fn shutdown_priority(&self) -> i32 {
        10
    }
}
