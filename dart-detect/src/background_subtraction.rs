//! Event detection and synchronized foreground extraction.
//!
//! Two parallel MOG2 model sets are kept: the primary set learns the
//! steady-state scene, and a temporary set is created per confirmed event
//! so the dart itself never contaminates the primary models. Each set
//! holds, per camera, a full-ROI model and a 4x-downsampled event model.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dart_types::{CamId, Frame, MultiFrame, PixelBuffer, SetBackgroundTrigger};
use machine_vision_formats::pixel_format::Mono8;
use mog2::BackgroundSubtractorMog2;
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, ParamValue, PipelineContext,
    ShowAxis,
};
use tracing::{debug, warn};

use crate::Error;

/// Below this saturated-pixel sum a change is noise.
const THRESH_LOW: u64 = 2000;
/// Above this an event is confirmed.
const THRESH_HIGH: u64 = 20000;
/// Changes beyond this saturate the downsampled ROI; kept as a guard value
/// for diagnostics.
const THRESH_TOO_HIGH: u64 = 150_000;

const EVENT_DOWNSAMPLE: u32 = 4;
const LEARNING_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ModelKey {
    Full(CamId),
    Event(CamId),
}

/// One coherent set of per-camera background models with their warm-up
/// counters.
#[derive(Default)]
struct SubtractorSet {
    models: BTreeMap<ModelKey, BackgroundSubtractorMog2>,
    initial_images: BTreeMap<ModelKey, u32>,
}

impl SubtractorSet {
    fn initial_images(&self, key: ModelKey) -> u32 {
        self.initial_images.get(&key).copied().unwrap_or(0)
    }

    fn learn(&mut self, key: ModelKey, im: &PixelBuffer<Mono8>) -> Result<(), mog2::Error> {
        *self.initial_images.entry(key).or_insert(0) += 1;
        self.models
            .entry(key)
            .or_default()
            .apply(im, LEARNING_RATE)
            .map(|_| ())
    }

    fn classify(
        &mut self,
        key: ModelKey,
        im: &PixelBuffer<Mono8>,
    ) -> Result<PixelBuffer<Mono8>, mog2::Error> {
        self.models.entry(key).or_default().apply(im, 0.0)
    }
}

struct State {
    primary: SubtractorSet,
    temp: Option<SubtractorSet>,
    temp_active: bool,
}

impl State {
    fn active_mut(&mut self) -> &mut SubtractorSet {
        if self.temp_active {
            self.temp.get_or_insert_with(|| {
                debug!("creating temporary background subtractors");
                SubtractorSet::default()
            })
        } else {
            &mut self.primary
        }
    }
}

pub struct BackgroundSubtraction {
    core: Arc<ModuleCore>,
    pub images_in: Input<MultiFrame>,
    pub rois_in: Input<MultiFrame>,
    pub set_background_trigger_in: Input<SetBackgroundTrigger>,
    pub synced_foregrounds_out: Output<MultiFrame>,
    state: Mutex<State>,
    synced_sub_in_progress: AtomicBool,
}

impl BackgroundSubtraction {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("BackgroundSubtraction");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        core.declare_param(
            "enable_debug_images",
            ParamKind::Bool,
            Some(ParamValue::Bool(false)),
            false,
        );
        core.declare_param(
            "min_amount_of_initial_images",
            ParamKind::Int,
            Some(ParamValue::Int(2)),
            false,
        );

        let images_in = core.input("images_in", &["cam_ids"]);
        let rois_in = core.input("rois_in", &["cam_ids"]);
        let set_background_trigger_in = core.input("set_background_trigger_in", &[]);
        let synced_foregrounds_out = core.output("synced_foregrounds_out", &["cam_ids"]);

        let this = Arc::new(Self {
            core,
            images_in,
            rois_in,
            set_background_trigger_in,
            synced_foregrounds_out,
            state: Mutex::new(State {
                primary: SubtractorSet::default(),
                temp: None,
                temp_active: false,
            }),
            synced_sub_in_progress: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&this);
        this.images_in.set_handler(move |frames: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_images(frames),
            None => Ok(()),
        });
        let weak = Arc::downgrade(&this);
        this.rois_in.set_handler(move |rois: MultiFrame| match weak.upgrade() {
            Some(this) => this.process_rois(rois),
            None => Ok(()),
        });
        let weak = Arc::downgrade(&this);
        this.set_background_trigger_in
            .set_handler(move |trigger: SetBackgroundTrigger| match weak.upgrade() {
                Some(this) => this.process_trigger(trigger),
                None => Ok(()),
            });
        this
    }

    fn min_initial_images(&self) -> u32 {
        self.core
            .param("min_amount_of_initial_images")
            .and_then(|v| v.as_int())
            .unwrap_or(2) as u32
    }

    fn debug_images_enabled(&self) -> bool {
        self.core
            .param("enable_debug_images")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Learn a frame into the active set's model for `key` and count it as
    /// a warm-up image.
    fn add_background(
        &self,
        state: &mut State,
        key: ModelKey,
        im: &PixelBuffer<Mono8>,
        frame: &Frame,
    ) -> Result<(), Error> {
        state.active_mut().learn(key, im)?;
        if self.debug_images_enabled() {
            if let ModelKey::Event(cam) = key {
                let mut info = frame.camera_info.clone();
                info.name = cam;
                self.core.show_image(
                    "BG",
                    &Frame::new(im.clone(), frame.frame_id, info),
                    ShowAxis::Vertical,
                );
            }
        }
        Ok(())
    }

    fn process_images(&self, images: MultiFrame) -> HandlerResult {
        let min_initial = self.min_initial_images();
        let mut state = self.state.lock().unwrap();

        let mut diffs: Vec<u64> = Vec::with_capacity(images.len());
        let mut roi_crops: Vec<Frame> = Vec::with_capacity(images.len());
        let mut scaled_crops: Vec<(CamId, PixelBuffer<Mono8>)> = Vec::with_capacity(images.len());
        let mut warming_up = false;

        for frame in images.frames() {
            let cam = frame.cam_id();
            let roi = frame
                .camera_info
                .suggested_roi
                .ok_or(Error::MissingRoi(cam))?;
            let crop = frame.pixels.crop(roi.x, roi.y, roi.w, roi.h);
            let scaled = dart_imops::resize_nearest(
                &crop,
                (roi.w / EVENT_DOWNSAMPLE).max(1),
                (roi.h / EVENT_DOWNSAMPLE).max(1),
            );

            if state.active_mut().initial_images(ModelKey::Event(cam)) < min_initial {
                self.add_background(&mut state, ModelKey::Event(cam), &scaled, frame)?;
                self.add_background(&mut state, ModelKey::Full(cam), &crop, frame)?;
                warming_up = true;
                continue;
            }

            let mask = state.active_mut().classify(ModelKey::Event(cam), &scaled)?;
            let mask = dart_imops::bilateral_filter(&mask, 5, 57.0, 57.0);
            let mask = dart_imops::morph_open(&mask, 2);
            let mask = dart_imops::morph_close(&mask, 2);
            let mask = dart_imops::threshold_binary(mask, 5, 255);
            diffs.push(dart_imops::saturated_sum(&mask));

            roi_crops.push(Frame::new(crop, frame.frame_id, frame.camera_info.clone()));
            scaled_crops.push((cam, scaled));
        }

        if warming_up || diffs.is_empty() {
            return Ok(());
        }

        let max_diff = *diffs.iter().max().unwrap();
        let min_diff = *diffs.iter().min().unwrap();
        debug!(
            "diffs {:?} max {} queue {} ",
            diffs,
            max_diff,
            self.images_in.queue_len()
        );

        if THRESH_LOW < max_diff && max_diff < THRESH_HIGH {
            // stable non-event change, e.g. lighting drift: fold it into
            // the models without publishing anything
            for ((cam, scaled), crop) in scaled_crops.iter().zip(&roi_crops) {
                self.add_background(&mut state, ModelKey::Event(*cam), scaled, crop)?;
                self.add_background(
                    &mut state,
                    ModelKey::Full(*cam),
                    crop.pixels.as_ref(),
                    crop,
                )?;
            }
        } else if max_diff > THRESH_HIGH && min_diff > 2 * THRESH_LOW {
            if max_diff > THRESH_TOO_HIGH {
                debug!("change saturates the event ROI ({max_diff})");
            }
            let ready = state
                .active_mut()
                .initial_images
                .iter()
                .filter(|(k, _)| matches!(k, ModelKey::Event(_)))
                .all(|(_, &n)| n >= min_initial);
            if !ready {
                warn!("event before background warm-up completed; dropping");
                return Ok(());
            }
            debug!("over threshold: event confirmed");
            self.synced_sub_in_progress.store(true, Ordering::SeqCst);
            self.set_background_trigger_in
                .push(SetBackgroundTrigger { dart_number: 1 });
            self.rois_in.push(MultiFrame::new(roi_crops)?);
            // do not learn this tick: the dart must not enter the models
        }
        Ok(())
    }

    fn process_rois(&self, rois: MultiFrame) -> HandlerResult {
        let mut state = self.state.lock().unwrap();
        let mut foregrounds = Vec::with_capacity(rois.len());
        for frame in rois.frames() {
            let cam = frame.cam_id();
            debug!(
                "extracting foreground for cam {} with {} initial images",
                cam,
                state.active_mut().initial_images(ModelKey::Full(cam))
            );
            let mask = state
                .active_mut()
                .classify(ModelKey::Full(cam), frame.pixels.as_ref())?;
            let mut info = frame.camera_info.clone();
            info.roi = info.suggested_roi;
            foregrounds.push(Frame::new(mask, frame.frame_id, info));
        }
        drop(state);
        self.synced_sub_in_progress.store(false, Ordering::SeqCst);
        self.synced_foregrounds_out.publish(&MultiFrame::new(foregrounds)?);
        Ok(())
    }

    /// Switch the subtractor set, fenced against an in-flight synchronized
    /// extraction.
    fn process_trigger(&self, trigger: SetBackgroundTrigger) -> HandlerResult {
        debug!("set-background trigger, dart {}", trigger.dart_number);
        while self.synced_sub_in_progress.load(Ordering::SeqCst) {
            if self.core.cancel_token().is_canceled() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let mut state = self.state.lock().unwrap();
        if trigger.dart_number == 0 {
            state.temp_active = false;
            state.temp = None;
        } else {
            state.temp = Some(SubtractorSet::default());
            state.temp_active = true;
        }
        Ok(())
    }
}

impl Module for BackgroundSubtraction {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_types::{CameraInfo, FrameId, Roi};

    const W: u32 = 160;
    const H: u32 = 32;

    fn frame(cam: u8, frame_id: u64, background: u8, stripe: Option<u32>) -> Frame {
        let mut buf = PixelBuffer::<Mono8>::new_filled(W, H, background);
        if let Some(x0) = stripe {
            for y in 0..H as usize {
                for x in x0 as usize..(x0 + 60).min(W) as usize {
                    buf.image_data[y * W as usize + x] = 255;
                }
            }
        }
        let mut info = CameraInfo::new(CamId(cam));
        info.suggested_roi = Some(Roi::new(0, 0, W, H));
        Frame::new(buf, FrameId(frame_id), info)
    }

    fn bundle(frame_id: u64, background: u8, stripe: Option<u32>) -> MultiFrame {
        MultiFrame::new(vec![
            frame(0, frame_id, background, stripe),
            frame(1, frame_id, background, stripe),
        ])
        .unwrap()
    }

    fn warmed_up(ctx: &PipelineContext) -> Arc<BackgroundSubtraction> {
        let bg = BackgroundSubtraction::new(ctx);
        for i in 0..5 {
            bg.process_images(bundle(i, 80, None)).unwrap();
        }
        bg
    }

    #[test]
    fn warm_up_gate_suppresses_events() {
        let ctx = PipelineContext::new();
        let bg = BackgroundSubtraction::new(&ctx);
        // a huge change on the very first frames must not trigger anything
        for i in 0..2 {
            bg.process_images(bundle(i, 80, Some(40))).unwrap();
        }
        assert_eq!(bg.set_background_trigger_in.queue_len(), 0);
        assert_eq!(bg.rois_in.queue_len(), 0);
        let state = bg.state.lock().unwrap();
        assert_eq!(state.primary.initial_images(ModelKey::Event(CamId(0))), 2);
        assert_eq!(state.primary.initial_images(ModelKey::Full(CamId(1))), 2);
    }

    #[test]
    fn steady_scene_stays_quiet() {
        let ctx = PipelineContext::new();
        let bg = warmed_up(&ctx);
        for i in 10..20 {
            bg.process_images(bundle(i, 80, None)).unwrap();
        }
        assert_eq!(bg.set_background_trigger_in.queue_len(), 0);
        assert_eq!(bg.rois_in.queue_len(), 0);
    }

    #[test]
    fn large_change_on_all_cameras_confirms_event() {
        let ctx = PipelineContext::new();
        let bg = warmed_up(&ctx);
        bg.process_images(bundle(20, 80, Some(40))).unwrap();
        // the event enqueues the trigger and the full-ROI crops on our own
        // inputs
        assert_eq!(bg.set_background_trigger_in.queue_len(), 1);
        assert_eq!(bg.rois_in.queue_len(), 1);
        assert!(bg.synced_sub_in_progress.load(Ordering::SeqCst));
    }

    #[test]
    fn extraction_uses_zero_learning_and_clears_fence() {
        let ctx = PipelineContext::new();
        let bg = warmed_up(&ctx);
        bg.process_images(bundle(20, 80, Some(40))).unwrap();

        let mut crops = Vec::new();
        for cam in [0u8, 1] {
            crops.push(frame(cam, 20, 80, Some(40)));
        }
        bg.process_rois(MultiFrame::new(crops).unwrap()).unwrap();
        assert!(!bg.synced_sub_in_progress.load(Ordering::SeqCst));
    }

    #[test]
    fn trigger_switches_model_sets() {
        let ctx = PipelineContext::new();
        let bg = warmed_up(&ctx);

        bg.process_trigger(SetBackgroundTrigger { dart_number: 1 }).unwrap();
        {
            let mut state = bg.state.lock().unwrap();
            assert!(state.temp_active);
            // the fresh temporary set has no warm-up images yet
            assert_eq!(state.active_mut().initial_images(ModelKey::Event(CamId(0))), 0);
        }

        bg.process_trigger(SetBackgroundTrigger { dart_number: 0 }).unwrap();
        {
            let mut state = bg.state.lock().unwrap();
            assert!(!state.temp_active);
            assert!(state.active_mut().initial_images(ModelKey::Event(CamId(0))) >= 2);
        }
    }

    #[test]
    fn event_isolation_between_triggers() {
        let ctx = PipelineContext::new();
        let bg = warmed_up(&ctx);

        // confirmed event activates the temporary set
        bg.process_images(bundle(20, 80, Some(40))).unwrap();
        bg.synced_sub_in_progress.store(false, Ordering::SeqCst);
        bg.process_trigger(SetBackgroundTrigger { dart_number: 1 }).unwrap();

        // ticks with the dart present warm up the temporary set only
        for i in 21..24 {
            bg.process_images(bundle(i, 80, Some(40))).unwrap();
        }
        let state = bg.state.lock().unwrap();
        let temp = state.temp.as_ref().unwrap();
        assert!(temp.initial_images(ModelKey::Event(CamId(0))) >= 2);
        // the primary set did not learn the dart scene
        assert_eq!(state.primary.initial_images(ModelKey::Event(CamId(0))), 2);
    }
}
