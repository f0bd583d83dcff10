//! Dart-1/2/3/Take-Out progression driven by contour arrivals.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use dart_types::{
    CamId, ContourCollection, ContourSet, FrameId, SetBackgroundTrigger,
};
use pipegraph::{
    HandlerResult, Input, Module, ModuleCore, Output, ParamKind, PipelineContext,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DartsState {
    Idle,
    Dart1,
    Dart2,
    Dart3,
    TakeOut,
}

struct State {
    internal: DartsState,
    wait_for_matching_images: bool,
    background_reset: bool,
    matches: BTreeMap<FrameId, BTreeMap<CamId, ContourSet>>,
}

impl State {
    fn start_waiting_for_matches(&mut self) {
        self.wait_for_matching_images = true;
        self.matches.clear();
    }
}

pub struct StateMachine {
    core: Arc<ModuleCore>,
    pub contours_in: Input<ContourSet>,
    pub contour_collection_out: Output<ContourCollection>,
    pub set_background_trigger_out: Output<SetBackgroundTrigger>,
    state: Mutex<State>,
}

impl StateMachine {
    pub fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("StateMachine");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);

        let contours_in = core.input("contours_in", &["cam_ids"]);
        let contour_collection_out = core.output("contour_collection_out", &["cam_ids"]);
        let set_background_trigger_out = core.output("set_background_trigger_out", &[]);

        let this = Arc::new(Self {
            core,
            contours_in,
            contour_collection_out,
            set_background_trigger_out,
            state: Mutex::new(State {
                internal: DartsState::Idle,
                wait_for_matching_images: false,
                background_reset: false,
                matches: BTreeMap::new(),
            }),
        });
        let weak = Arc::downgrade(&this);
        this.contours_in.set_handler(move |set: ContourSet| match weak.upgrade() {
            Some(this) => this.process_contours(set),
            None => Ok(()),
        });
        this
    }

    fn cam_count(&self) -> usize {
        self.core
            .param("cam_ids")
            .and_then(|v| v.as_int_list().map(|c| c.len()))
            .unwrap_or(0)
    }

    fn process_contours(&self, set: ContourSet) -> HandlerResult {
        let cam_count = self.cam_count();
        let mut state = self.state.lock().unwrap();

        if !set.contours.is_empty() {
            // state progression
            match state.internal {
                DartsState::Idle => {
                    state.internal = DartsState::Dart1;
                    state.start_waiting_for_matches();
                    debug!("-> DART_1");
                }
                DartsState::Dart1 if !state.wait_for_matching_images => {
                    if state.background_reset {
                        self.set_background_trigger_out
                            .publish(&SetBackgroundTrigger { dart_number: 1 });
                        state.background_reset = false;
                    } else {
                        state.internal = DartsState::Dart2;
                        state.start_waiting_for_matches();
                        debug!("-> DART_2");
                    }
                }
                DartsState::Dart2 if !state.wait_for_matching_images => {
                    if state.background_reset {
                        self.set_background_trigger_out
                            .publish(&SetBackgroundTrigger { dart_number: 2 });
                        state.background_reset = false;
                    } else {
                        state.internal = DartsState::Dart3;
                        state.start_waiting_for_matches();
                        debug!("-> DART_3");
                    }
                }
                DartsState::Dart3 if !state.wait_for_matching_images => {
                    if state.background_reset {
                        // the cycle ends: back to the primary models
                        self.set_background_trigger_out
                            .publish(&SetBackgroundTrigger { dart_number: 0 });
                        state.background_reset = false;
                    } else {
                        state.internal = DartsState::TakeOut;
                        debug!("-> TAKE_OUT");
                    }
                }
                _ => {}
            }

            // collect per-camera matches for the current tick
            if state.wait_for_matching_images {
                state
                    .matches
                    .entry(set.frame_id)
                    .or_default()
                    .insert(set.camera_info.name, set);

                let complete: Option<FrameId> = state
                    .matches
                    .iter()
                    .find(|(_, by_cam)| cam_count > 0 && by_cam.len() == cam_count)
                    .map(|(&frame_id, _)| frame_id);
                if let Some(frame_id) = complete {
                    let by_cam = state.matches.remove(&frame_id).unwrap();
                    let collection =
                        ContourCollection::new(by_cam.into_values().collect())?;
                    self.contour_collection_out.publish(&collection);
                    state.wait_for_matching_images = false;
                    state.background_reset = true;
                }
            }
        } else if state.internal == DartsState::TakeOut {
            state.internal = DartsState::Idle;
            debug!("no contours -> IDLE");
        }
        Ok(())
    }
}

impl Module for StateMachine {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}
