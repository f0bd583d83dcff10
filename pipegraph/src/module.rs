use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dart_types::Frame;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::display::{DisplayDemux, ShowAxis};
use crate::params::{ParamRegistry, ParamValue, SetOutcome};
use crate::port::{self, Input, InputShared, Output, Payload, PortRef};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives `(module, input, processing time, queue depth)` after every
/// handled item.
pub type TimingHandler = Box<dyn Fn(&str, &str, Duration, usize) + Send + Sync>;

const WORKER_POLL: Duration = Duration::from_millis(50);

/// Shared per-module state: name, ports, parameters, workers.
///
/// Concrete modules embed an `Arc<ModuleCore>` and declare their ports and
/// parameters against it.
pub struct ModuleCore {
    name: String,
    cancel: CancelToken,
    display: Arc<DisplayDemux>,
    params: Mutex<ParamRegistry>,
    inputs: Mutex<Vec<Arc<InputShared>>>,
    outputs: Mutex<Vec<Arc<port::OutputShared>>>,
    timing: Mutex<HashMap<String, Vec<TimingHandler>>>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl ModuleCore {
    pub(crate) fn new(name: String, cancel: CancelToken, display: Arc<DisplayDemux>) -> Arc<Self> {
        Arc::new(Self {
            params: Mutex::new(ParamRegistry::new(&name)),
            name,
            cancel,
            display,
            inputs: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
            timing: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Declare an input port with the default queue capacity.
    pub fn input<T: Payload>(self: &Arc<Self>, name: &str, config_keys: &[&str]) -> Input<T> {
        self.input_with_capacity(name, config_keys, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn input_with_capacity<T: Payload>(
        self: &Arc<Self>,
        name: &str,
        config_keys: &[&str],
        capacity: usize,
    ) -> Input<T> {
        let shared = port::new_input_shared::<T>(self, name, config_keys, capacity);
        debug!("[{}] registering input {}", self.name, name);
        self.inputs.lock().unwrap().push(shared.clone());
        self.timing.lock().unwrap().insert(name.to_string(), Vec::new());
        Input::from_shared(shared)
    }

    /// Declare an output port.
    pub fn output<T: Payload>(self: &Arc<Self>, name: &str, config_keys: &[&str]) -> Output<T> {
        let shared = port::new_output_shared::<T>(self, name, config_keys);
        debug!("[{}] registering output {}", self.name, name);
        self.outputs.lock().unwrap().push(shared.clone());
        Output::from_shared(shared)
    }

    /// Declare a parameter in this module's registry.
    pub fn declare_param(
        &self,
        name: &str,
        kind: crate::params::ParamKind,
        default: Option<ParamValue>,
        required: bool,
    ) {
        self.params.lock().unwrap().declare(name, kind, default, required);
    }

    pub fn param(&self, name: &str) -> Option<ParamValue> {
        self.params.lock().unwrap().get(name)
    }

    /// Assign one parameter and, on a real change, re-emit configuration on
    /// every output so downstream modules converge to the new value.
    pub fn set_param(self: &Arc<Self>, name: &str, value: ParamValue) -> SetOutcome {
        let outcome = self.params.lock().unwrap().set(name, value);
        if outcome == SetOutcome::Changed {
            self.reemit_all();
        }
        outcome
    }

    /// Apply a configuration map arriving from an upstream output. Only a
    /// real change propagates further; the fixed point is reached when no
    /// module observes one.
    pub(crate) fn apply_config(
        self: &Arc<Self>,
        update: &std::collections::BTreeMap<String, ParamValue>,
        sender: &str,
    ) {
        let mut changed = false;
        {
            let mut registry = self.params.lock().unwrap();
            for (key, value) in update {
                if !registry.contains(key) {
                    // configuration keys may outrun a module's declared
                    // parameters; this is the ConfigError unknown-key case
                    warn!("[{}] ignoring configuration key {:?} from {}", self.name, key, sender);
                    continue;
                }
                if registry.set(key, value.clone()) == SetOutcome::Changed {
                    changed = true;
                }
            }
        }
        if changed {
            self.reemit_all();
        }
    }

    fn reemit_all(self: &Arc<Self>) {
        let outputs = self.outputs.lock().unwrap().clone();
        for out in outputs {
            out.emit_configuration(None);
        }
    }

    pub fn register_timing_handler(&self, input_name: &str, handler: TimingHandler) {
        self.timing
            .lock()
            .unwrap()
            .entry(input_name.to_string())
            .or_default()
            .push(handler);
    }

    /// Queue a frame for the display demux, batched per `frame_name` and
    /// camera; the spin loop concatenates complete batches along `axis`.
    pub fn show_image(&self, frame_name: &str, frame: &Frame, axis: ShowAxis) {
        self.display.show(frame_name, frame, axis);
    }

    pub fn input_refs(&self) -> Vec<PortRef> {
        self.inputs.lock().unwrap().iter().map(|i| PortRef::input(i.clone())).collect()
    }

    pub fn output_refs(&self) -> Vec<PortRef> {
        self.outputs.lock().unwrap().iter().map(|o| PortRef::output(o.clone())).collect()
    }

    /// Warn for every port that ends up unconnected. Returns the names of
    /// inputs that have neither a handler nor a relay.
    pub(crate) fn pre_start_check(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for input in self.inputs.lock().unwrap().iter() {
            if !input.is_connected() {
                warn!("{} is not connected", input.label());
            }
            if !input.has_handler_or_relay() {
                missing.push(input.name.clone());
            }
        }
        for output in self.outputs.lock().unwrap().iter() {
            if !output.is_connected() {
                warn!("{} is not connected", output.label());
            }
        }
        missing
    }

    pub(crate) fn unset_required(&self) -> Vec<String> {
        self.params.lock().unwrap().unset_required()
    }

    /// Spawn one worker thread per input.
    pub(crate) fn activate_workers(self: &Arc<Self>) {
        let inputs = self.inputs.lock().unwrap().clone();
        let mut workers = self.workers.lock().unwrap();
        for input in inputs {
            input.working.store(true, Ordering::SeqCst);
            let Some(rx) = input.rx.lock().unwrap().take() else {
                continue;
            };
            let Some(mut handler) = input.handler.lock().unwrap().take() else {
                // relay-only input: items were already fanned out at
                // connect time, nothing to run here
                continue;
            };
            let core = self.clone();
            let cancel = self.cancel.clone();
            let thread_name = format!("{}-{}", self.name, input.name);
            let input = input.clone();
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    info!("\"{}\"-worker started", input.label());
                    loop {
                        if cancel.is_canceled() || !input.working.load(Ordering::SeqCst) {
                            break;
                        }
                        let env = match rx.recv_timeout(WORKER_POLL) {
                            Ok(env) => env,
                            Err(e) if e.is_timeout() => continue,
                            Err(_) => break,
                        };
                        if env.type_id != input.type_id {
                            warn!(
                                "{} expects {} but the queue held {}",
                                input.label(),
                                input.type_name,
                                env.type_name
                            );
                        }
                        let started = Instant::now();
                        if let Err(e) = handler(env) {
                            error!("{} handler failed: {e}; shutting down", input.label());
                            cancel.cancel();
                            break;
                        }
                        core.publish_timing(&input.name, started.elapsed(), rx.len());
                    }
                    info!("\"{}\"-worker stopped gracefully", input.label());
                })
                .expect("spawn input worker");
            workers.push(handle);
        }
    }

    fn publish_timing(&self, input_name: &str, elapsed: Duration, queue_len: usize) {
        let timing = self.timing.lock().unwrap();
        if let Some(handlers) = timing.get(input_name) {
            for handler in handlers {
                handler(&self.name, input_name, elapsed, queue_len);
            }
        }
    }

    pub(crate) fn deactivate_workers(&self) {
        for input in self.inputs.lock().unwrap().iter() {
            input.working.store(false, Ordering::SeqCst);
        }
    }

    /// Join every worker, bounding the wait per worker and logging any that
    /// exceed it.
    pub(crate) fn join_workers(&self, per_worker: Duration) {
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            let deadline = Instant::now() + per_worker;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("[{}] a worker did not stop within {:?}", self.name, per_worker);
            }
        }
    }
}

impl std::fmt::Debug for ModuleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCore").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A processing node in the dataflow graph.
///
/// Lifecycle hooks run in this order: `custom_configure`, `custom_connect`
/// (both driven by the pipeline in startup-priority order), `pre_start`,
/// worker activation, `start`; then at shutdown `stop`, worker join,
/// `custom_cleanup` in shutdown-priority order.
pub trait Module: Send + Sync {
    fn core(&self) -> &Arc<ModuleCore>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn custom_configure(&self) {}
    fn custom_connect(&self) {}
    fn pre_start(&self) {}
    fn start(&self) -> HandlerResult {
        Ok(())
    }
    fn stop(&self) {}
    fn custom_cleanup(&self) {}

    fn startup_priority(&self) -> i32 {
        0
    }
    fn shutdown_priority(&self) -> i32 {
        0
    }
}
