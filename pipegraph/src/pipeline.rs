use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::cancel::CancelToken;
use crate::display::{DisplayDemux, DisplaySink};
use crate::errors::{ConnectError, StartupError};
use crate::module::{Module, ModuleCore};

const SPIN_SLEEP: Duration = Duration::from_millis(2);
const WORKER_JOIN_BOUND: Duration = Duration::from_secs(1);

/// How the spin loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exit condition or timeout reached.
    Clean,
    /// A handler failed and tripped the cancellation token.
    HandlerFault,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::HandlerFault => 1,
        }
    }
}

/// Options for the spin phase.
#[derive(Default)]
pub struct SpinOpts {
    pub timeout: Option<Duration>,
    pub exit_condition: Option<Box<dyn Fn() -> bool>>,
    pub sink: Option<Box<dyn DisplaySink>>,
}

/// Shared pipeline state: the module registry, the display demux and the
/// cancellation token. Passed into every module constructor instead of
/// living in globals.
#[derive(Clone)]
pub struct PipelineContext {
    shared: Arc<ContextShared>,
}

struct ContextShared {
    modules: Mutex<Vec<Arc<dyn Module>>>,
    names: Mutex<Vec<String>>,
    display: Arc<DisplayDemux>,
    cancel: CancelToken,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ContextShared {
                modules: Mutex::new(Vec::new()),
                names: Mutex::new(Vec::new()),
                display: Arc::new(DisplayDemux::new()),
                cancel: CancelToken::new(),
            }),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    pub fn display(&self) -> Arc<DisplayDemux> {
        self.shared.display.clone()
    }

    /// Create a module core, suffixing the name on collision.
    pub fn new_core(&self, name: &str) -> Arc<ModuleCore> {
        let mut names = self.shared.names.lock().unwrap();
        let mut unique = name.to_string();
        let mut n = 1;
        while names.contains(&unique) {
            n += 1;
            unique = format!("{}_{}", name, n);
        }
        names.push(unique.clone());
        ModuleCore::new(unique, self.shared.cancel.clone(), self.shared.display.clone())
    }

    /// Register a module with the driver. Construction and registration are
    /// separate steps so a module is fully built before the pipeline sees
    /// it.
    pub fn add_module(&self, module: Arc<dyn Module>) {
        self.shared.modules.lock().unwrap().push(module);
    }

    fn by_priority(&self, startup: bool) -> Vec<Arc<dyn Module>> {
        let mut modules = self.shared.modules.lock().unwrap().clone();
        if startup {
            modules.sort_by_key(|m| std::cmp::Reverse(m.startup_priority()));
        } else {
            modules.sort_by_key(|m| std::cmp::Reverse(m.shutdown_priority()));
        }
        modules
    }

    /// Run the pipeline: user configuration, submodule configuration and
    /// connection, user wiring, module startup, spin, cleanup.
    pub fn start(
        &self,
        configure: impl FnOnce(),
        connect: impl FnOnce() -> Result<(), ConnectError>,
        opts: SpinOpts,
    ) -> Result<ExitStatus, StartupError> {
        info!("=== user configuration ===");
        configure();

        info!("=== configuring submodules ===");
        for module in self.by_priority(true) {
            module.custom_configure();
        }

        info!("=== connecting submodules ===");
        for module in self.by_priority(true) {
            module.custom_connect();
        }

        info!("=== connecting ===");
        connect()?;

        info!("=== starting up modules ===");
        if let Err(e) = self.start_all() {
            // partially started modules still need their workers joined
            self.cleanup();
            return Err(e);
        }

        info!("=== running ===");
        let status = self.spin(opts);

        self.cleanup();
        Ok(status)
    }

    fn start_all(&self) -> Result<(), StartupError> {
        for module in self.by_priority(true) {
            let core = module.core();
            info!("[{}] starting module", core.name());

            if let Some(input) = core.pre_start_check().into_iter().next() {
                return Err(StartupError::MissingHandler {
                    module: core.name().to_string(),
                    input,
                });
            }
            if let Some(param) = core.unset_required().into_iter().next() {
                return Err(StartupError::RequiredParamUnset {
                    module: core.name().to_string(),
                    param,
                });
            }
            module.pre_start();
            core.activate_workers();
            module.start().map_err(|source| StartupError::ModuleStart {
                module: core.name().to_string(),
                source,
            })?;
            info!("[{}] module started successfully", core.name());
        }
        Ok(())
    }

    /// Drive the display demux until the pipeline is canceled, the exit
    /// condition fires or the timeout elapses. Runs on the calling (main)
    /// thread; this is the only place display sinks are invoked.
    fn spin(&self, mut opts: SpinOpts) -> ExitStatus {
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        loop {
            if self.shared.cancel.is_canceled() {
                return ExitStatus::HandlerFault;
            }
            if let Some(cond) = &opts.exit_condition {
                if cond() {
                    return ExitStatus::Clean;
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return ExitStatus::Clean;
                }
            }
            let ready = self.shared.display.drain_ready();
            if let Some(sink) = opts.sink.as_mut() {
                for (name, image) in &ready {
                    sink.show(name, image);
                }
            }
            std::thread::sleep(SPIN_SLEEP);
        }
    }

    fn cleanup(&self) {
        info!("=== cleaning up modules ===");
        for module in self.by_priority(false) {
            let core = module.core();
            info!("[{}] shutting down module", core.name());
            module.stop();
            core.deactivate_workers();
            core.join_workers(WORKER_JOIN_BOUND);
            module.custom_cleanup();
            info!("[{}] module shut down", core.name());
        }
        info!("shut down cleanly");
    }

    /// Trip the shared cancellation token, e.g. from a signal handler.
    pub fn interrupt(&self) {
        error!("pipeline interrupt requested");
        self.shared.cancel.cancel();
    }
}
