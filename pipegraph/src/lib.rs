//! Dataflow runtime: modules with typed input/output ports, wired into a
//! graph by type-checked connections.
//!
//! Each input owns a bounded drop-oldest queue and a dedicated worker
//! thread. Publishing on an output clones the payload into every connected
//! queue. Configuration values propagate along connections to a fixed
//! point. A shared [`CancelToken`] drives cooperative shutdown: a handler
//! error cancels the whole pipeline.

mod cancel;
mod display;
mod errors;
mod module;
mod params;
mod pipeline;
mod port;
mod queue;

pub use cancel::CancelToken;
pub use display::{concat_mono8, DisplayDemux, DisplaySink, ShowAxis};
pub use errors::{ConnectError, StartupError};
pub use module::{HandlerResult, Module, ModuleCore, TimingHandler};
pub use params::{ParamKind, ParamRegistry, ParamValue, SetOutcome};
pub use pipeline::{ExitStatus, PipelineContext, SpinOpts};
pub use port::{connect_dyn, Input, Output, Payload, PortRef};
pub use queue::{bounded, Receiver, Sender, DEFAULT_QUEUE_CAPACITY};
