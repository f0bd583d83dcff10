//! Real-time dart recognition: pipeline assembly and transport relay.

mod recognize;
mod relay;

pub use recognize::RecognizeDarts;
pub use relay::{MessageRelay, MessageSink, SinkPayload, TracingSink};

/// Logging setup shared by the binary and the examples: compact format,
/// uptime timestamps, `RUST_LOG`-style filtering.
pub fn init_logging() {
    use tracing_subscriber::{
        fmt::{self, format, time},
        prelude::*,
        EnvFilter,
    };

    let evt_fmt = format().with_timer(time::Uptime::default()).compact();
    let fmt_layer = fmt::layer().event_format(evt_fmt);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .init();
}
