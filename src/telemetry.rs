//! Tracing subscriber setup for binaries and long-lived services.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! embedding process's call. [`init`] wires the usual stack: an `EnvFilter`
//! honoring `RUST_LOG` (defaulting to `info` for this crate), a compact fmt
//! layer, and `ErrorLayer` so span traces attach to captured errors.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default subscriber stack. Call once at process start.
///
/// Respects `RUST_LOG`; without it, `warn` globally and `info` for this
/// crate. Returns an error if a global subscriber is already set.
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    init_with_filter("warn,fleetcast=info")
}

/// Like [`init`] with an explicit fallback filter directive.
pub fn init_with_filter(
    fallback: &str,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}
