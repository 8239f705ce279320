//! Ambient logging setup (spec §6 "Configuration" / `[AMBIENT]` logging).
//!
//! Every state change worth surfacing is already emitted as a `Log`
//! [`crate::effects::Effect`] and turned into a `tracing` event by
//! [`crate::effects::EffectExecutor`]. What's missing is wiring a
//! subscriber to actually print those events: a registry of an `EnvFilter`
//! layer, an ANSI `fmt` layer, and `tracing_error::ErrorLayer` so
//! `miette` diagnostics can capture a `SpanTrace`.

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, falling back to `default_directive` (e.g. `"dygram=info"`)
/// when unset. Call once, near the start of `main`.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(default_directive: &str) {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Installs miette's panic hook so unhandled panics render with the same
/// fancy diagnostic formatting as a returned [`miette::Report`].
pub fn init_miette() {
    miette::set_panic_hook();
}
