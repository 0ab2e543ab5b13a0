//! Ambient logging setup.
//!
//! The engine itself only emits `tracing` events; it never decides how
//! they're formatted or where they go. This module offers one
//! convenience entry point for binaries that embed the crate and don't
//! want to assemble a subscriber by hand.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber that writes compact,
/// human-readable lines to stderr, honoring `RUST_LOG` if set and
/// defaulting to `info` otherwise.
///
/// Calling this more than once is harmless: the second call's error is
/// silently discarded, since a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
