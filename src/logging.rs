//! Tracing subscriber setup.
//!
//! Diagnostics go through `tracing` macros and are written to stderr, so
//! command output on stdout stays clean. The filter honours `RUST_LOG` and
//! falls back to `info`.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (e.g. from tests) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
