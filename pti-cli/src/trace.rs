//! Tracing initialization for the pti binary.
//!
//! Uses the RUST_LOG environment variable to control output, e.g.
//! `RUST_LOG=pti_core=debug` to watch the numerical stages.

use tracing_subscriber::{fmt, EnvFilter};

/// Call once, early in main().
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
