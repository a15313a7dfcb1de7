//! Process-wide logging setup.

use tracing_subscriber::EnvFilter;

use crate::config::env_bool;

/// Install the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG` (default `info`). Set `LEASEQ_LOG_JSON=1` for
/// one JSON object per line. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if env_bool("LEASEQ_LOG_JSON").unwrap_or(false) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
