//! Diagnostic logging setup.
//!
//! Logs go to stderr so CLI output on stdout stays clean. The filter is read
//! from `INKLING_LOG` (for example `INKLING_LOG=inkling=debug`) and defaults
//! to `info`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "INKLING_LOG";

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
