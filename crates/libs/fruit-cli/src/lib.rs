use std::io;

use tracing_subscriber::EnvFilter;

/// Re-export tracing macros.
pub use tracing::{debug, error, info, trace, warn};

/// Environment variable for overriding the log filter.
pub const LOG_ENV_VAR: &str = "FRUIT_LOG";

/// Initialize logging and other CLI related functionality.
///
/// Logs are written to stderr. On devices, the service supervisor forwards them to the
/// system log.
pub fn init() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .event_format(format)
        .init();
}
