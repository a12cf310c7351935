//! Logging initialization for the `pipeit` binary.
//!
//! Logs go to stderr; stdout is reserved for the child's output. The level
//! comes from `RUST_LOG` when set, otherwise from the `-v` count:
//! - no `-v` - warnings and errors only
//! - `-v` - info
//! - `-vv` - debug
//! - `-vvv` - trace, including every chunk read

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a `-v` count to a default filter directive
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber. Calling it twice is harmless;
/// the first subscriber stays installed.
pub fn init_logging(verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
