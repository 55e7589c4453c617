//! Logging setup shared by the binaries.
//!
//! Library code imports the macros through [`prelude`] so every module logs
//! the same way.

use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, prelude::*};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the crate logs at `info`, or at
/// `debug` when `verbose` is requested. Under systemd (`JOURNAL_STREAM` is
/// set) output goes to journald instead of stderr.
pub fn init(verbose: bool) {
    let default_directives = if verbose {
        "warn,hashwire=debug"
    } else {
        "warn,hashwire=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let journald = std::env::var_os("JOURNAL_STREAM").and_then(|_| tracing_journald::layer().ok());
    let stderr = journald.is_none().then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(LocalTime::rfc_3339())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(journald)
        .with(stderr)
        .init();
}
