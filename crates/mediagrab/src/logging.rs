//! Subscriber setup. Library code only emits `tracing` events; embedding
//! binaries call [`init_logging`] once.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::progress::{ProgressHandle, ProgressLogWriter};

pub const DEFAULT_LOG_FILTER: &str = "mediagrab_engine=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `filter` when set, and [`DEFAULT_LOG_FILTER`] is used
/// when neither is given. With a progress handle, formatted
/// events are routed through the progress loop as `Log` events so they are
/// sequenced between redraws; the renderer prints the level itself.
pub fn init_logging(filter: Option<&str>, progress: Option<ProgressHandle>) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    match progress {
        Some(handle) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(ProgressLogWriter::new(handle))
                    .with_ansi(false)
                    .with_level(false)
                    .with_target(false)
                    .without_time(),
            )
            .try_init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    }
}
