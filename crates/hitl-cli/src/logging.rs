//! Tracing setup.
//!
//! - stderr: `RUST_LOG` if set, else errors only (`--verbose` raises it to debug)
//! - file: `$HITL_HOME/logs/hitl.log`, always at debug for hitl crates
//!
//! The session journal is separate; it is product output and ignores these filters.

use hitl_core::config::paths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEBUG_DIRECTIVES: &str = "hitl=debug,hitl_core=debug";

/// Installs the global subscriber. Keep the guard alive until exit so the
/// file writer flushes.
pub fn init(verbose: bool) -> Option<WorkerGuard> {
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { DEBUG_DIRECTIVES } else { "error" })
    });
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(stderr_filter);

    let (file_layer, guard) = match file_writer() {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(DEBUG_DIRECTIVES)),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    // Fails only if a subscriber is already set, which leaves that one in charge.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn file_writer() -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = paths::logs_dir();
    std::fs::create_dir_all(&dir).ok()?;
    // An unwritable log file disables the file layer instead of panicking.
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("hitl.log")
        .build(dir)
        .ok()?;
    Some(tracing_appender::non_blocking(appender))
}
