//! Logging initialization.
//!
//! Adapted from `rust-srec/src/logging/mod.rs`, stripped of its
//! database-backed dynamic filter reload and WebSocket log-streaming
//! (WebUI features explicitly out of core scope). What remains is the
//! rust-srec's ambient logging shape: an `EnvFilter`-driven `fmt` layer plus a
//! non-blocking rolling file appender.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "bridge=info,tower_http=info";

/// Initialize global tracing. Returns a guard that must be kept alive for
/// the lifetime of the process so the non-blocking file writer can flush.
pub fn init_logging(log_dir: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "bridge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let stdout_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(guard)
}
