//! Logging infrastructure for tileseed.
//!
//! Provides structured logging with console output and an optional log file:
//! - Prints to stdout for interactive runs
//! - Writes to `<log_dir>/tileseed.log` (cleared on start) when a directory is given
//! - Configurable via the RUST_LOG environment variable

use std::fs;
use std::io;
use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "tileseed.log";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize logging.
///
/// # Arguments
///
/// * `log_dir` - Directory for the log file; console only when `None`
///
/// # Errors
///
/// Returns error if the log directory cannot be created or the log file
/// cannot be cleared.
pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingGuard, io::Error> {
    let (subscriber, file_guard) = build_subscriber(log_dir)?;
    subscriber.init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Builds the subscriber without installing it.
///
/// The file layer is only present when `log_dir` is given.
fn build_subscriber(
    log_dir: Option<&Path>,
) -> Result<(impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>), io::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, file_guard) = match log_dir {
        Some(log_dir) => {
            prepare_log_file(log_dir)?;
            let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    Ok((subscriber, file_guard))
}

/// Creates `log_dir` and truncates the log file.
fn prepare_log_file(log_dir: &Path) -> Result<(), io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(LOG_FILE_NAME), "")
}
