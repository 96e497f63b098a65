use std::fs;
use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::BoxError;

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";

/// Initialize structured logging.
///
/// Sets up:
/// - File output: `{log_dir}/piper-kit.<date>.log`, rotated daily, latest 5
///   kept. Skipped with a warning if the directory cannot be used.
/// - Console output on stderr. stdout is reserved for IPC events.
/// - Environment filter: `RUST_LOG`, defaulting to `info` with HTTP
///   internals at `warn`.
///
/// Fails if a global subscriber is already installed.
pub fn init(log_dir: &Path) -> Result<(), BoxError> {
    let _ = fs::create_dir_all(log_dir);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("piper-kit")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir);

    let (file_layer, file_error) = match appender {
        Ok(appender) => (
            Some(
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    match file_error {
        None => tracing::info!(log_dir = %log_dir.display(), "Logger initialized"),
        Some(e) => tracing::warn!(
            log_dir = %log_dir.display(),
            error = %e,
            "File logging disabled"
        ),
    }
    Ok(())
}
