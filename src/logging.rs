use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Settings for the tracing pipeline.
pub struct LogConfig {
    /// Where rotated log files land when file logging is on.
    pub log_dir: PathBuf,
    /// Stem of each rotated file name.
    pub file_prefix: String,
    /// Rotated files kept before the oldest is deleted.
    pub max_files: usize,
    /// Mirror log output into `log_dir` in addition to stdout.
    pub log_to_file: bool,
    /// Default level filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            file_prefix: "driftsync".to_string(),
            max_files: config.log_max_files,
            log_to_file: config.log_to_file,
            log_level: config.log_level.clone(),
        }
    }
}

/// Wire up the tracing pipeline: a compact stdout layer, plus a daily
/// rotated non-blocking file layer when enabled.
///
/// # Log Targets
/// - `api` - request handling, `api::sse` - event streams, `api::error` -
///   error envelopes
/// - `files` - upload/download services
/// - `store` / `queue` - persistence and the durable queue
/// - `supervisor` - reconciliation pipeline
/// - `broker` - subscriber registry and sync broker
/// - `workers` - worker pool
/// - `main` - application lifecycle
///
/// `RUST_LOG` overrides the configured default level, e.g.
/// `RUST_LOG=supervisor=debug,api=trace`.
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (file_layer, guard) = match file_writer(&config)? {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .compact()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    tracing::info!(
        target: "main",
        level = %config.log_level,
        file_logging = config.log_to_file,
        log_dir = %config.log_dir.display(),
        "Logging ready"
    );

    Ok(LogGuard { _guard: guard })
}

/// Build the rotating file writer, or `None` when file logging is off.
fn file_writer(config: &LogConfig) -> Result<Option<(NonBlocking, WorkerGuard)>> {
    if !config.log_to_file {
        return Ok(None);
    }

    std::fs::create_dir_all(&config.log_dir).with_context(|| {
        format!("log directory {} could not be created", config.log_dir.display())
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.log_dir)
        .context("rolling file appender could not be built")?;

    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// Keeps the non-blocking file writer alive; dropping it flushes whatever
/// is still buffered, so hold it for the whole process lifetime.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}
