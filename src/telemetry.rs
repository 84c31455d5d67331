//! Tracing setup.
//!
//! Logs always go to a fresh `server.log.<timestamp>` file in the configured
//! directory. A stderr layer is added when the active environment asks for
//! console output. `RUST_LOG` overrides the configured level.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{LifoError, Result};

const LOG_FILE_PREFIX: &str = "server.log";

/// Keeps the background log writer alive. Dropping it flushes pending lines.
pub struct TelemetryGuard {
    _guard: WorkerGuard,
    log_file: PathBuf,
}

impl TelemetryGuard {
    /// Path of the log file for this run.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// File name for a run started now.
pub fn log_file_name() -> String {
    format!(
        "{}.{}",
        LOG_FILE_PREFIX,
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Install the global subscriber.
pub fn init(logging: &LoggingConfig, log_dir: &Path) -> Result<TelemetryGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.log_level.as_filter().into())
        .from_env_lossy();

    std::fs::create_dir_all(log_dir)?;
    let file_name = log_file_name();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.as_str())
        .build(log_dir)
        .map_err(|e| LifoError::Config(format!("log file init failed: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(Box::new(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true),
    ));
    if logging.log_console {
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        ));
    }
    layers.push(Box::new(filter));

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LifoError::Config(format!("tracing init failed: {e}")))?;

    Ok(TelemetryGuard {
        _guard: guard,
        log_file: log_dir.join(file_name),
    })
}
