//! Structured logging for the image harvester
//!
//! This module provides functionality for:
//! 1. Writing diagnostics to a daily rolling file in JSON or line format
//! 2. Mirroring warnings to the terminal without fighting the progress bar
//! 3. Recording run lifecycle entries with run id, source and timestamp

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self as tracing_fmt, format::FmtSpan, time::ChronoUtc},
    prelude::*,
    EnvFilter, Layer,
};
use uuid::Uuid;

use crate::harvest::config_loader::AppConfig;
use crate::harvest::SourceKind;

/// File name prefix for the rolling log.
pub const LOG_FILE_NAME: &str = "image_harvester.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Status of a run lifecycle entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Completed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Started => write!(f, "started"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Keeps the non-blocking file writer alive; drop it last.
pub struct Logger {
    log_dir: PathBuf,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Installs the global subscriber according to `config.logging`.
    pub fn new(config: &AppConfig) -> LoggerResult<Self> {
        let log_dir = PathBuf::from(&config.paths.log_directory);
        let logging = &config.logging;

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.log_level))
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        let mut guard = None;
        let file_layer = if logging.log_to_file {
            if !log_dir.exists() {
                std::fs::create_dir_all(&log_dir)?;
            }
            let (writer, file_guard) = tracing_appender::non_blocking(Self::appender(&log_dir));
            guard = Some(file_guard);

            let layer = match logging.log_format.as_str() {
                "json" => tracing_fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed(),
                _ => tracing_fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed(),
            };
            Some(layer)
        } else {
            None
        };

        // The progress bar owns stdout; only warnings go to the terminal.
        let terminal_layer = logging.log_to_terminal.then(|| {
            tracing_fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_filter(LevelFilter::from_level(Level::WARN))
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(terminal_layer)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = logging.log_format.as_str(),
            log_level = logging.log_level.as_str(),
            message = "Logger initialized",
        );

        Ok(Self { log_dir, _guard: guard })
    }

    fn appender(log_dir: &Path) -> RollingFileAppender {
        RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Records a run lifecycle entry.
pub fn log_run(run_id: Uuid, query: &str, source: SourceKind, status: RunStatus) {
    info!(
        run_id = %run_id,
        query = query,
        source = %source,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        message = %format!("Run {} for query '{}'", status, query),
    );
}

/// Records the final counters of a run.
pub fn log_run_summary(run_id: Uuid, downloaded: usize, errors: usize, cancelled: bool) {
    if errors > 0 && downloaded == 0 && !cancelled {
        warn!(run_id = %run_id, downloaded, errors, "Run produced no images");
    } else {
        info!(run_id = %run_id, downloaded, errors, cancelled, "Run summary");
    }
}

/// Installs the logger from configuration.
pub fn init_logger(config: &AppConfig) -> LoggerResult<Logger> {
    Logger::new(config)
}
