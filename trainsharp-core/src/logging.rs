//! Logging setup: coloured human-readable stderr plus an optional JSON log file.

use crate::error::{Result, SharpError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log level names accepted on the command line and in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`. `critical` has no tracing
    /// counterpart and maps to `error`.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = SharpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(SharpError::unsupported("log level", other)),
        }
    }
}

/// Logging configuration for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Prefix of the log file name.
    pub name: String,
    pub level: LogLevel,
    /// Emit ANSI colours on stderr.
    pub colorized: bool,
    /// Also write JSON records to `{save_dir}/{name}-{timestamp}.log`.
    pub save_log: bool,
    pub save_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: "trainsharp".to_string(),
            level: LogLevel::Info,
            colorized: true,
            save_log: true,
            save_dir: PathBuf::from("."),
        }
    }
}

impl LogConfig {
    /// File the JSON layer writes to when started at `now`.
    pub fn log_file_path(&self, now: DateTime<Local>) -> PathBuf {
        self.save_dir.join(log_file_name(&self.name, now))
    }
}

fn log_file_name(name: &str, now: DateTime<Local>) -> String {
    format!("{}-{}.log", name, now.format("%Y%m%d%H%M%S"))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when `save_log` is set; keep it alive for the
/// lifetime of the process or buffered records are lost.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(config.colorized)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(config.level.directive()));

    let (json_layer, guard) = if config.save_log {
        let (writer, guard) = file_writer(&config.save_dir, &config.name)?;
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| SharpError::invalid_argument(format!("logging already initialized: {e}")))?;

    Ok(guard)
}

fn file_writer(
    dir: &Path,
    name: &str,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let file_name = log_file_name(name, Local::now());
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
