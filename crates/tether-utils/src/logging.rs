//! # Logging
//!
//! `tracing` subscriber setup shared by the Tether binaries.
//!
//! Console output is written to stderr, since stdout carries the debuggee's
//! terminal. Lines carry thread names, which tells the control thread and the
//! monitor thread apart. A log file can be added next to the console; it is
//! written from a background worker whose guard the caller keeps alive.
//!
//! ```rust,no_run
//! use tether_utils::init_logging;
//!
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("monitor ready");
//! ```
//!
//! ## Environment
//!
//! - `RUST_LOG`: filter directives, used when no explicit level is given (`RUST_LOG=tether_core=trace`)
//! - `TETHER_LOG_FORMAT`: `pretty` (default) or `json`
//! - `TETHER_LOG_FILE`: also append to this file

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "TETHER_LOG_FORMAT";
/// Environment variable naming a log file
pub const LOG_FILE_ENV: &str = "TETHER_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (every command and wait status)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Logging settings
///
/// Filter priority:
/// 1. `level`, when set (e.g. from a `--log-level` flag)
/// 2. `RUST_LOG`, which also accepts per-module filters
/// 3. `info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Explicit level overriding `RUST_LOG`
    pub level: Option<LogLevel>,
    /// Output format for the console and the file
    pub format: LogFormat,
    /// Additional log file
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Settings from `TETHER_LOG_FORMAT` and `TETHER_LOG_FILE`
    ///
    /// An unknown format falls back to pretty output.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        let format = lookup(LOG_FORMAT_ENV)
            .and_then(|s| LogFormat::from_str(&s).ok())
            .unwrap_or_default();
        let file = lookup(LOG_FILE_ENV).filter(|s| !s.is_empty()).map(PathBuf::from);

        Self {
            level: None,
            format,
            file,
        }
    }

    /// Override the level filter
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self
    {
        self.level = Some(level);
        self
    }

    /// Also write to `file`
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self
    {
        self.file = Some(file.into());
        self
    }

    fn filter(&self) -> EnvFilter
    {
        match self.level {
            Some(level) => EnvFilter::new(Level::from(level).to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        }
    }
}

/// Initialize logging from the environment
///
/// ## Example
///
/// ```rust,no_run
/// use tether_utils::init_logging;
///
/// let _guard = init_logging().expect("Failed to initialize logging");
/// tracing::info!("Application started");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file
/// cannot be created.
pub fn init_logging() -> Result<Option<WorkerGuard>, LoggingError>
{
    init_logging_with(&LogConfig::from_env())
}

/// Initialize logging with explicit settings
///
/// The returned guard flushes the log file when dropped; it is `None`
/// without a file.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file
/// cannot be created.
pub fn init_logging_with(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format, config.filter())];

    let guard = match &config.file {
        Some(path) => {
            let (layer, guard) = file_layer(path, config.format, config.filter())?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(guard)
}

/// Dated log file under `~/.tether`, or `/tmp` without a home directory
///
/// ## Errors
///
/// Returns an error if `~/.tether` cannot be created.
pub fn default_log_file() -> Result<PathBuf, LoggingError>
{
    let today = Local::now().format("%Y-%m-%d");
    let name = format!("{today}-tether.log");

    match env::var("HOME") {
        Ok(home) => {
            let dir = PathBuf::from(home).join(".tether");
            std::fs::create_dir_all(&dir)?;
            Ok(dir.join(name))
        }
        Err(_) => Ok(PathBuf::from("/tmp").join(name)),
    }
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidFile(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false); // No ANSI in files

    let layer = match format {
        LogFormat::Pretty => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
    };
    Ok((layer, guard))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// The log path has no file name
    #[error("Invalid log file: {}", .0.display())]
    InvalidFile(PathBuf),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
