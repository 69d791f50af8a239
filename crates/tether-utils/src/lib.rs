//! # Tether Utilities
//!
//! Shared utilities, logging, config, and helpers for Tether.
//!
//! This crate provides common functionality used across the Tether workspace,
//! including the logging setup built on `tracing`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{default_log_file, init_logging, init_logging_with, LogConfig, LogFormat, LogLevel, LoggingError};
pub use tracing_appender::non_blocking::WorkerGuard;
pub use tracing::{debug, error, info, trace, warn};
