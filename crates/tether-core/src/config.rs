//! # Monitor Configuration
//!
//! Knobs that shape how a [`ProcessMonitor`](crate::ProcessMonitor) traces its
//! debuggee.
//!
//! ## Environment
//!
//! [`MonitorConfig::from_env`] starts from the defaults and applies:
//!
//! - `TETHER_POLL_INTERVAL_MS`: idle sleep of the monitor thread
//! - `TETHER_TRACE_EXIT`: report `PTRACE_EVENT_EXIT` stops (`1`/`true`/`yes`/`on`)
//! - `TETHER_KILL_ON_EXIT`: kill a launched debuggee if the tracer dies

use std::env;
use std::time::Duration;

use tracing::warn;

/// Environment variable for [`MonitorConfig::poll_interval`] in milliseconds
pub const POLL_INTERVAL_ENV: &str = "TETHER_POLL_INTERVAL_MS";
/// Environment variable for [`MonitorConfig::trace_exit`]
pub const TRACE_EXIT_ENV: &str = "TETHER_TRACE_EXIT";
/// Environment variable for [`MonitorConfig::kill_on_exit`]
pub const KILL_ON_EXIT_ENV: &str = "TETHER_KILL_ON_EXIT";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Tracing options for one monitored process
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
///
/// use tether_core::MonitorConfig;
///
/// let config = MonitorConfig::default()
///     .trace_exit(true)
///     .poll_interval(Duration::from_millis(1))
///     .thread_name_prefix("dbg");
///
/// assert!(config.trace_clone);
/// assert!(config.trace_exit);
/// assert_eq!(config.control_thread_name(), "dbg-control");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig
{
    /// Follow new threads (`PTRACE_O_TRACECLONE`)
    pub trace_clone: bool,
    /// Report `execve()` (`PTRACE_O_TRACEEXEC`)
    pub trace_exec: bool,
    /// Report threads about to exit (`PTRACE_O_TRACEEXIT`)
    pub trace_exit: bool,
    /// Kill a launched debuggee when the control thread goes away
    /// (`PTRACE_O_EXITKILL`). Attached processes are never killed.
    pub kill_on_exit: bool,
    /// How long the monitor thread sleeps when no status change is pending
    pub poll_interval: Duration,
    /// Prefix of the control and monitor thread names
    pub thread_name_prefix: String,
}

impl Default for MonitorConfig
{
    fn default() -> Self
    {
        Self {
            trace_clone: true,
            trace_exec: true,
            trace_exit: false,
            kill_on_exit: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            thread_name_prefix: "tether".to_string(),
        }
    }
}

impl MonitorConfig
{
    /// Defaults overridden by the `TETHER_*` environment variables
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring {POLL_INTERVAL_ENV}={raw:?}: not a number of milliseconds"),
            }
        }
        if let Some(raw) = lookup(TRACE_EXIT_ENV) {
            match parse_flag(&raw) {
                Some(flag) => config.trace_exit = flag,
                None => warn!("Ignoring {TRACE_EXIT_ENV}={raw:?}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(KILL_ON_EXIT_ENV) {
            match parse_flag(&raw) {
                Some(flag) => config.kill_on_exit = flag,
                None => warn!("Ignoring {KILL_ON_EXIT_ENV}={raw:?}: expected a boolean"),
            }
        }

        config
    }

    /// Set [`trace_clone`](Self::trace_clone)
    #[must_use]
    pub fn trace_clone(mut self, enabled: bool) -> Self
    {
        self.trace_clone = enabled;
        self
    }

    /// Set [`trace_exec`](Self::trace_exec)
    #[must_use]
    pub fn trace_exec(mut self, enabled: bool) -> Self
    {
        self.trace_exec = enabled;
        self
    }

    /// Set [`trace_exit`](Self::trace_exit)
    #[must_use]
    pub fn trace_exit(mut self, enabled: bool) -> Self
    {
        self.trace_exit = enabled;
        self
    }

    /// Set [`kill_on_exit`](Self::kill_on_exit)
    #[must_use]
    pub fn kill_on_exit(mut self, enabled: bool) -> Self
    {
        self.kill_on_exit = enabled;
        self
    }

    /// Set [`poll_interval`](Self::poll_interval)
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self
    {
        self.poll_interval = interval;
        self
    }

    /// Set [`thread_name_prefix`](Self::thread_name_prefix)
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self
    {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Name given to the privileged control thread
    pub fn control_thread_name(&self) -> String
    {
        format!("{}-control", self.thread_name_prefix)
    }

    /// Name given to the monitor thread
    pub fn monitor_thread_name(&self) -> String
    {
        format!("{}-monitor", self.thread_name_prefix)
    }
}

fn parse_flag(raw: &str) -> Option<bool>
{
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
