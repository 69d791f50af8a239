//! Common module for library exports

pub use crate::config::MonitorConfig;
pub use crate::error::{Result, TetherError};
pub use crate::events::{event_channel, ProcessEvent, ProcessObserver, SignalOrigin, TrapReason};
pub use crate::process_monitor::ProcessMonitor;
pub use crate::types::address::Address;
pub use crate::types::launch::{LaunchFlags, LaunchInfo};
pub use crate::types::process::{ProcessId, ThreadId};
pub use crate::types::registers::{RegisterSet, RegisterValue};
pub use crate::types::signal::SignalInfo;
