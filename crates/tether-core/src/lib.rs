//! # tether-core
//!
//! Control of a debuggee ("inferior") process from a multi-threaded debugger.
//!
//! This crate provides:
//! - Launching a program stopped at its first instruction, or attaching to
//!   every thread of a running process
//! - Memory and register access for individual threads
//! - Resume, single-step, stop, kill and detach
//! - Asynchronous stop and exit notifications through a [`ProcessObserver`]
//!
//! ## Threads
//!
//! A [`ProcessMonitor`] owns two background threads:
//!
//! - the **control thread** (`<prefix>-control`) is the only thread that
//!   talks to the kernel's tracing interface; every operation is executed
//!   there and its reply handed back to the caller
//! - the **monitor thread** (`<prefix>-monitor`) waits for status changes of
//!   the debuggee, turns them into [`ProcessEvent`]s and delivers them to the
//!   observer
//!
//! Callers never issue control calls themselves: they submit an
//! [`Operation`] through the command channel and block until it completes.
//!
//! ## Platform Support
//!
//! - **Linux**: `ptrace(2)`, `waitpid(2)` and `/proc`
//! - Other platforms: only [`ProcessMonitor::start`] with a caller-provided
//!   [`Inferior`] and [`WaitSource`]
//!
//! ## Why unsafe code is needed
//!
//! Several ptrace requests (`PTRACE_PEEKUSER`, `PTRACE_GETREGSET`, restarts
//! with real-time signals) and raw wait statuses have no safe wrapper, so the
//! Linux backend calls `libc` directly. Every such call is wrapped in a safe
//! function.

#![allow(unsafe_code)] // Required for raw ptrace and waitpid calls

pub mod channel;
pub mod classify;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod inferior;
mod monitor;
pub mod operation;
pub mod platform;
pub mod prelude;
pub mod process_monitor;
pub mod tracker;
pub mod types;

pub use config::MonitorConfig;
pub use control::{Bootstrap, Startup};
pub use error::{Result, TetherError};
pub use events::{event_channel, ChannelObserver, ProcessEvent, ProcessObserver, SignalOrigin, TrapReason};
pub use inferior::{Inferior, WaitOutcome, WaitReport, WaitSource};
pub use operation::{MemoryTransfer, Operation, Reply};
pub use process_monitor::ProcessMonitor;
pub use types::{Address, LaunchFlags, LaunchInfo, ProcessId, RegisterSet, RegisterValue, SignalInfo, ThreadId};
