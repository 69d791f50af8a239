//! # Inferior Traits
//!
//! The two seams between the platform-neutral threads and the operating
//! system.
//!
//! - [`Inferior`] executes [`Operation`]s. It is created by the launch/attach
//!   bootstrap *on* the control thread and never leaves it, so it does not
//!   need to be `Send`.
//! - [`WaitSource`] reports status changes of the debuggee. It is created
//!   during the bootstrap as well and then handed to the monitor thread.
//!
//! ## Why traits?
//!
//! The Linux backend implements both with `ptrace(2)` and `waitpid(2)`
//! ([`crate::platform::linux`]). Tests implement them with in-memory fakes to
//! exercise the command channel and the event classification without a real
//! debuggee.

use std::collections::HashSet;

use crate::error::Result;
use crate::operation::{Operation, Reply};
use crate::types::ThreadId;

/// Executes privileged operations against one debuggee
///
/// ## Thread affinity
///
/// Every method is called from the privileged control thread only: on Linux
/// the kernel accepts `ptrace` requests solely from the thread that attached
/// to or launched the tracee.
pub trait Inferior
{
    /// Execute one operation synchronously
    ///
    /// A failure is returned to the submitter; it never stops the control
    /// thread.
    fn execute(&mut self, op: &Operation) -> Result<Reply>;
}

/// A raw status change, as reported by `waitpid`
///
/// This is the `(pid, exited?, signal, status)` tuple the monitor classifies:
///
/// | situation            | `exited` | `signal`          | `status`           |
/// |----------------------|----------|-------------------|--------------------|
/// | normal exit          | `true`   | `0`               | exit code          |
/// | killed by a signal   | `true`   | terminating signal| `0`                |
/// | ptrace/signal stop   | `false`  | stop signal       | ptrace event or `0`|
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport
{
    /// Thread whose status changed
    pub tid: ThreadId,
    /// Whether the thread is gone
    pub exited: bool,
    /// Stop or termination signal
    pub signal: i32,
    /// Exit code, or the `PTRACE_EVENT_*` number of a ptrace event stop
    pub status: i32,
}

impl WaitReport
{
    /// A thread that called `exit` with `code`
    pub const fn exited(tid: ThreadId, code: i32) -> Self
    {
        Self {
            tid,
            exited: true,
            signal: 0,
            status: code,
        }
    }

    /// A thread that was killed by `signal`
    pub const fn killed(tid: ThreadId, signal: i32) -> Self
    {
        Self {
            tid,
            exited: true,
            signal,
            status: 0,
        }
    }

    /// A thread that entered a stop because of `signal`
    pub const fn stopped(tid: ThreadId, signal: i32, event: i32) -> Self
    {
        Self {
            tid,
            exited: false,
            signal,
            status: event,
        }
    }
}

/// What one poll of a [`WaitSource`] produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome
{
    /// A status change
    Status(WaitReport),
    /// Nothing happened yet
    Idle,
    /// There is nothing left to wait for
    NoChildren,
}

/// Source of debuggee status changes, polled by the monitor thread
///
/// `next_status` must not block indefinitely: the monitor checks for
/// shutdown between polls and sleeps on [`WaitOutcome::Idle`].
///
/// Only status changes of the debuggee may be consumed. A source must never
/// reap other children of the tracer, whose statuses belong to their owner.
pub trait WaitSource
{
    /// Poll for the next status change
    ///
    /// `threads` are the debuggee threads the monitor currently knows about,
    /// including announced threads that have not stopped yet.
    fn next_status(&mut self, threads: &HashSet<ThreadId>) -> Result<WaitOutcome>;
}
