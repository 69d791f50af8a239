//! # Error Types
//!
//! Error handling for the process monitor.
//!
//! We use `thiserror` to derive `Error` and `Display`. Every public
//! operation returns [`Result`]; the control thread never aborts on a failed
//! control call, it writes the failure into the reply and keeps serving.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::types::ThreadId;

/// Main error type for process monitor operations
///
/// ## Error Categories
///
/// 1. **Startup**: `SpawnFailed`, `AttachFailed`, `ProcessNotFound`,
///    `PermissionDenied`, `ThreadSpawn`
/// 2. **Control calls**: `ControlCall`, `PartialTransfer`
/// 3. **Channel**: `ChannelClosed`, `UnexpectedReply`
/// 4. **Waiting**: `ThreadExited`
/// 5. **Caller mistakes**: `InvalidArgument`, `Unsupported`
/// 6. **I/O**: `Io`
///
/// There is deliberately no timeout variant: blocking calls wait until the
/// debuggee produces the event or goes away.
#[derive(Error, Debug)]
pub enum TetherError
{
    /// The debuggee could not be created or did not reach its first stop
    #[error("Failed to launch process: {0}")]
    SpawnFailed(String),

    /// `PTRACE_ATTACH` or the initial wait failed
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed
    {
        /// Target process
        pid: u32,
        /// What went wrong
        reason: String,
    },

    /// The process with the given PID doesn't exist or has exited
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// Insufficient permissions to trace the target process
    ///
    /// On Linux this usually means Yama's `ptrace_scope` forbids attaching
    /// to a non-child, or the target belongs to another user.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A ptrace (or related) call failed on the control thread
    #[error("{operation} failed{}: {errno}", thread_suffix(tid))]
    ControlCall
    {
        /// Name of the failed operation
        operation: &'static str,
        /// Thread the call addressed, if any
        tid: Option<ThreadId>,
        /// Error reported by the kernel
        errno: Errno,
    },

    /// A memory transfer stopped before moving every requested byte
    ///
    /// For reads, the first `transferred` bytes of the caller's buffer hold
    /// valid data.
    #[error("Memory transfer stopped after {transferred} of {requested} bytes: {errno}")]
    PartialTransfer
    {
        /// Bytes moved before the failure
        transferred: usize,
        /// Bytes the caller asked for
        requested: usize,
        /// Error that stopped the transfer
        errno: Errno,
    },

    /// The control thread is gone (debuggee exited or monitoring stopped)
    #[error("Control thread is not running")]
    ChannelClosed,

    /// The control thread answered with a reply of the wrong kind
    #[error("Unexpected reply from control thread (expected {expected})")]
    UnexpectedReply
    {
        /// Reply kind the operation expects
        expected: &'static str,
    },

    /// A thread being waited on exited before it stopped
    #[error("Thread {0} exited")]
    ThreadExited(ThreadId),

    /// The control or monitor thread could not be created
    #[error("Failed to start {name} thread: {source}")]
    ThreadSpawn
    {
        /// Which thread
        name: &'static str,
        /// Error from `std::thread::Builder::spawn`
        #[source]
        source: io::Error,
    },

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not available on this architecture
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// I/O error (terminal, `/proc` access, redirection files)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TetherError
{
    /// Build a [`TetherError::ControlCall`]
    pub fn control(operation: &'static str, tid: impl Into<Option<ThreadId>>, errno: Errno) -> Self
    {
        TetherError::ControlCall {
            operation,
            tid: tid.into(),
            errno,
        }
    }

    /// The errno behind a control-call or partial-transfer failure
    pub fn errno(&self) -> Option<Errno>
    {
        match self {
            TetherError::ControlCall { errno, .. } | TetherError::PartialTransfer { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

fn thread_suffix(tid: &Option<ThreadId>) -> String
{
    tid.map(|tid| format!(" for thread {tid}")).unwrap_or_default()
}

/// Convenience type alias for `Result<T, TetherError>`
///
/// ```rust
/// use tether_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TetherError>;
