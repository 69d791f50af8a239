//! # Platform-Specific Implementations
//!
//! The operating-system half of process control: starting or attaching to a
//! debuggee, the [`Inferior`](crate::inferior::Inferior) that executes
//! operations on the control thread, and the
//! [`WaitSource`](crate::inferior::WaitSource) the monitor thread polls.
//!
//! - **Linux**: `ptrace(2)` and `waitpid(2)`
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! On other platforms [`launch_bootstrap`] and [`attach_bootstrap`] fail with
//! [`TetherError::Unsupported`](crate::error::TetherError::Unsupported);
//! [`ProcessMonitor::start`](crate::ProcessMonitor::start) still works with
//! a caller-provided backend.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub(crate) use self::linux::{attach_bootstrap, kill_process, launch_bootstrap, reap_process};

#[cfg(not(target_os = "linux"))]
mod unsupported
{
    use crate::control::Bootstrap;
    use crate::error::{Result, TetherError};
    use crate::types::{LaunchInfo, ProcessId};

    const REASON: &str = "process control is only implemented for Linux";

    pub(crate) fn launch_bootstrap(_info: LaunchInfo) -> Result<Bootstrap>
    {
        Err(TetherError::Unsupported(REASON))
    }

    pub(crate) fn attach_bootstrap(_pid: ProcessId) -> Result<Bootstrap>
    {
        Err(TetherError::Unsupported(REASON))
    }

    pub(crate) fn kill_process(_pid: ProcessId) -> Result<()>
    {
        Err(TetherError::Unsupported(REASON))
    }

    pub(crate) fn reap_process(_pid: ProcessId) {}
}

#[cfg(not(target_os = "linux"))]
pub(crate) use self::unsupported::{attach_bootstrap, kill_process, launch_bootstrap, reap_process};
