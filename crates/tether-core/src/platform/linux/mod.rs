//! # Linux Debugging Implementation
//!
//! Linux-specific process control using `ptrace(2)` and `waitpid(2)`.
//!
//! ## Thread model
//!
//! Linux ties a tracee to the *thread* that attached to it: only that
//! thread may issue ptrace requests, and the tracee is detached when that
//! thread exits. The bootstraps below therefore run on the control thread,
//! and the [`PtraceInferior`] they return never leaves it.
//!
//! Any thread of the tracer's process may `waitpid` for a tracee, which is
//! what lets the monitor thread watch the debuggee independently.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [waitpid(2) man page](https://man7.org/linux/man-pages/man2/waitpid.2.html)

pub mod attach;
pub mod constants;
pub mod error;
pub mod launch;
pub mod ptrace;
pub mod wait;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use tracing::{debug, warn};

pub use self::ptrace::PtraceInferior;
pub use self::wait::{ProcessGroupWaiter, ThreadWaiter};
use crate::config::MonitorConfig;
use crate::control::{Bootstrap, Startup};
use crate::error::{Result, TetherError};
use crate::inferior::Inferior;
use crate::types::{LaunchInfo, ProcessId};

/// Bootstrap that launches `info` on the control thread
pub(crate) fn launch_bootstrap(info: LaunchInfo) -> Result<Bootstrap>
{
    Ok(Box::new(move |config: &MonitorConfig| {
        let launched = launch::LaunchManager::launch(&info, config)?;
        let pid = launched.pid;
        let startup = Startup {
            pid,
            terminal: launched.terminal,
            threads: vec![pid.main_thread()],
            waiter: Box::new(ProcessGroupWaiter::for_process(pid)),
            launched: true,
        };
        Ok((Box::new(PtraceInferior::new(pid)) as Box<dyn Inferior>, startup))
    }))
}

/// Bootstrap that attaches to `pid` on the control thread
pub(crate) fn attach_bootstrap(pid: ProcessId) -> Result<Bootstrap>
{
    Ok(Box::new(move |config: &MonitorConfig| {
        let threads = attach::attach(pid, config)?;
        let startup = Startup {
            pid,
            terminal: None,
            threads,
            waiter: wait::attached_waiter(pid),
            launched: false,
        };
        Ok((Box::new(PtraceInferior::new(pid)) as Box<dyn Inferior>, startup))
    }))
}

/// Send `SIGKILL` to the whole debuggee
pub(crate) fn kill_process(pid: ProcessId) -> Result<()>
{
    kill(pid.as_pid(), Signal::SIGKILL).map_err(|errno| TetherError::control("kill", pid.main_thread(), errno))
}

/// Wait for a killed debuggee so it does not linger as a zombie
pub(crate) fn reap_process(pid: ProcessId)
{
    loop {
        match wait::wait_thread(pid.main_thread()) {
            Ok(report) if report.exited => {
                debug!("Reaped process {pid}");
                return;
            }
            Ok(_) => {}
            Err(Errno::ECHILD) => return,
            Err(errno) => {
                warn!("Reaping process {pid} failed: {errno}");
                return;
            }
        }
    }
}
