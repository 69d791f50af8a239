//! # Linux Process Launch
//!
//! Starting a debuggee under ptrace control with `fork`/`exec`.
//!
//! ## Sequence
//!
//! 1. Open a pseudo-terminal when at least one standard stream has no
//!    redirection path.
//! 2. Spawn the program with [`std::process::Command`]. In the child, right
//!    before `execve`:
//!    - disable address-space randomization if requested,
//!    - become a session leader with the terminal as controlling tty (or,
//!      without a terminal, the leader of a new process group),
//!    - call `PTRACE_TRACEME`.
//! 3. Wait for the `SIGTRAP` the kernel delivers after `execve` and set the
//!    ptrace options.
//!
//! This all runs on the control thread: the thread that forks a
//! `PTRACE_TRACEME` child becomes its tracer.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [openpty(3) man page](https://man7.org/linux/man-pages/man3/openpty.3.html)

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::pty::openpty;
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{setpgid, setsid, Pid};
use tracing::{debug, info};

use super::constants::PERSONA_QUERY;
use super::error::redirect_error;
use super::ptrace::trace_options;
use super::wait::wait_thread;
use crate::config::MonitorConfig;
use crate::error::{Result, TetherError};
use crate::types::{LaunchInfo, ProcessId};

/// A debuggee stopped right after `execve`
#[derive(Debug)]
pub struct LaunchedProcess
{
    /// Process id of the debuggee
    pub pid: ProcessId,
    /// Master side of the debuggee's pseudo-terminal
    pub terminal: Option<OwnedFd>,
}

struct Terminal
{
    master: OwnedFd,
    slave: OwnedFd,
}

/// Launch functions for the Linux backend.
pub(crate) struct LaunchManager;

impl LaunchManager
{
    /// Open a pseudo-terminal pair with `FD_CLOEXEC` set on both ends.
    fn open_terminal() -> Result<Terminal>
    {
        let pty = openpty(None, None).map_err(|errno| TetherError::SpawnFailed(format!("openpty failed: {errno}")))?;

        for fd in [pty.master.as_raw_fd(), pty.slave.as_raw_fd()] {
            // SAFETY: `fd` is an open descriptor owned by `pty`.
            if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
                let err = io::Error::last_os_error();
                return Err(TetherError::SpawnFailed(format!("Failed to configure terminal: {err}")));
            }
        }

        Ok(Terminal {
            master: pty.master,
            slave: pty.slave,
        })
    }

    /// Stdio for one stream: the redirection file, or a copy of the terminal slave.
    fn stream(path: Option<&Path>, write: bool, terminal: Option<&Terminal>) -> Result<Stdio>
    {
        match (path, terminal) {
            (Some(path), _) => {
                let file = if write {
                    OpenOptions::new().write(true).create(true).truncate(true).open(path)
                } else {
                    File::open(path)
                };
                file.map(Stdio::from).map_err(|err| redirect_error(path, &err))
            }
            (None, Some(terminal)) => Ok(Stdio::from(terminal.slave.try_clone()?)),
            (None, None) => Ok(Stdio::inherit()),
        }
    }

    /// Launch `info` stopped after `execve`.
    pub(crate) fn launch(info: &LaunchInfo, config: &MonitorConfig) -> Result<LaunchedProcess>
    {
        let terminal = if info.uses_terminal() {
            Some(Self::open_terminal()?)
        } else {
            None
        };

        let mut command = Command::new(info.program());
        if let Some((arg0, args)) = info.argv().split_first() {
            command.arg0(arg0).args(args);
        }
        if let Some(env) = info.environment() {
            command.env_clear().envs(env.iter().map(|(key, value)| (key, value)));
        }
        if let Some(dir) = info.working_directory() {
            command.current_dir(dir);
        }
        command
            .stdin(Self::stream(info.stdin_path(), false, terminal.as_ref())?)
            .stdout(Self::stream(info.stdout_path(), true, terminal.as_ref())?)
            .stderr(Self::stream(info.stderr_path(), true, terminal.as_ref())?);

        let controlling_tty = terminal.as_ref().map(|terminal| terminal.slave.as_raw_fd());
        let disable_aslr = info.launch_flags().disable_aslr;
        // SAFETY: the hook only issues async-signal-safe system calls.
        unsafe {
            command.pre_exec(move || prepare_child(controlling_tty, disable_aslr));
        }

        let child = command
            .spawn()
            .map_err(|err| TetherError::SpawnFailed(format!("{}: {err}", info.program().display())))?;
        let pid = ProcessId(child.id());
        // The child owns the slave end now; only the master stays with us.
        let terminal = terminal.map(|terminal| terminal.master);
        debug!("Spawned {} as process {pid}", info.display_name().to_string_lossy());

        if let Err(err) = Self::finish_startup(pid, config) {
            let _ = kill(pid.as_pid(), Signal::SIGKILL);
            let _ = wait_thread(pid.main_thread());
            return Err(err);
        }

        info!("Launched process {pid}");
        Ok(LaunchedProcess { pid, terminal })
    }

    /// Consume the post-exec stop and configure tracing.
    fn finish_startup(pid: ProcessId, config: &MonitorConfig) -> Result<()>
    {
        let report = wait_thread(pid.main_thread())
            .map_err(|errno| TetherError::SpawnFailed(format!("waiting for process {pid} failed: {errno}")))?;
        if report.exited || report.signal != libc::SIGTRAP {
            return Err(TetherError::SpawnFailed(format!(
                "process {pid} did not stop after exec: {report:?}"
            )));
        }

        ptrace::setoptions(pid.as_pid(), trace_options(config, true))
            .map_err(|errno| TetherError::control("PTRACE_SETOPTIONS", pid.main_thread(), errno))
    }
}

/// Runs in the forked child between `fork` and `execve`.
fn prepare_child(controlling_tty: Option<RawFd>, disable_aslr: bool) -> io::Result<()>
{
    if disable_aslr {
        // SAFETY: personality() only changes flags of the calling process.
        unsafe {
            let persona = libc::personality(PERSONA_QUERY);
            if persona != -1 {
                libc::personality((persona | libc::ADDR_NO_RANDOMIZE) as libc::c_ulong);
            }
        }
    }

    match controlling_tty {
        Some(tty) => {
            setsid()?;
            // SAFETY: `tty` is the terminal slave, still open in the child.
            if unsafe { libc::ioctl(tty, libc::TIOCSCTTY, 0) } == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        None => setpgid(Pid::from_raw(0), Pid::from_raw(0))?,
    }

    ptrace::traceme()?;
    Ok(())
}
