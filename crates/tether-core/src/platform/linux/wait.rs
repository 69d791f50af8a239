//! # Waiting for Status Changes
//!
//! `waitpid(2)` wrappers for the bootstrap and the monitor thread.
//!
//! The monitor waits on the debuggee's process group when that group is not
//! the tracer's own, and on each traced thread by id when it is. Waiting on a
//! shared group would also reap the tracer's other children.
//!
//! The raw status is decoded with the libc macros instead of
//! `nix::sys::wait::WaitStatus`, which cannot represent stops by real-time
//! signals and would swallow them.

use std::collections::HashSet;

use libc::c_int;
use nix::errno::Errno;
use nix::unistd::{getpgid, getpgrp, Pid};
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::inferior::{WaitOutcome, WaitReport, WaitSource};
use crate::types::{ProcessId, ThreadId};

/// Decode a raw wait status; `None` for "continued"
pub fn decode_status(tid: ThreadId, status: c_int) -> Option<WaitReport>
{
    if libc::WIFEXITED(status) {
        Some(WaitReport::exited(tid, libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Some(WaitReport::killed(tid, libc::WTERMSIG(status)))
    } else if libc::WIFSTOPPED(status) {
        Some(WaitReport::stopped(tid, libc::WSTOPSIG(status), (status >> 16) & 0xff))
    } else {
        None
    }
}

/// `waitpid(target, flags)`, retried on `EINTR`
///
/// Returns `Ok(None)` when `WNOHANG` is set and nothing is pending.
pub fn wait_raw(target: libc::pid_t, flags: c_int) -> nix::Result<Option<WaitReport>>
{
    loop {
        let mut status: c_int = 0;
        // SAFETY: `status` is a valid out-pointer for the duration of the call.
        let pid = unsafe { libc::waitpid(target, &mut status, flags) };
        match pid {
            -1 => match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(errno),
            },
            0 => return Ok(None),
            pid => {
                if let Some(report) = decode_status(ThreadId(pid as u64), status) {
                    return Ok(Some(report));
                }
            }
        }
    }
}

/// Blocking wait for one specific thread
pub fn wait_thread(tid: ThreadId) -> nix::Result<WaitReport>
{
    loop {
        if let Some(report) = wait_raw(tid.as_pid().as_raw(), libc::__WALL)? {
            return Ok(report);
        }
    }
}

/// Status source over every traced thread in the debuggee's process group
///
/// Polls `waitpid(-pgid, WNOHANG | __WALL)`. Children of this process in
/// the group are reaped as well, so the group must not be our own.
#[derive(Debug)]
pub struct ProcessGroupWaiter
{
    pgid: Pid,
}

impl ProcessGroupWaiter
{
    /// Waiter for an explicit process group
    pub fn new(pgid: Pid) -> Self
    {
        Self { pgid }
    }

    /// Waiter for the process group `pid` belongs to
    pub fn for_process(pid: ProcessId) -> Self
    {
        let pgid = getpgid(Some(pid.as_pid())).unwrap_or_else(|errno| {
            debug!("getpgid({pid}) failed ({errno}), assuming it leads its group");
            pid.as_pid()
        });
        Self::new(pgid)
    }

    /// The process group being waited on
    pub fn pgid(&self) -> Pid
    {
        self.pgid
    }
}

impl WaitSource for ProcessGroupWaiter
{
    fn next_status(&mut self, _threads: &HashSet<ThreadId>) -> Result<WaitOutcome>
    {
        match wait_raw(-self.pgid.as_raw(), libc::WNOHANG | libc::__WALL) {
            Ok(Some(report)) => Ok(WaitOutcome::Status(report)),
            Ok(None) => Ok(WaitOutcome::Idle),
            Err(Errno::ECHILD) => Ok(WaitOutcome::NoChildren),
            Err(errno) => Err(TetherError::ControlCall {
                operation: "waitpid",
                tid: None,
                errno,
            }),
        }
    }
}

/// Status source that polls `waitpid(tid, WNOHANG | __WALL)` for every known thread
///
/// Threads are visited round-robin so a busy thread cannot hide the others.
#[derive(Debug, Default)]
pub struct ThreadWaiter
{
    next: usize,
}

impl WaitSource for ThreadWaiter
{
    fn next_status(&mut self, threads: &HashSet<ThreadId>) -> Result<WaitOutcome>
    {
        let mut order: Vec<ThreadId> = threads.iter().copied().collect();
        order.sort_unstable();

        let mut waitable = false;
        for step in 0..order.len() {
            let index = (self.next + step) % order.len();
            let tid = order[index];
            match wait_raw(tid.as_pid().as_raw(), libc::WNOHANG | libc::__WALL) {
                Ok(Some(report)) => {
                    self.next = index + 1;
                    return Ok(WaitOutcome::Status(report));
                }
                Ok(None) => waitable = true,
                // Detached, or already reaped.
                Err(Errno::ECHILD) => {}
                Err(errno) => {
                    return Err(TetherError::ControlCall {
                        operation: "waitpid",
                        tid: Some(tid),
                        errno,
                    })
                }
            }
        }

        Ok(if waitable { WaitOutcome::Idle } else { WaitOutcome::NoChildren })
    }
}

/// Status source for a process we attached to
pub fn attached_waiter(pid: ProcessId) -> Box<dyn WaitSource + Send>
{
    match getpgid(Some(pid.as_pid())) {
        Ok(pgid) if pgid != getpgrp() => Box::new(ProcessGroupWaiter::new(pgid)),
        Ok(_) => {
            debug!("Process {pid} shares our process group, waiting on its threads");
            Box::new(ThreadWaiter::default())
        }
        Err(errno) => {
            debug!("getpgid({pid}) failed ({errno}), waiting on its threads");
            Box::new(ThreadWaiter::default())
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::process::{Child, Command};
    use std::thread;
    use std::time::Duration;

    use super::*;

    // Raw statuses as the kernel encodes them.
    const fn exit_status(code: c_int) -> c_int
    {
        (code & 0xff) << 8
    }

    const fn stop_status(signal: c_int, event: c_int) -> c_int
    {
        (event << 16) | (signal << 8) | 0x7f
    }

    #[test]
    fn test_decode_exit()
    {
        let report = decode_status(ThreadId(5), exit_status(3)).unwrap();
        assert_eq!(report, WaitReport::exited(ThreadId(5), 3));
    }

    #[test]
    fn test_decode_kill()
    {
        let report = decode_status(ThreadId(5), libc::SIGKILL).unwrap();
        assert_eq!(report, WaitReport::killed(ThreadId(5), libc::SIGKILL));
    }

    #[test]
    fn test_decode_ptrace_event_stop()
    {
        let report = decode_status(ThreadId(5), stop_status(libc::SIGTRAP, libc::PTRACE_EVENT_CLONE)).unwrap();
        assert_eq!(report, WaitReport::stopped(ThreadId(5), libc::SIGTRAP, libc::PTRACE_EVENT_CLONE));
    }

    #[test]
    fn test_decode_realtime_stop()
    {
        let signal = libc::SIGRTMIN() + 1;
        let report = decode_status(ThreadId(5), stop_status(signal, 0)).unwrap();
        assert_eq!(report.signal, signal);
        assert!(!report.exited);
    }

    #[test]
    fn test_continued_is_skipped()
    {
        assert_eq!(decode_status(ThreadId(5), 0xffff), None);
    }

    fn child_thread(child: &Child) -> ThreadId
    {
        ThreadId(u64::from(child.id()))
    }

    #[test]
    fn test_thread_waiter_without_threads()
    {
        let mut waiter = ThreadWaiter::default();
        assert_eq!(waiter.next_status(&HashSet::new()).unwrap(), WaitOutcome::NoChildren);

        // Not a child of ours.
        let stranger = HashSet::from([ThreadId(u64::from(u32::MAX >> 1))]);
        assert_eq!(waiter.next_status(&stranger).unwrap(), WaitOutcome::NoChildren);
    }

    #[test]
    fn test_thread_waiter_reports_only_listed_threads()
    {
        let mut target = Command::new("/bin/sleep").arg("30").spawn().expect("spawn sleep");
        let mut sibling = Command::new("/bin/sh").args(["-c", "exit 7"]).spawn().expect("spawn sh");
        let threads = HashSet::from([child_thread(&target)]);
        let mut waiter = attached_waiter(ProcessId(target.id()));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(waiter.next_status(&threads).unwrap(), WaitOutcome::Idle);

        // The sibling's status is still there for its owner.
        assert_eq!(sibling.wait().expect("wait for sibling").code(), Some(7));

        target.kill().expect("kill sleep");
        let report = loop {
            match waiter.next_status(&threads).unwrap() {
                WaitOutcome::Status(report) => break report,
                WaitOutcome::Idle => thread::sleep(Duration::from_millis(5)),
                WaitOutcome::NoChildren => panic!("target vanished without a status"),
            }
        };
        assert_eq!(report, WaitReport::killed(child_thread(&target), libc::SIGKILL));
    }

    #[test]
    fn test_thread_waiter_takes_turns()
    {
        let mut first = Command::new("/bin/sh").args(["-c", "exit 1"]).spawn().expect("spawn sh");
        let mut second = Command::new("/bin/sh").args(["-c", "exit 2"]).spawn().expect("spawn sh");
        let threads = HashSet::from([child_thread(&first), child_thread(&second)]);
        thread::sleep(Duration::from_millis(100));

        let mut waiter = ThreadWaiter::default();
        let mut codes = Vec::new();
        while codes.len() < 2 {
            match waiter.next_status(&threads).unwrap() {
                WaitOutcome::Status(report) => codes.push(report.status),
                WaitOutcome::Idle => thread::sleep(Duration::from_millis(5)),
                WaitOutcome::NoChildren => break,
            }
        }
        codes.sort_unstable();
        assert_eq!(codes, vec![1, 2]);
        assert_eq!(waiter.next_status(&threads).unwrap(), WaitOutcome::NoChildren);

        // Both were reaped by the waiter.
        assert!(first.try_wait().is_err());
        assert!(second.try_wait().is_err());
    }
}
