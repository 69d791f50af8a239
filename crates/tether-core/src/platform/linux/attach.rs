//! # Linux Attach
//!
//! Attaching to every thread of a running process.
//!
//! `PTRACE_ATTACH` works per thread, so the threads listed in
//! `/proc/<pid>/task` are attached one by one and each is waited for until
//! it stops. Threads created meanwhile show up on the next listing; the
//! scan repeats until it finds nothing new.

use std::fs;

use nix::errno::Errno;
use nix::sys::ptrace;
use tracing::{debug, info, warn};

use super::error::{attach_error, proc_error};
use super::ptrace::trace_options;
use super::wait::wait_thread;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::types::{ProcessId, ThreadId};

/// Thread ids listed in `/proc/<pid>/task`, in ascending order
pub fn list_threads(pid: ProcessId) -> Result<Vec<ThreadId>>
{
    let entries = fs::read_dir(format!("/proc/{pid}/task")).map_err(|err| proc_error(pid, err))?;

    let mut threads: Vec<ThreadId> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
        .map(ThreadId)
        .collect();
    threads.sort_unstable();
    Ok(threads)
}

/// Attach to one thread and wait for its attach stop
fn attach_thread(tid: ThreadId) -> nix::Result<()>
{
    ptrace::attach(tid.as_pid())?;
    let report = wait_thread(tid)?;
    if report.exited {
        return Err(Errno::ESRCH);
    }
    debug!("Attached to thread {tid} (stopped by signal {})", report.signal);
    Ok(())
}

fn detach_all(threads: &[ThreadId])
{
    for tid in threads {
        if let Err(errno) = ptrace::detach(tid.as_pid(), None) {
            debug!("Detaching thread {tid} failed: {errno}");
        }
    }
}

/// Attach to every thread of `pid`, returning the stopped threads
///
/// On failure every thread attached so far is detached again.
pub fn attach(pid: ProcessId, config: &MonitorConfig) -> Result<Vec<ThreadId>>
{
    let mut attached: Vec<ThreadId> = Vec::new();

    loop {
        let fresh: Vec<ThreadId> = match list_threads(pid) {
            Ok(threads) => threads.into_iter().filter(|tid| !attached.contains(tid)).collect(),
            Err(err) => {
                detach_all(&attached);
                return Err(err);
            }
        };
        if fresh.is_empty() {
            break;
        }

        for tid in fresh {
            match attach_thread(tid) {
                Ok(()) => attached.push(tid),
                Err(Errno::ESRCH) if tid != pid.main_thread() => debug!("Thread {tid} exited during attach"),
                Err(errno) => {
                    detach_all(&attached);
                    return Err(attach_error(pid, errno));
                }
            }
        }
    }

    let options = trace_options(config, false);
    for tid in &attached {
        if let Err(errno) = ptrace::setoptions(tid.as_pid(), options) {
            warn!("Setting ptrace options on thread {tid} failed: {errno}");
        }
    }

    info!("Attached to process {pid} ({} thread(s))", attached.len());
    Ok(attached)
}
