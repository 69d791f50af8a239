//! Integration tests for the Linux backend
//!
//! These tests require:
//! - Running on Linux (`#![cfg(target_os = "linux")]`)
//! - ptrace being permitted (containers often forbid it via seccomp)
//! - `/bin/true` and `/bin/sleep`
//!
//! Tests are skipped if tracing is not permitted.

#![cfg(target_os = "linux")]

use std::env;
use std::fs;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use tether_core::events::ProcessEventReceiver;
use tether_core::{event_channel, Address, LaunchInfo, MonitorConfig, ProcessEvent, ProcessId, ProcessMonitor};
use tether_core::{RegisterSet, RegisterValue, Result, SignalOrigin, TetherError, ThreadId};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Set in the environment of this binary when it runs as a threaded debuggee
const THREAD_HELPER_ENV: &str = "TETHER_TEST_THREAD_HELPER";

/// Unwrap a started monitor, or `None` if tracing is forbidden here
fn started(result: Result<ProcessMonitor>) -> Option<ProcessMonitor>
{
    match result {
        Ok(monitor) => Some(monitor),
        Err(TetherError::PermissionDenied(reason)) => {
            eprintln!("skipping: {reason}");
            None
        }
        Err(TetherError::SpawnFailed(reason)) if reason.contains("Operation not permitted") => {
            eprintln!("skipping: {reason}");
            None
        }
        Err(err) => panic!("could not start monitoring: {err}"),
    }
}

fn next_event(events: &ProcessEventReceiver) -> ProcessEvent
{
    events.recv_timeout(EVENT_TIMEOUT).expect("event within timeout")
}

/// Skip non-final events until the process is gone
fn final_event(events: &ProcessEventReceiver) -> ProcessEvent
{
    loop {
        let event = next_event(events);
        if event.is_final() {
            return event;
        }
    }
}

/// An address near the top of the debuggee's stack
fn stack_address(pid: ProcessId) -> Address
{
    let maps = fs::read_to_string(format!("/proc/{pid}/maps")).expect("readable maps");
    let line = maps
        .lines()
        .find(|line| line.ends_with("[stack]"))
        .expect("process has a stack mapping");
    let range = line.split_whitespace().next().expect("address range");
    let (_, end) = range.split_once('-').expect("start-end");
    let end = u64::from_str_radix(end, 16).expect("hex address");
    Address::new(end - 0x100)
}

fn process_alive(pid: ProcessId) -> bool
{
    kill(pid.as_pid(), None) != Err(Errno::ESRCH)
}

#[test]
fn test_launch_true_exits_cleanly()
{
    let (observer, events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/true"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();

    assert!(monitor.terminal_fd().is_some());
    monitor.resume(tid, None).expect("resume stopped process");

    assert_eq!(
        final_event(&events),
        ProcessEvent::Exited {
            pid: monitor.pid(),
            code: 0,
        }
    );
    assert!(monitor.has_exited());
    assert!(matches!(monitor.resume(tid, None), Err(TetherError::ChannelClosed)));
}

#[test]
fn test_launch_missing_program_fails()
{
    let (observer, _events) = event_channel();
    let result = ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/nonexistent/tether-test-program"),
        MonitorConfig::default(),
    );

    assert!(matches!(result, Err(TetherError::SpawnFailed(_))));
}

#[test]
fn test_stack_write_then_read_back()
{
    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    // Odd address, so both ends of the transfer are partial words.
    let addr = stack_address(monitor.pid()) + 3;

    let mut original = [0u8; 13];
    assert_eq!(monitor.read_memory(addr, &mut original).unwrap(), original.len());

    let pattern: Vec<u8> = (0..13).map(|i| 0xa0 + i).collect();
    assert_eq!(monitor.write_memory(addr, &pattern).unwrap(), pattern.len());

    let mut first = [0u8; 13];
    let mut second = [0u8; 13];
    monitor.read_memory(addr, &mut first).unwrap();
    monitor.read_memory(addr, &mut second).unwrap();
    assert_eq!(first.as_slice(), pattern.as_slice());
    assert_eq!(first, second);

    // Neighbouring bytes are untouched.
    let mut before = [0u8; 1];
    monitor.read_memory(addr - 1, &mut before).unwrap();
    monitor.write_memory(addr, &original).unwrap();
    let mut restored = [0u8; 14];
    monitor.read_memory(addr - 1, &mut restored).unwrap();
    assert_eq!(restored[0], before[0]);
    assert_eq!(&restored[1..], original.as_slice());

    monitor.stop_monitor();
}

#[test]
fn test_unmapped_read_fails()
{
    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };

    let mut buf = [0u8; 16];
    let err = monitor
        .read_memory(Address::new(0x1000), &mut buf)
        .expect_err("page zero is never mapped");
    assert!(matches!(err, TetherError::ControlCall { .. }), "got {err:?}");
}

#[test]
fn test_stop_thread_reports_tracer_sigstop()
{
    let (observer, events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();

    // Stopped at the exec trap.
    assert_eq!(monitor.signal_info(tid).unwrap().signo, libc::SIGTRAP);

    monitor.resume(tid, None).unwrap();
    monitor.stop_thread(tid).expect("thread stops");

    let info = monitor.signal_info(tid).unwrap();
    assert_eq!(info.signo, libc::SIGSTOP);
    assert_eq!(info.sender_pid, Some(std::process::id()));

    match next_event(&events) {
        ProcessEvent::Signal { tid: stopped, signal, origin, .. } => {
            assert_eq!(stopped, tid);
            assert_eq!(signal, libc::SIGSTOP);
            assert_eq!(origin, SignalOrigin::Tracer);
        }
        other => panic!("expected a signal stop, got {other}"),
    }

    monitor.kill().unwrap();
    assert_eq!(
        final_event(&events),
        ProcessEvent::Terminated {
            pid: monitor.pid(),
            signal: libc::SIGKILL,
        }
    );
}

#[test]
fn test_stop_monitor_kills_launched_process()
{
    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let pid = monitor.pid();

    monitor.stop_monitor();
    monitor.stop_monitor();

    assert!(monitor.terminal_fd().is_none());
    assert!(!process_alive(pid));
}

#[test]
fn test_attach_has_no_terminal()
{
    // In its own process group, so the monitor waits on the whole group.
    let mut child = Command::new("/bin/sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .expect("spawn sleep");
    let pid = ProcessId(child.id());

    let (observer, _events) = event_channel();
    let monitor = started(ProcessMonitor::attach(&observer, pid, MonitorConfig::default()));
    if let Some(monitor) = monitor {
        assert!(monitor.terminal_fd().is_none());
        assert!(monitor.initial_threads().contains(&pid.main_thread()));

        let mut buf = [0u8; 16];
        let err = monitor
            .read_memory(Address::new(0x1000), &mut buf)
            .expect_err("page zero is never mapped");
        assert!(matches!(err, TetherError::ControlCall { .. }), "got {err:?}");

        monitor.stop_monitor();
        // Attached processes survive the monitor.
        assert!(process_alive(pid));
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_attach_in_our_process_group_leaves_other_children_alone()
{
    let mut child = Command::new("/bin/sleep").arg("30").spawn().expect("spawn sleep");
    let pid = ProcessId(child.id());

    let (observer, events) = event_channel();
    if let Some(monitor) = started(ProcessMonitor::attach(&observer, pid, MonitorConfig::default())) {
        let mut sibling = Command::new("/bin/sh").args(["-c", "exit 7"]).spawn().expect("spawn sh");
        let sibling_tid = ThreadId(u64::from(sibling.id()));
        thread::sleep(Duration::from_millis(200));

        // The exit status still belongs to us, not to the monitor.
        assert_eq!(sibling.wait().expect("wait for sibling").code(), Some(7));
        while let Ok(event) = events.try_recv() {
            assert_ne!(event.thread(), Some(sibling_tid), "unrelated child reported: {event}");
        }

        monitor.stop_monitor();
        assert!(process_alive(pid));
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_detach_releases_process()
{
    let mut child = Command::new("/bin/sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .expect("spawn sleep");
    let pid = ProcessId(child.id());

    let (observer, _events) = event_channel();
    if let Some(monitor) = started(ProcessMonitor::attach(&observer, pid, MonitorConfig::default())) {
        for tid in monitor.initial_threads() {
            monitor.detach(*tid).expect("detach thread");
        }

        let status = fs::read_to_string(format!("/proc/{pid}/status")).expect("readable status");
        assert!(status.lines().any(|line| line.split_whitespace().eq(["TracerPid:", "0"])));
        assert!(process_alive(pid));
        monitor.stop_monitor();
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_single_step_reports_trace_trap()
{
    let (observer, events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();

    monitor.single_step(tid, None).expect("single step");
    match next_event(&events) {
        ProcessEvent::Trap { tid: stepped, .. } => assert_eq!(stepped, tid),
        other => panic!("expected a trap, got {other}"),
    }
    assert_eq!(monitor.signal_info(tid).unwrap().signo, libc::SIGTRAP);

    monitor.stop_monitor();
}

#[test]
fn test_register_sets_write_back()
{
    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();

    let mut gpr = vec![0u8; 4096];
    let len = monitor.read_gpr(tid, &mut gpr).unwrap();
    assert!(len > 0);
    monitor.write_gpr(tid, &gpr[..len]).expect("write general registers");

    let mut again = vec![0u8; 4096];
    assert_eq!(monitor.read_register_set(tid, &mut again, RegisterSet::General).unwrap(), len);
    assert_eq!(&again[..len], &gpr[..len]);
    monitor
        .write_register_set(tid, &again[..len], RegisterSet::General)
        .expect("write register set");

    let mut fpr = vec![0u8; 4096];
    let len = monitor.read_fpr(tid, &mut fpr).unwrap();
    assert!(len > 0);
    monitor.write_fpr(tid, &fpr[..len]).expect("write floating-point registers");

    monitor.stop_monitor();
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_register_value_write_keeps_upper_bytes()
{
    use std::mem::offset_of;

    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();
    let offset = offset_of!(libc::user_regs_struct, r15);

    monitor
        .write_register_value(tid, offset, "r15", &RegisterValue::from_u64(0x1122_3344_5566_7788))
        .unwrap();
    assert_eq!(
        monitor.read_register_value(tid, offset, "r15", 8).unwrap().to_u64(),
        0x1122_3344_5566_7788
    );

    // One byte wide: only the low byte changes.
    monitor
        .write_register_value(tid, offset, "r15b", &RegisterValue::from_bytes(&[0xaa]))
        .unwrap();
    assert_eq!(
        monitor.read_register_value(tid, offset, "r15", 8).unwrap().to_u64(),
        0x1122_3344_5566_77aa
    );
    assert_eq!(monitor.read_register_value(tid, offset, "r15b", 1).unwrap().as_bytes(), &[0xaa]);

    let mut gpr = vec![0u8; std::mem::size_of::<libc::user_regs_struct>()];
    monitor.read_gpr(tid, &mut gpr).unwrap();
    assert_eq!(&gpr[offset..offset + 8], &0x1122_3344_5566_77aau64.to_le_bytes());

    monitor.stop_monitor();
}

/// Body of the threaded debuggee launched by `test_new_thread_reaches_initial_stop`
#[test]
#[ignore = "runs only as a debuggee"]
fn thread_helper_debuggee()
{
    if env::var_os(THREAD_HELPER_ENV).is_none() {
        return;
    }
    thread::spawn(|| thread::sleep(Duration::from_millis(10)))
        .join()
        .expect("helper thread");
}

#[test]
fn test_new_thread_reaches_initial_stop()
{
    let program = env::current_exe().expect("test binary path");
    let mut info = LaunchInfo::new(program)
        .args(["thread_helper_debuggee", "--exact", "--ignored", "--test-threads=1", "--quiet"])
        .stdout("/dev/null")
        .stderr("/dev/null");
    for (key, value) in env::vars_os() {
        info = info.env(key, value);
    }
    let info = info.env(THREAD_HELPER_ENV, "1");

    let (observer, events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(&observer, info, MonitorConfig::default())) else {
        return;
    };
    monitor.resume(monitor.pid().main_thread(), None).unwrap();

    let mut created = Vec::new();
    let code = loop {
        match next_event(&events) {
            ProcessEvent::NewThread { parent, tid } => {
                assert_eq!(monitor.event_message(parent).unwrap(), tid.raw());
                monitor.resume(parent, None).unwrap();
                monitor.wait_for_initial_tid_stop(tid).expect("new thread stops");
                monitor.resume(tid, None).unwrap();
                created.push(tid);
            }
            ProcessEvent::Exited { code, .. } => break code,
            ProcessEvent::Terminated { signal, .. } => panic!("debuggee killed by signal {signal}"),
            ProcessEvent::ThreadExited { .. } => {}
            ProcessEvent::Signal { tid, signal, .. } => monitor.resume(tid, Some(signal)).unwrap(),
            other => {
                if let Some(tid) = other.thread() {
                    monitor.resume(tid, None).unwrap();
                }
            }
        }
    };

    assert_eq!(code, 0);
    assert!(!created.is_empty());
}

#[test]
fn test_attach_missing_process()
{
    let (observer, _events) = event_channel();
    let result = ProcessMonitor::attach(&observer, ProcessId(u32::MAX >> 1), MonitorConfig::default());

    assert!(matches!(result, Err(TetherError::ProcessNotFound(_))));
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_stack_pointer_matches_general_registers()
{
    use std::mem::{offset_of, size_of};

    let (observer, _events) = event_channel();
    let Some(monitor) = started(ProcessMonitor::launch(
        &observer,
        LaunchInfo::new("/bin/sleep").arg("30"),
        MonitorConfig::default(),
    )) else {
        return;
    };
    let tid = monitor.pid().main_thread();

    let offset = offset_of!(libc::user_regs_struct, rsp);
    let rsp = monitor.read_register_value(tid, offset, "rsp", 8).unwrap();

    let mut gpr = vec![0u8; size_of::<libc::user_regs_struct>()];
    let len = monitor.read_gpr(tid, &mut gpr).unwrap();
    assert_eq!(len, gpr.len());
    assert_eq!(&gpr[offset..offset + 8], rsp.as_bytes());
    assert_ne!(rsp.to_u64(), 0);
    // TLS is not set up yet at the first instruction; the read itself must work.
    assert!(monitor.read_thread_pointer(tid).is_ok());
}
