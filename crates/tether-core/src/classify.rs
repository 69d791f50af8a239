//! # Status Classification
//!
//! Turns raw [`WaitReport`]s into [`ProcessEvent`]s.
//!
//! ## Rules
//!
//! | report                                   | outcome                                   |
//! |------------------------------------------|-------------------------------------------|
//! | main thread exited / killed              | `Exited` / `Terminated` (final)           |
//! | other thread exited / killed             | `ThreadExited`                            |
//! | stop, `PTRACE_GETSIGINFO` fails `EINVAL`  | group-stop: resume, nothing reported      |
//! | stop, `PTRACE_GETSIGINFO` fails `ESRCH`   | thread vanished, its exit follows         |
//! | first `SIGSTOP` of a new thread          | initial stop, recorded but not forwarded  |
//! | `SIGTRAP` with a ptrace event            | `NewThread` / `Exec` / `Exiting`          |
//! | `SIGTRAP` with a trap code               | `Trap`                                    |
//! | any other stop                           | `Signal` with origin and fault address    |
//!
//! Every stop is recorded in the [`StopTracker`] before the event is
//! returned, so a client blocked on that thread wakes no later than the
//! observer hears about it.

use std::collections::HashSet;
use std::sync::Arc;

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::channel::CommandChannel;
use crate::error::{Result, TetherError};
use crate::events::{ProcessEvent, SignalOrigin, TrapReason};
use crate::inferior::WaitReport;
use crate::operation::Operation;
use crate::tracker::StopTracker;
use crate::types::{ProcessId, SignalInfo, ThreadId};

/// `si_code` values and ptrace event numbers the classifier understands
pub mod codes
{
    /// Sent by `kill()`
    pub const SI_USER: i32 = 0;
    /// Sent by the kernel
    pub const SI_KERNEL: i32 = 0x80;
    /// Sent by `tkill()`/`tgkill()`
    pub const SI_TKILL: i32 = -6;
    /// Software breakpoint
    pub const TRAP_BRKPT: i32 = 1;
    /// Single-step
    pub const TRAP_TRACE: i32 = 2;
    /// Hardware breakpoint or watchpoint
    pub const TRAP_HWBKPT: i32 = 4;

    /// `PTRACE_EVENT_CLONE`
    pub const PTRACE_EVENT_CLONE: i32 = 3;
    /// `PTRACE_EVENT_EXEC`
    pub const PTRACE_EVENT_EXEC: i32 = 4;
    /// `PTRACE_EVENT_EXIT`
    pub const PTRACE_EVENT_EXIT: i32 = 6;

    /// `si_code` of a ptrace event stop
    pub const fn event_code(event: i32) -> i32
    {
        libc::SIGTRAP | (event << 8)
    }
}

/// Queries the classifier needs while a thread is stopped
///
/// Implemented by [`CommandChannel`], so every query runs on the control
/// thread like any other operation.
pub trait StopInspector
{
    /// `PTRACE_GETSIGINFO`
    fn signal_info(&self, tid: ThreadId) -> Result<SignalInfo>;

    /// `PTRACE_GETEVENTMSG`
    fn event_message(&self, tid: ThreadId) -> Result<u64>;

    /// Continue a thread without reporting anything
    fn resume(&self, tid: ThreadId, signal: Option<i32>) -> Result<()>;
}

impl StopInspector for CommandChannel
{
    fn signal_info(&self, tid: ThreadId) -> Result<SignalInfo>
    {
        self.submit(Operation::GetSignalInfo { tid })?.into_signal_info()
    }

    fn event_message(&self, tid: ThreadId) -> Result<u64>
    {
        self.submit(Operation::GetEventMessage { tid })?.into_event_message()
    }

    fn resume(&self, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        self.submit(Operation::Resume { tid, signal })?.into_unit()
    }
}

/// Outcome of classifying one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification
{
    /// Forward this event to the observer
    Event(ProcessEvent),
    /// First stop of a new thread; recorded, not forwarded
    InitialStop(ThreadId),
    /// Nothing to report
    Nothing,
    /// The control thread is gone; monitoring must end
    Shutdown,
}

/// Stateful classifier owned by the monitor thread
#[derive(Debug)]
pub struct Classifier
{
    pid: ProcessId,
    tracer_pid: u32,
    tracker: Arc<StopTracker>,
    known: HashSet<ThreadId>,
    awaiting_initial_stop: HashSet<ThreadId>,
}

impl Classifier
{
    /// Classifier for `pid`, whose `threads` are already known
    ///
    /// `tracer_pid` is our own process id; signals it sent are reported with
    /// [`SignalOrigin::Tracer`].
    pub fn new(pid: ProcessId, threads: &[ThreadId], tracer_pid: u32, tracker: Arc<StopTracker>) -> Self
    {
        let mut known: HashSet<ThreadId> = threads.iter().copied().collect();
        known.insert(pid.main_thread());
        Self {
            pid,
            tracer_pid,
            tracker,
            known,
            awaiting_initial_stop: HashSet::new(),
        }
    }

    /// Threads currently believed alive
    pub fn known_threads(&self) -> &HashSet<ThreadId>
    {
        &self.known
    }

    /// Classify one report
    pub fn classify(&mut self, report: &WaitReport, inspector: &dyn StopInspector) -> Classification
    {
        if report.exited {
            return Classification::Event(self.classify_exit(report));
        }

        let tid = report.tid;
        let info = match inspector.signal_info(tid) {
            Ok(info) => info,
            Err(TetherError::ChannelClosed) => return Classification::Shutdown,
            Err(err) => return self.unreadable_stop(tid, report, &err, inspector),
        };

        if info.signo == libc::SIGSTOP && (!self.known.contains(&tid) || self.awaiting_initial_stop.contains(&tid)) {
            debug!("Thread {tid} reached its initial stop");
            self.known.insert(tid);
            self.awaiting_initial_stop.remove(&tid);
            self.tracker.record_stop(tid);
            return Classification::InitialStop(tid);
        }

        self.known.insert(tid);
        let event = if info.signo == libc::SIGTRAP {
            match self.classify_trap(tid, &info, inspector) {
                Ok(event) => event,
                Err(TetherError::ChannelClosed) => return Classification::Shutdown,
                Err(err) => {
                    warn!("Could not decode ptrace event of thread {tid}: {err}");
                    signal_event(tid, &info, self.tracer_pid)
                }
            }
        } else {
            signal_event(tid, &info, self.tracer_pid)
        };

        self.tracker.record_stop(tid);
        Classification::Event(event)
    }

    fn classify_exit(&mut self, report: &WaitReport) -> ProcessEvent
    {
        let tid = report.tid;
        self.known.remove(&tid);
        self.awaiting_initial_stop.remove(&tid);
        self.tracker.record_thread_exit(tid);

        if tid == self.pid.main_thread() {
            if report.signal != 0 {
                ProcessEvent::Terminated {
                    pid: self.pid,
                    signal: report.signal,
                }
            } else {
                ProcessEvent::Exited {
                    pid: self.pid,
                    code: report.status,
                }
            }
        } else {
            ProcessEvent::ThreadExited {
                tid,
                code: (report.signal == 0).then_some(report.status),
            }
        }
    }

    fn unreadable_stop(
        &mut self,
        tid: ThreadId,
        report: &WaitReport,
        err: &TetherError,
        inspector: &dyn StopInspector,
    ) -> Classification
    {
        match err.errno() {
            Some(Errno::EINVAL) => {
                // Group-stop: there is no siginfo and nothing to report.
                debug!("Thread {tid} is in group-stop (signal {}), resuming", report.signal);
                match inspector.resume(tid, None) {
                    Ok(()) => Classification::Nothing,
                    Err(TetherError::ChannelClosed) => Classification::Shutdown,
                    Err(err) => {
                        warn!("Failed to resume thread {tid} from group-stop: {err}");
                        Classification::Nothing
                    }
                }
            }
            Some(Errno::ESRCH) => {
                debug!("Thread {tid} vanished before its stop could be inspected");
                Classification::Nothing
            }
            _ => {
                warn!("Failed to inspect stop of thread {tid}: {err}");
                Classification::Nothing
            }
        }
    }

    fn classify_trap(
        &mut self,
        tid: ThreadId,
        info: &SignalInfo,
        inspector: &dyn StopInspector,
    ) -> Result<ProcessEvent>
    {
        let event = match info.code {
            code if code == codes::event_code(codes::PTRACE_EVENT_CLONE) => {
                let child = ThreadId(inspector.event_message(tid)?);
                if self.known.insert(child) {
                    self.tracker.record_new_thread(child);
                    self.awaiting_initial_stop.insert(child);
                }
                ProcessEvent::NewThread { parent: tid, tid: child }
            }
            code if code == codes::event_code(codes::PTRACE_EVENT_EXEC) => {
                let main = self.pid.main_thread();
                for gone in self.known.iter().filter(|known| **known != main) {
                    self.tracker.record_thread_exit(*gone);
                }
                self.known.retain(|known| *known == main);
                self.awaiting_initial_stop.clear();
                ProcessEvent::Exec { tid }
            }
            code if code == codes::event_code(codes::PTRACE_EVENT_EXIT) => ProcessEvent::Exiting {
                tid,
                status: inspector.event_message(tid)?,
            },
            codes::TRAP_BRKPT | codes::SI_KERNEL => ProcessEvent::Trap {
                tid,
                reason: TrapReason::Breakpoint,
            },
            codes::TRAP_TRACE => ProcessEvent::Trap {
                tid,
                reason: TrapReason::Trace,
            },
            codes::TRAP_HWBKPT => ProcessEvent::Trap {
                tid,
                reason: TrapReason::Watchpoint,
            },
            _ => signal_event(tid, info, self.tracer_pid),
        };
        Ok(event)
    }
}

fn signal_event(tid: ThreadId, info: &SignalInfo, tracer_pid: u32) -> ProcessEvent
{
    let origin = if info.code > 0 {
        SignalOrigin::Kernel
    } else {
        match info.sender_pid {
            Some(sender) if sender == tracer_pid => SignalOrigin::Tracer,
            Some(sender) => SignalOrigin::Process(sender),
            None => SignalOrigin::Kernel,
        }
    };

    let faulting = matches!(info.signo, libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE);
    let fault_address = if faulting && origin == SignalOrigin::Kernel {
        info.fault_address
    } else {
        None
    };

    ProcessEvent::Signal {
        tid,
        signal: info.signo,
        origin,
        fault_address,
    }
}

#[cfg(test)]
mod tests
{
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::types::Address;

    const PID: ProcessId = ProcessId(100);
    const TRACER: u32 = 7;

    #[derive(Default)]
    struct FakeInspector
    {
        infos: HashMap<ThreadId, std::result::Result<SignalInfo, Errno>>,
        messages: HashMap<ThreadId, u64>,
        resumed: RefCell<Vec<ThreadId>>,
        closed: bool,
    }

    impl FakeInspector
    {
        fn with_info(mut self, tid: u64, info: SignalInfo) -> Self
        {
            self.infos.insert(ThreadId(tid), Ok(info));
            self
        }

        fn with_error(mut self, tid: u64, errno: Errno) -> Self
        {
            self.infos.insert(ThreadId(tid), Err(errno));
            self
        }

        fn with_message(mut self, tid: u64, message: u64) -> Self
        {
            self.messages.insert(ThreadId(tid), message);
            self
        }
    }

    impl StopInspector for FakeInspector
    {
        fn signal_info(&self, tid: ThreadId) -> Result<SignalInfo>
        {
            if self.closed {
                return Err(TetherError::ChannelClosed);
            }
            match self.infos.get(&tid) {
                Some(Ok(info)) => Ok(*info),
                Some(Err(errno)) => Err(TetherError::control("GetSignalInfo", tid, *errno)),
                None => Err(TetherError::control("GetSignalInfo", tid, Errno::ESRCH)),
            }
        }

        fn event_message(&self, tid: ThreadId) -> Result<u64>
        {
            self.messages
                .get(&tid)
                .copied()
                .ok_or_else(|| TetherError::control("GetEventMessage", tid, Errno::ESRCH))
        }

        fn resume(&self, tid: ThreadId, _signal: Option<i32>) -> Result<()>
        {
            self.resumed.borrow_mut().push(tid);
            Ok(())
        }
    }

    fn classifier() -> (Classifier, Arc<StopTracker>)
    {
        let tracker = Arc::new(StopTracker::with_stopped(&[PID.main_thread()]));
        (Classifier::new(PID, &[PID.main_thread()], TRACER, Arc::clone(&tracker)), tracker)
    }

    fn stop(tid: u64, signal: i32) -> WaitReport
    {
        WaitReport::stopped(ThreadId(tid), signal, 0)
    }

    #[test]
    fn test_main_thread_exit_is_final()
    {
        let (mut classifier, tracker) = classifier();
        let inspector = FakeInspector::default();

        let outcome = classifier.classify(&WaitReport::exited(ThreadId(100), 3), &inspector);
        assert_eq!(outcome, Classification::Event(ProcessEvent::Exited { pid: PID, code: 3 }));

        let outcome = classifier.classify(&WaitReport::killed(ThreadId(100), libc::SIGKILL), &inspector);
        assert_eq!(
            outcome,
            Classification::Event(ProcessEvent::Terminated {
                pid: PID,
                signal: libc::SIGKILL
            })
        );
        assert!(tracker.wait_for_stop_after(ThreadId(100), 1).is_err());
    }

    #[test]
    fn test_other_thread_exit()
    {
        let (mut classifier, _tracker) = classifier();
        let outcome = classifier.classify(&WaitReport::killed(ThreadId(101), libc::SIGKILL), &FakeInspector::default());
        assert_eq!(
            outcome,
            Classification::Event(ProcessEvent::ThreadExited {
                tid: ThreadId(101),
                code: None
            })
        );
    }

    #[test]
    fn test_breakpoint_trace_and_watchpoint()
    {
        let (mut classifier, tracker) = classifier();
        let cases = [
            (codes::TRAP_BRKPT, TrapReason::Breakpoint),
            (codes::SI_KERNEL, TrapReason::Breakpoint),
            (codes::TRAP_TRACE, TrapReason::Trace),
            (codes::TRAP_HWBKPT, TrapReason::Watchpoint),
        ];

        for (code, reason) in cases {
            let inspector = FakeInspector::default().with_info(100, SignalInfo::new(libc::SIGTRAP, code));
            let outcome = classifier.classify(&stop(100, libc::SIGTRAP), &inspector);
            assert_eq!(
                outcome,
                Classification::Event(ProcessEvent::Trap {
                    tid: ThreadId(100),
                    reason
                })
            );
        }
        assert_eq!(tracker.stop_count(ThreadId(100)), 5);
    }

    #[test]
    fn test_clone_then_initial_stop()
    {
        let (mut classifier, tracker) = classifier();
        let clone_code = codes::event_code(codes::PTRACE_EVENT_CLONE);
        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGTRAP, clone_code))
            .with_message(100, 101)
            .with_info(101, SignalInfo::new(libc::SIGSTOP, codes::SI_USER));

        let outcome = classifier.classify(&WaitReport::stopped(ThreadId(100), libc::SIGTRAP, 3), &inspector);
        assert_eq!(
            outcome,
            Classification::Event(ProcessEvent::NewThread {
                parent: ThreadId(100),
                tid: ThreadId(101)
            })
        );
        assert_eq!(tracker.stop_count(ThreadId(101)), 0);

        let outcome = classifier.classify(&stop(101, libc::SIGSTOP), &inspector);
        assert_eq!(outcome, Classification::InitialStop(ThreadId(101)));
        assert_eq!(tracker.stop_count(ThreadId(101)), 1);

        // A later SIGSTOP of the same thread is an ordinary signal stop.
        let outcome = classifier.classify(&stop(101, libc::SIGSTOP), &inspector);
        assert!(matches!(outcome, Classification::Event(ProcessEvent::Signal { .. })));
    }

    #[test]
    fn test_initial_stop_before_clone_event()
    {
        let (mut classifier, _tracker) = classifier();
        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGTRAP, codes::event_code(codes::PTRACE_EVENT_CLONE)))
            .with_message(100, 102)
            .with_info(102, SignalInfo::new(libc::SIGSTOP, codes::SI_USER));

        assert_eq!(
            classifier.classify(&stop(102, libc::SIGSTOP), &inspector),
            Classification::InitialStop(ThreadId(102))
        );
        assert!(matches!(
            classifier.classify(&stop(100, libc::SIGTRAP), &inspector),
            Classification::Event(ProcessEvent::NewThread { .. })
        ));
        // The initial stop was already consumed.
        assert!(matches!(
            classifier.classify(&stop(102, libc::SIGSTOP), &inspector),
            Classification::Event(ProcessEvent::Signal { .. })
        ));
    }

    #[test]
    fn test_recycled_thread_id_is_a_new_thread()
    {
        let (mut classifier, tracker) = classifier();
        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGTRAP, codes::event_code(codes::PTRACE_EVENT_CLONE)))
            .with_message(100, 103)
            .with_info(103, SignalInfo::new(libc::SIGSTOP, codes::SI_USER));

        classifier.classify(&stop(100, libc::SIGTRAP), &inspector);
        classifier.classify(&stop(103, libc::SIGSTOP), &inspector);
        classifier.classify(&WaitReport::exited(ThreadId(103), 0), &inspector);

        // The kernel hands the id to the next clone.
        assert!(matches!(
            classifier.classify(&stop(100, libc::SIGTRAP), &inspector),
            Classification::Event(ProcessEvent::NewThread { .. })
        ));
        assert_eq!(tracker.stop_count(ThreadId(103)), 0);
        assert_eq!(
            classifier.classify(&stop(103, libc::SIGSTOP), &inspector),
            Classification::InitialStop(ThreadId(103))
        );
        assert_eq!(tracker.stop_count(ThreadId(103)), 1);
    }

    #[test]
    fn test_exec_forgets_other_threads()
    {
        let tracker = Arc::new(StopTracker::new());
        let threads = [ThreadId(100), ThreadId(101)];
        let mut classifier = Classifier::new(PID, &threads, TRACER, Arc::clone(&tracker));
        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGTRAP, codes::event_code(codes::PTRACE_EVENT_EXEC)));

        let outcome = classifier.classify(&stop(100, libc::SIGTRAP), &inspector);
        assert_eq!(outcome, Classification::Event(ProcessEvent::Exec { tid: ThreadId(100) }));
        assert_eq!(classifier.known_threads(), &HashSet::from([ThreadId(100)]));
        assert!(matches!(
            tracker.wait_for_stop_after(ThreadId(101), 0),
            Err(TetherError::ThreadExited(_))
        ));
    }

    #[test]
    fn test_exit_event_carries_status()
    {
        let (mut classifier, _tracker) = classifier();
        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGTRAP, codes::event_code(codes::PTRACE_EVENT_EXIT)))
            .with_message(100, 0x0100);

        assert_eq!(
            classifier.classify(&stop(100, libc::SIGTRAP), &inspector),
            Classification::Event(ProcessEvent::Exiting {
                tid: ThreadId(100),
                status: 0x0100
            })
        );
    }

    #[test]
    fn test_signal_origins()
    {
        let (mut classifier, _tracker) = classifier();

        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGSTOP, codes::SI_TKILL).with_sender(TRACER));
        assert_eq!(
            classifier.classify(&stop(100, libc::SIGSTOP), &inspector),
            Classification::Event(ProcessEvent::Signal {
                tid: ThreadId(100),
                signal: libc::SIGSTOP,
                origin: SignalOrigin::Tracer,
                fault_address: None,
            })
        );

        let inspector = FakeInspector::default()
            .with_info(100, SignalInfo::new(libc::SIGUSR1, codes::SI_USER).with_sender(4242));
        assert_eq!(
            classifier.classify(&stop(100, libc::SIGUSR1), &inspector),
            Classification::Event(ProcessEvent::Signal {
                tid: ThreadId(100),
                signal: libc::SIGUSR1,
                origin: SignalOrigin::Process(4242),
                fault_address: None,
            })
        );
    }

    #[test]
    fn test_segfault_reports_fault_address()
    {
        let (mut classifier, _tracker) = classifier();
        let info = SignalInfo::new(libc::SIGSEGV, 1).with_fault_address(Address::from(0xdead_0000));
        let inspector = FakeInspector::default().with_info(100, info);

        assert_eq!(
            classifier.classify(&stop(100, libc::SIGSEGV), &inspector),
            Classification::Event(ProcessEvent::Signal {
                tid: ThreadId(100),
                signal: libc::SIGSEGV,
                origin: SignalOrigin::Kernel,
                fault_address: Some(Address::from(0xdead_0000)),
            })
        );
    }

    #[test]
    fn test_group_stop_is_resumed_silently()
    {
        let (mut classifier, tracker) = classifier();
        let inspector = FakeInspector::default().with_error(100, Errno::EINVAL);

        assert_eq!(classifier.classify(&stop(100, libc::SIGTSTP), &inspector), Classification::Nothing);
        assert_eq!(*inspector.resumed.borrow(), vec![ThreadId(100)]);
        assert_eq!(tracker.stop_count(ThreadId(100)), 1);
    }

    #[test]
    fn test_vanished_thread_reports_nothing()
    {
        let (mut classifier, _tracker) = classifier();
        let inspector = FakeInspector::default().with_error(100, Errno::ESRCH);
        assert_eq!(classifier.classify(&stop(100, libc::SIGTRAP), &inspector), Classification::Nothing);
        assert!(inspector.resumed.borrow().is_empty());
    }

    #[test]
    fn test_closed_channel_shuts_down()
    {
        let (mut classifier, _tracker) = classifier();
        let inspector = FakeInspector {
            closed: true,
            ..FakeInspector::default()
        };
        assert_eq!(classifier.classify(&stop(100, libc::SIGTRAP), &inspector), Classification::Shutdown);
    }
}
