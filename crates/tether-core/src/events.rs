//! Process events and the observer that receives them.
//!
//! The monitor thread turns every status change reported by `waitpid` into a
//! [`ProcessEvent`] and hands it to the owning debugger-process model through
//! [`ProcessObserver::send_message`]. Delivery is fire-and-forget: the
//! monitor never waits for the observer, and events for one process arrive in
//! the order the kernel reported them.

use std::fmt;
use std::sync::{mpsc, Arc};

use crate::types::{Address, ProcessId, ThreadId};

/// Why a thread stopped on `SIGTRAP`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason
{
    /// Software breakpoint (`TRAP_BRKPT` or `SI_KERNEL` for `int3`)
    Breakpoint,
    /// Single-step completed (`TRAP_TRACE`)
    Trace,
    /// Hardware breakpoint or watchpoint (`TRAP_HWBKPT`)
    Watchpoint,
}

/// Who raised a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrigin
{
    /// Sent by this process, e.g. the `SIGSTOP` of [`stop_thread`](crate::ProcessMonitor::stop_thread)
    Tracer,
    /// Sent by another process with `kill`, `tgkill` or `sigqueue`
    Process(u32),
    /// Raised by the kernel (faults, timers, pipes, ...)
    Kernel,
}

/// Event emitted by the monitor thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent
{
    /// A thread halted on a synchronous trap
    Trap
    {
        /// Trapping thread
        tid: ThreadId,
        /// Kind of trap
        reason: TrapReason,
    },
    /// A thread stopped because a signal is about to be delivered
    ///
    /// Resume the thread with `Some(signal)` to let the signal through, or
    /// with `None` to suppress it.
    Signal
    {
        /// Stopped thread
        tid: ThreadId,
        /// Signal number
        signal: i32,
        /// Sender of the signal
        origin: SignalOrigin,
        /// Faulting address for kernel-raised SIGSEGV, SIGBUS, SIGILL, SIGFPE
        fault_address: Option<Address>,
    },
    /// A thread was created by `clone()`
    ///
    /// The parent is stopped; the new thread stops separately, see
    /// [`wait_for_initial_tid_stop`](crate::ProcessMonitor::wait_for_initial_tid_stop).
    NewThread
    {
        /// Thread that called `clone()`
        parent: ThreadId,
        /// The new thread
        tid: ThreadId,
    },
    /// A thread completed `execve()`
    Exec
    {
        /// Thread that executed the new image (now the thread-group leader)
        tid: ThreadId,
    },
    /// A thread is about to exit (`PTRACE_EVENT_EXIT`, only with
    /// [`MonitorConfig::trace_exit`](crate::MonitorConfig))
    Exiting
    {
        /// Exiting thread
        tid: ThreadId,
        /// Raw wait status the thread will exit with
        status: u64,
    },
    /// A non-leader thread was reaped
    ThreadExited
    {
        /// Thread that exited
        tid: ThreadId,
        /// Exit code, or `None` if it was killed by a signal
        code: Option<i32>,
    },
    /// The process exited normally; monitoring has stopped
    Exited
    {
        /// Debuggee
        pid: ProcessId,
        /// Exit code
        code: i32,
    },
    /// The process was killed by a signal; monitoring has stopped
    Terminated
    {
        /// Debuggee
        pid: ProcessId,
        /// Terminating signal
        signal: i32,
    },
}

impl ProcessEvent
{
    /// Thread the event is about, if it concerns a single thread
    pub fn thread(&self) -> Option<ThreadId>
    {
        match self {
            Self::Trap { tid, .. }
            | Self::Signal { tid, .. }
            | Self::NewThread { parent: tid, .. }
            | Self::Exec { tid }
            | Self::Exiting { tid, .. }
            | Self::ThreadExited { tid, .. } => Some(*tid),
            Self::Exited { .. } | Self::Terminated { .. } => None,
        }
    }

    /// Whether the reporting thread is now in a ptrace-stop and waits to be resumed
    pub fn is_stop(&self) -> bool
    {
        matches!(
            self,
            Self::Trap { .. } | Self::Signal { .. } | Self::NewThread { .. } | Self::Exec { .. } | Self::Exiting { .. }
        )
    }

    /// Whether the event ends monitoring of the whole process
    pub fn is_final(&self) -> bool
    {
        matches!(self, Self::Exited { .. } | Self::Terminated { .. })
    }
}

impl fmt::Display for ProcessEvent
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Trap { tid, reason } => {
                let what = match reason {
                    TrapReason::Breakpoint => "Hit breakpoint",
                    TrapReason::Trace => "Single-step completed",
                    TrapReason::Watchpoint => "Hit hardware breakpoint",
                };
                write!(f, "{what} (thread {tid})")
            }
            Self::Signal {
                tid,
                signal,
                origin,
                fault_address,
            } => {
                write!(f, "Stopped by {} (thread {tid}", signal_name(*signal))?;
                match origin {
                    SignalOrigin::Tracer => write!(f, ", sent by debugger")?,
                    SignalOrigin::Process(pid) => write!(f, ", sent by pid {pid}")?,
                    SignalOrigin::Kernel => {}
                }
                if let Some(address) = fault_address {
                    write!(f, ", fault at {address}")?;
                }
                write!(f, ")")
            }
            Self::NewThread { parent, tid } => write!(f, "Thread {parent} created thread {tid}"),
            Self::Exec { tid } => write!(f, "Thread {tid} executed a new image"),
            Self::Exiting { tid, status } => write!(f, "Thread {tid} is exiting (status 0x{status:x})"),
            Self::ThreadExited { tid, code: Some(code) } => write!(f, "Thread {tid} exited with code {code}"),
            Self::ThreadExited { tid, code: None } => write!(f, "Thread {tid} was killed"),
            Self::Exited { pid, code } => write!(f, "Process {pid} exited with code: {code}"),
            Self::Terminated { pid, signal } => write!(f, "Process {pid} terminated by {}", signal_name(*signal)),
        }
    }
}

/// Symbolic name of a signal number, falling back to the number itself
pub fn signal_name(signal: i32) -> String
{
    nix::sys::signal::Signal::try_from(signal)
        .map_or_else(|_| format!("signal {signal}"), |sig| sig.as_str().to_string())
}

/// Receiver of monitor events: the owning debugger-process model
///
/// Implementations must return quickly and must not call back into the
/// monitor's blocking waits from inside `send_message`; the monitor thread
/// is the one that would have to wake them.
pub trait ProcessObserver: Send + Sync
{
    /// Deliver one event
    fn send_message(&self, event: ProcessEvent);
}

impl<F> ProcessObserver for F
where
    F: Fn(ProcessEvent) + Send + Sync,
{
    fn send_message(&self, event: ProcessEvent)
    {
        self(event);
    }
}

/// Sender side of the process event channel.
pub type ProcessEventSender = mpsc::Sender<ProcessEvent>;
/// Receiver side of the process event channel.
pub type ProcessEventReceiver = mpsc::Receiver<ProcessEvent>;

/// Observer that forwards every event into an unbounded `mpsc` channel
#[derive(Debug)]
pub struct ChannelObserver
{
    sender: ProcessEventSender,
}

impl ChannelObserver
{
    /// Wrap an existing sender
    pub fn new(sender: ProcessEventSender) -> Self
    {
        Self { sender }
    }
}

impl ProcessObserver for ChannelObserver
{
    fn send_message(&self, event: ProcessEvent)
    {
        // A dropped receiver only means nobody listens any more.
        let _ = self.sender.send(event);
    }
}

/// Create an observer backed by a process event channel.
///
/// Keep the returned `Arc` alive for as long as events should be delivered;
/// the monitor only holds a weak reference to it.
#[must_use]
pub fn event_channel() -> (Arc<ChannelObserver>, ProcessEventReceiver)
{
    let (sender, receiver) = mpsc::channel();
    (Arc::new(ChannelObserver::new(sender)), receiver)
}
