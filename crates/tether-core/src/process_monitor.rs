//! # Process Monitor
//!
//! The public face of the crate: one [`ProcessMonitor`] per debuggee.
//!
//! ## Architecture
//!
//! ```text
//!  client threads ──▶ ProcessMonitor ──submit──▶ control thread ──ptrace──▶ debuggee
//!                           ▲                                                   │
//!                           │ stop tracker                                      │ waitpid
//!                           └──────────────── monitor thread ◀──────────────────┘
//!                                                  │
//!                                                  ▼
//!                                         ProcessObserver::send_message
//! ```
//!
//! Every operation builds an [`Operation`], hands it to the control thread
//! through the command channel and blocks until the reply arrives. The facade
//! itself issues no control calls.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_core::{event_channel, LaunchInfo, MonitorConfig, ProcessMonitor};
//!
//! let (observer, events) = event_channel();
//! let monitor = ProcessMonitor::launch(&observer, LaunchInfo::new("/bin/true"), MonitorConfig::default())?;
//!
//! monitor.resume(monitor.pid().main_thread(), None)?;
//! while let Ok(event) = events.recv() {
//!     println!("{event}");
//!     if event.is_final() {
//!         break;
//!     }
//! }
//! monitor.stop_monitor();
//! # Ok::<(), tether_core::TetherError>(())
//! ```

use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use nix::errno::Errno;
use tracing::{debug, info, warn};

use crate::channel::{command_channel, CommandChannel};
use crate::classify::Classifier;
use crate::config::MonitorConfig;
use crate::control::{self, Startup};
use crate::error::{Result, TetherError};
use crate::events::ProcessObserver;
use crate::inferior::Inferior;
use crate::monitor::{self, MonitorContext};
use crate::operation::{Operation, Reply};
use crate::platform;
use crate::tracker::StopTracker;
use crate::types::{Address, LaunchInfo, ProcessId, RegisterSet, RegisterValue, SignalInfo, ThreadId};

struct MonitorThreads
{
    control: JoinHandle<()>,
    monitor: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

/// Controller of one debuggee
///
/// `ProcessMonitor` is `Send + Sync`; share it between client threads with
/// an `Arc`. Operations from different threads are serviced one at a time,
/// in the order they reach the command channel.
pub struct ProcessMonitor
{
    pid: ProcessId,
    initial_threads: Vec<ThreadId>,
    process: Weak<dyn ProcessObserver>,
    channel: Arc<CommandChannel>,
    tracker: Arc<StopTracker>,
    exited: Arc<AtomicBool>,
    terminal: Mutex<Option<OwnedFd>>,
    threads: Mutex<Option<MonitorThreads>>,
    kill_on_stop: bool,
}

impl ProcessMonitor
{
    /// Launch a debuggee stopped at its first instruction
    ///
    /// Standard streams without a redirection path are connected to a new
    /// pseudo-terminal, available through [`terminal_fd`](Self::terminal_fd).
    /// The main thread is stopped when this returns; call
    /// [`resume`](Self::resume) to let it run.
    ///
    /// ## Errors
    ///
    /// - [`TetherError::SpawnFailed`]: the program could not be started or
    ///   did not stop after `execve`
    /// - [`TetherError::ThreadSpawn`]: the control or monitor thread could
    ///   not be created
    pub fn launch<O>(observer: &Arc<O>, info: LaunchInfo, config: MonitorConfig) -> Result<Self>
    where
        O: ProcessObserver + 'static,
    {
        info!("Launching {}", info.program().display());
        let bootstrap = platform::launch_bootstrap(info)?;
        Self::start(observer, config, bootstrap)
    }

    /// Attach to every thread of a running process
    ///
    /// All threads are stopped when this returns. No terminal is associated
    /// with an attached process.
    ///
    /// ## Errors
    ///
    /// - [`TetherError::ProcessNotFound`]: no such process
    /// - [`TetherError::PermissionDenied`]: ptrace access was refused
    /// - [`TetherError::AttachFailed`]: any other attach failure
    pub fn attach<O>(observer: &Arc<O>, pid: ProcessId, config: MonitorConfig) -> Result<Self>
    where
        O: ProcessObserver + 'static,
    {
        info!("Attaching to process {pid}");
        let bootstrap = platform::attach_bootstrap(pid)?;
        Self::start(observer, config, bootstrap)
    }

    /// Start monitoring with a custom bootstrap
    ///
    /// `bootstrap` runs on the new control thread and must leave the
    /// debuggee's threads stopped under that thread's control. The
    /// [`Inferior`] it returns services every later operation.
    /// [`launch`](Self::launch) and [`attach`](Self::attach) are built on this.
    pub fn start<O, F>(observer: &Arc<O>, config: MonitorConfig, bootstrap: F) -> Result<Self>
    where
        O: ProcessObserver + 'static,
        F: FnOnce(&MonitorConfig) -> Result<(Box<dyn Inferior>, Startup)> + Send + 'static,
    {
        let process: Weak<dyn ProcessObserver> = Arc::downgrade(observer) as Weak<dyn ProcessObserver>;
        let (channel, endpoint) = command_channel();
        let channel = Arc::new(channel);

        let (control, startup) = control::spawn(&config, endpoint, Box::new(bootstrap))?;
        let Startup {
            pid,
            terminal,
            threads,
            waiter,
            launched,
        } = startup;
        debug!("Process {pid} stopped with {} thread(s)", threads.len());

        let tracker = Arc::new(StopTracker::with_stopped(&threads));
        let shutdown = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let context = MonitorContext {
            pid,
            waiter,
            classifier: Classifier::new(pid, &threads, std::process::id(), Arc::clone(&tracker)),
            channel: Arc::clone(&channel),
            tracker: Arc::clone(&tracker),
            observer: process.clone(),
            shutdown: Arc::clone(&shutdown),
            exited: Arc::clone(&exited),
            poll_interval: config.poll_interval,
        };

        let monitor = match monitor::spawn(&config, context) {
            Ok(handle) => handle,
            Err(err) => {
                channel.close();
                let _ = control.join();
                return Err(err);
            }
        };

        Ok(Self {
            pid,
            initial_threads: threads,
            process,
            channel,
            tracker,
            exited,
            terminal: Mutex::new(terminal),
            threads: Mutex::new(Some(MonitorThreads {
                control,
                monitor,
                shutdown,
            })),
            kill_on_stop: launched && config.kill_on_exit,
        })
    }

    /// Submit an operation to the control thread and wait for its reply
    ///
    /// Fails fast with [`TetherError::ChannelClosed`] once the debuggee is
    /// gone or monitoring has stopped.
    pub fn do_operation(&self, op: Operation) -> Result<Reply>
    {
        self.channel.submit(op)
    }

    /// Read debuggee memory into `buf`
    ///
    /// Returns the number of bytes read, which is always `buf.len()`. A read
    /// that stops early fails with [`TetherError::PartialTransfer`] and leaves
    /// the bytes that were read at the start of `buf`; a read that moves
    /// nothing fails with [`TetherError::ControlCall`].
    pub fn read_memory(&self, addr: Address, buf: &mut [u8]) -> Result<usize>
    {
        if buf.is_empty() {
            return Ok(0);
        }

        let transfer = self
            .do_operation(Operation::ReadMemory { addr, len: buf.len() })?
            .into_memory()?;
        let count = transfer.data.len().min(buf.len());
        buf[..count].copy_from_slice(&transfer.data[..count]);
        transfer_result("ReadMemory", count, buf.len(), transfer.failure)
    }

    /// Write `data` into debuggee memory
    ///
    /// Returns the number of bytes written; failures are reported as for
    /// [`read_memory`](Self::read_memory).
    pub fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
    {
        if data.is_empty() {
            return Ok(0);
        }

        let transfer = self
            .do_operation(Operation::WriteMemory {
                addr,
                data: data.to_vec(),
            })?
            .into_memory()?;
        transfer_result("WriteMemory", transfer.len(), data.len(), transfer.failure)
    }

    /// Read one register at `offset` in the thread's user area
    pub fn read_register_value(&self, tid: ThreadId, offset: usize, name: &str, size: usize) -> Result<RegisterValue>
    {
        self.do_operation(Operation::ReadRegisterValue {
            tid,
            offset,
            name: name.to_string(),
            size,
        })?
        .into_register()
    }

    /// Write one register at `offset` in the thread's user area
    pub fn write_register_value(&self, tid: ThreadId, offset: usize, name: &str, value: &RegisterValue) -> Result<()>
    {
        self.do_operation(Operation::WriteRegisterValue {
            tid,
            offset,
            name: name.to_string(),
            value: value.clone(),
        })?
        .into_unit()
    }

    /// Read the general-purpose registers into `buf`, returning the size of the set
    pub fn read_gpr(&self, tid: ThreadId, buf: &mut [u8]) -> Result<usize>
    {
        self.read_register_set(tid, buf, RegisterSet::General)
    }

    /// Replace the general-purpose registers
    pub fn write_gpr(&self, tid: ThreadId, buf: &[u8]) -> Result<()>
    {
        self.write_register_set(tid, buf, RegisterSet::General)
    }

    /// Read the floating-point registers into `buf`, returning the size of the set
    pub fn read_fpr(&self, tid: ThreadId, buf: &mut [u8]) -> Result<usize>
    {
        self.read_register_set(tid, buf, RegisterSet::FloatingPoint)
    }

    /// Replace the floating-point registers
    pub fn write_fpr(&self, tid: ThreadId, buf: &[u8]) -> Result<()>
    {
        self.write_register_set(tid, buf, RegisterSet::FloatingPoint)
    }

    /// Read a register set into `buf`
    ///
    /// The buffer layout belongs to the caller. Returns how many bytes the
    /// kernel filled in, which may be less than `buf.len()`.
    pub fn read_register_set(&self, tid: ThreadId, buf: &mut [u8], set: RegisterSet) -> Result<usize>
    {
        let bytes = self
            .do_operation(Operation::ReadRegisterSet {
                tid,
                set,
                size: buf.len(),
            })?
            .into_bytes()?;
        let count = bytes.len().min(buf.len());
        buf[..count].copy_from_slice(&bytes[..count]);
        Ok(count)
    }

    /// Replace a register set with the contents of `buf`
    pub fn write_register_set(&self, tid: ThreadId, buf: &[u8], set: RegisterSet) -> Result<()>
    {
        self.do_operation(Operation::WriteRegisterSet {
            tid,
            set,
            data: buf.to_vec(),
        })?
        .into_unit()
    }

    /// Thread-local storage base of a thread
    pub fn read_thread_pointer(&self, tid: ThreadId) -> Result<Address>
    {
        self.do_operation(Operation::ReadThreadPointer { tid })?.into_address()
    }

    /// Signal information of a stopped thread
    pub fn signal_info(&self, tid: ThreadId) -> Result<SignalInfo>
    {
        self.do_operation(Operation::GetSignalInfo { tid })?.into_signal_info()
    }

    /// Message of the last ptrace event of a thread (e.g. the new tid after a clone)
    pub fn event_message(&self, tid: ThreadId) -> Result<u64>
    {
        self.do_operation(Operation::GetEventMessage { tid })?.into_event_message()
    }

    /// Continue a stopped thread, delivering `signal` if given
    pub fn resume(&self, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        self.do_operation(Operation::Resume { tid, signal })?.into_unit()
    }

    /// Execute one instruction of a stopped thread, delivering `signal` if given
    pub fn single_step(&self, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        self.do_operation(Operation::SingleStep { tid, signal })?.into_unit()
    }

    /// Forcibly terminate the debuggee
    ///
    /// The monitor thread reports the termination afterwards.
    pub fn kill(&self) -> Result<()>
    {
        self.do_operation(Operation::Kill)?.into_unit()
    }

    /// Stop tracing a thread and let it run
    pub fn detach(&self, tid: ThreadId) -> Result<()>
    {
        self.do_operation(Operation::Detach { tid })?.into_unit()
    }

    /// Stop a running thread and wait until the stop is observed
    ///
    /// The stop is reported to the observer like any other signal stop
    /// (`SIGSTOP` sent by the tracer). If the thread is already stopped, the
    /// call blocks until it is resumed and stops again.
    pub fn stop_thread(&self, tid: ThreadId) -> Result<()>
    {
        let seen = self.tracker.stop_count(tid);
        self.do_operation(Operation::StopThread { tid })?.into_unit()?;
        self.tracker.wait_for_stop_after(tid, seen)
    }

    /// Block until a thread announced by a `NewThread` event reaches its first stop
    ///
    /// Returns immediately if the stop was already observed. Must not be
    /// called from inside [`ProcessObserver::send_message`].
    pub fn wait_for_initial_tid_stop(&self, tid: ThreadId) -> Result<()>
    {
        self.tracker.wait_for_stop_after(tid, 0)
    }

    /// Tear down both threads and release the terminal
    ///
    /// A launched debuggee that is still alive is killed (unless
    /// [`MonitorConfig::kill_on_exit`] is off) and reaped; an attached one is
    /// left to run. Calling this again does nothing. Must not race with an
    /// operation in flight on another thread.
    pub fn stop_monitor(&self)
    {
        let Some(threads) = lock(&self.threads).take() else {
            return;
        };
        info!("Stopping monitor of process {}", self.pid);

        threads.shutdown.store(true, Ordering::Release);
        if threads.monitor.join().is_err() {
            warn!("Monitor thread panicked");
        }

        let still_running = !self.exited.load(Ordering::Acquire);
        if self.kill_on_stop && still_running {
            if let Err(err) = platform::kill_process(self.pid) {
                debug!("Process {} could not be killed: {err}", self.pid);
            }
        }

        self.channel.close();
        if threads.control.join().is_err() {
            warn!("Control thread panicked");
        }
        self.tracker.finish();

        if self.kill_on_stop && still_running {
            platform::reap_process(self.pid);
        }

        if lock(&self.terminal).take().is_some() {
            debug!("Terminal of process {} closed", self.pid);
        }
    }

    /// Process id of the debuggee
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Threads that were stopped when monitoring started
    pub fn initial_threads(&self) -> &[ThreadId]
    {
        &self.initial_threads
    }

    /// The owning debugger-process model, if it is still alive
    pub fn process(&self) -> Option<Arc<dyn ProcessObserver>>
    {
        self.process.upgrade()
    }

    /// Pseudo-terminal master of a launched debuggee
    ///
    /// `None` for attached processes and after [`stop_monitor`](Self::stop_monitor).
    /// The descriptor stays owned by the monitor.
    pub fn terminal_fd(&self) -> Option<RawFd>
    {
        lock(&self.terminal).as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Independent handle to the terminal, for reading the debuggee's output
    pub fn terminal(&self) -> Result<Option<File>>
    {
        let guard = lock(&self.terminal);
        match guard.as_ref() {
            Some(fd) => Ok(Some(File::from(fd.try_clone()?))),
            None => Ok(None),
        }
    }

    /// Whether the monitor has seen the debuggee exit or get killed
    pub fn has_exited(&self) -> bool
    {
        self.exited.load(Ordering::Acquire)
    }
}

impl Drop for ProcessMonitor
{
    fn drop(&mut self)
    {
        self.stop_monitor();
    }
}

impl std::fmt::Debug for ProcessMonitor
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ProcessMonitor")
            .field("pid", &self.pid)
            .field("terminal", &self.terminal_fd())
            .field("exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T>
{
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn transfer_result(
    operation: &'static str,
    transferred: usize,
    requested: usize,
    failure: Option<Errno>,
) -> Result<usize>
{
    match failure {
        None => Ok(transferred),
        Some(errno) if transferred == 0 => Err(TetherError::ControlCall {
            operation,
            tid: None,
            errno,
        }),
        Some(errno) => Err(TetherError::PartialTransfer {
            transferred,
            requested,
            errno,
        }),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_full_transfer()
    {
        assert_eq!(transfer_result("ReadMemory", 16, 16, None).unwrap(), 16);
    }

    #[test]
    fn test_empty_transfer_is_control_failure()
    {
        let err = transfer_result("ReadMemory", 0, 16, Some(Errno::EIO)).unwrap_err();
        assert!(matches!(
            err,
            TetherError::ControlCall {
                operation: "ReadMemory",
                errno: Errno::EIO,
                ..
            }
        ));
    }

    #[test]
    fn test_partial_transfer_keeps_count()
    {
        let err = transfer_result("WriteMemory", 8, 16, Some(Errno::EFAULT)).unwrap_err();
        assert!(matches!(
            err,
            TetherError::PartialTransfer {
                transferred: 8,
                requested: 16,
                errno: Errno::EFAULT
            }
        ));
    }
}
