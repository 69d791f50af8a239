//! # Privileged Control Thread
//!
//! The one thread that may issue control calls against the debuggee.
//!
//! ## Lifecycle
//!
//! 1. **Bootstrap**: the launch or attach runs first, on this thread, so the
//!    kernel records it as the tracer. Its outcome is reported through a
//!    one-shot startup slot.
//! 2. **Service loop**: receive an operation from the
//!    [`ControlEndpoint`], execute it on the [`Inferior`], publish the reply,
//!    repeat. A failed control call is written into the reply and the loop
//!    keeps going.
//! 3. **Exit**: the loop ends once the client side of the command channel is
//!    closed. The kernel then detaches every tracee of this thread (and kills
//!    launched ones when `PTRACE_O_EXITKILL` is set).

use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace};

use crate::channel::ControlEndpoint;
use crate::config::MonitorConfig;
use crate::error::{Result, TetherError};
use crate::inferior::{Inferior, WaitSource};
use crate::types::{ProcessId, ThreadId};

/// What a successful bootstrap hands back to the facade
pub struct Startup
{
    /// The debuggee
    pub pid: ProcessId,
    /// Pseudo-terminal master, for launched debuggees
    pub terminal: Option<OwnedFd>,
    /// Threads that are stopped under our control right now
    pub threads: Vec<ThreadId>,
    /// Status source for the monitor thread
    pub waiter: Box<dyn WaitSource + Send>,
    /// Whether the debuggee was created by us
    pub launched: bool,
}

impl std::fmt::Debug for Startup
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Startup")
            .field("pid", &self.pid)
            .field("terminal", &self.terminal)
            .field("threads", &self.threads)
            .field("launched", &self.launched)
            .finish_non_exhaustive()
    }
}

/// Startup routine executed on the control thread before the service loop
pub type Bootstrap = Box<dyn FnOnce(&MonitorConfig) -> Result<(Box<dyn Inferior>, Startup)> + Send>;

/// Spawn the control thread and wait for its bootstrap to finish
///
/// On failure the thread has already exited and been joined.
pub(crate) fn spawn(
    config: &MonitorConfig,
    endpoint: ControlEndpoint,
    bootstrap: Bootstrap,
) -> Result<(JoinHandle<()>, Startup)>
{
    let (startup_tx, startup_rx) = mpsc::sync_channel::<Result<Startup>>(1);
    let thread_config = config.clone();

    let handle = thread::Builder::new()
        .name(config.control_thread_name())
        .spawn(move || {
            let inferior = match bootstrap(&thread_config) {
                Ok((inferior, startup)) => {
                    if startup_tx.send(Ok(startup)).is_err() {
                        return;
                    }
                    inferior
                }
                Err(err) => {
                    let _ = startup_tx.send(Err(err));
                    return;
                }
            };
            serve(inferior, &endpoint);
        })
        .map_err(|source| TetherError::ThreadSpawn { name: "control", source })?;

    let startup = startup_rx.recv().unwrap_or(Err(TetherError::ChannelClosed));
    match startup {
        Ok(startup) => Ok((handle, startup)),
        Err(err) => {
            let _ = handle.join();
            Err(err)
        }
    }
}

fn serve(mut inferior: Box<dyn Inferior>, endpoint: &ControlEndpoint)
{
    debug!("Control thread ready");
    let mut serviced = 0u64;

    while let Some(op) = endpoint.next() {
        let reply = inferior.execute(&op);
        match &reply {
            Ok(_) => trace!("{} completed", op.name()),
            Err(err) => debug!("{} failed: {err}", op.name()),
        }
        serviced += 1;
        if !endpoint.complete(reply) {
            break;
        }
    }

    info!("Control thread exiting after {serviced} operations");
}
