//! # Monitor Thread
//!
//! Watches the debuggee for status changes and reports them.
//!
//! The thread polls its [`WaitSource`] (on Linux, `waitpid` over the
//! debuggee's process group or over each of its threads), hands each report
//! to the [`Classifier`] and delivers the resulting [`ProcessEvent`] to the
//! observer. Delivery is fire-and-forget and follows the order of the
//! reports.
//!
//! ## Ending
//!
//! - The main thread exited or was killed: the command channel is closed
//!   *before* the final event is delivered, so a client reacting to
//!   `Exited`/`Terminated` already sees `ChannelClosed`.
//! - Nothing is left to wait for, or the control thread is gone.
//! - [`ProcessMonitor::stop_monitor`](crate::ProcessMonitor::stop_monitor)
//!   raised the shutdown flag; it is checked between polls.
//!
//! In every case the stop tracker is finished so that blocked waiters wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::channel::CommandChannel;
use crate::classify::{Classification, Classifier};
use crate::config::MonitorConfig;
use crate::error::{Result, TetherError};
use crate::events::{ProcessEvent, ProcessObserver};
use crate::inferior::{WaitOutcome, WaitSource};
use crate::tracker::StopTracker;
use crate::types::ProcessId;

/// Everything the monitor thread owns or shares
pub(crate) struct MonitorContext
{
    pub pid: ProcessId,
    pub waiter: Box<dyn WaitSource + Send>,
    pub classifier: Classifier,
    pub channel: Arc<CommandChannel>,
    pub tracker: Arc<StopTracker>,
    pub observer: Weak<dyn ProcessObserver>,
    pub shutdown: Arc<AtomicBool>,
    pub exited: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

/// Spawn the monitor thread
pub(crate) fn spawn(config: &MonitorConfig, context: MonitorContext) -> Result<JoinHandle<()>>
{
    thread::Builder::new()
        .name(config.monitor_thread_name())
        .spawn(move || run(context))
        .map_err(|source| TetherError::ThreadSpawn { name: "monitor", source })
}

fn run(mut ctx: MonitorContext)
{
    info!("Monitoring process {}", ctx.pid);

    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            debug!("Monitor thread stopping on request");
            break;
        }

        let report = match ctx.waiter.next_status(ctx.classifier.known_threads()) {
            Ok(WaitOutcome::Status(report)) => report,
            Ok(WaitOutcome::Idle) => {
                thread::sleep(ctx.poll_interval);
                continue;
            }
            Ok(WaitOutcome::NoChildren) => {
                info!("No traced threads of process {} left", ctx.pid);
                break;
            }
            Err(err) => {
                warn!("Waiting for process {} failed: {err}", ctx.pid);
                break;
            }
        };
        trace!("Status change: {report:?}");

        match ctx.classifier.classify(&report, ctx.channel.as_ref()) {
            Classification::Event(event) if event.is_final() => {
                info!("{event}");
                ctx.exited.store(true, Ordering::Release);
                ctx.channel.close();
                ctx.tracker.finish();
                deliver(&ctx.observer, event);
                break;
            }
            Classification::Event(event) => {
                debug!("{event}");
                deliver(&ctx.observer, event);
            }
            Classification::InitialStop(tid) => trace!("Initial stop of thread {tid} recorded"),
            Classification::Nothing => {}
            Classification::Shutdown => {
                debug!("Control thread is gone, monitor thread stopping");
                break;
            }
        }
    }

    ctx.tracker.finish();
}

fn deliver(observer: &Weak<dyn ProcessObserver>, event: ProcessEvent)
{
    match observer.upgrade() {
        Some(observer) => observer.send_message(event),
        None => trace!("Observer dropped, discarding: {event}"),
    }
}
