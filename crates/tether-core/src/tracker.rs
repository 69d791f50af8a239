//! Per-thread stop bookkeeping.
//!
//! Only the monitor thread may call `waitpid`, so clients that need to block
//! until a *specific* thread stops ([`stop_thread`], [`wait_for_initial_tid_stop`])
//! wait on this tracker instead. The monitor records every stop here before
//! it forwards the matching event.
//!
//! [`stop_thread`]: crate::ProcessMonitor::stop_thread
//! [`wait_for_initial_tid_stop`]: crate::ProcessMonitor::wait_for_initial_tid_stop

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, TetherError};
use crate::types::ThreadId;

#[derive(Debug, Default)]
struct TrackerState
{
    stops: HashMap<ThreadId, u64>,
    gone: HashSet<ThreadId>,
    finished: bool,
}

/// Counts the stops of every thread and wakes waiters on change
#[derive(Debug, Default)]
pub struct StopTracker
{
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl StopTracker
{
    /// Empty tracker
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Tracker that already saw one stop for each of `threads`
    ///
    /// Used for the threads that were stopped while the debuggee was launched
    /// or attached, before the monitor thread existed.
    pub fn with_stopped(threads: &[ThreadId]) -> Self
    {
        let state = TrackerState {
            stops: threads.iter().map(|tid| (*tid, 1)).collect(),
            ..TrackerState::default()
        };
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState>
    {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record that `tid` entered a stop
    pub fn record_stop(&self, tid: ThreadId)
    {
        let mut state = self.lock();
        *state.stops.entry(tid).or_insert(0) += 1;
        state.gone.remove(&tid);
        self.changed.notify_all();
    }

    /// Record that a new thread now owns `tid`
    ///
    /// Thread ids are recycled, so whatever was recorded for an earlier thread
    /// with the same id is forgotten.
    pub fn record_new_thread(&self, tid: ThreadId)
    {
        let mut state = self.lock();
        state.stops.remove(&tid);
        state.gone.remove(&tid);
    }

    /// Record that `tid` is gone
    pub fn record_thread_exit(&self, tid: ThreadId)
    {
        let mut state = self.lock();
        state.stops.remove(&tid);
        state.gone.insert(tid);
        self.changed.notify_all();
    }

    /// Record that no more stops will ever be reported
    pub fn finish(&self)
    {
        let mut state = self.lock();
        state.finished = true;
        self.changed.notify_all();
    }

    /// Whether [`finish`](Self::finish) has run
    pub fn is_finished(&self) -> bool
    {
        self.lock().finished
    }

    /// Number of stops recorded for `tid` so far
    pub fn stop_count(&self, tid: ThreadId) -> u64
    {
        self.lock().stops.get(&tid).copied().unwrap_or(0)
    }

    /// Block until `tid` has more than `seen` recorded stops
    ///
    /// Fails with [`TetherError::ThreadExited`] if the thread goes away first
    /// and with [`TetherError::ChannelClosed`] once monitoring has ended.
    /// There is no timeout.
    pub fn wait_for_stop_after(&self, tid: ThreadId, seen: u64) -> Result<()>
    {
        let mut state = self.lock();
        loop {
            if state.stops.get(&tid).copied().unwrap_or(0) > seen {
                return Ok(());
            }
            if state.gone.contains(&tid) {
                return Err(TetherError::ThreadExited(tid));
            }
            if state.finished {
                return Err(TetherError::ChannelClosed);
            }
            state = self.changed.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}
