//! # Command Channel
//!
//! One-slot hand-off between client threads and the privileged control
//! thread.
//!
//! ## How it works
//!
//! ```text
//!   client thread                      control thread
//!   ─────────────                      ──────────────
//!   lock submission mutex
//!   send op on "pending"   ────────▶   next(): receive op
//!                                      execute op
//!   block on "done"        ◀────────   complete(reply)
//!   unlock
//! ```
//!
//! Both slots are bounded `sync_channel`s of capacity 1, and the submission
//! mutex is held for the whole round trip, so there is never more than one
//! operation in flight and every reply reaches the client that submitted the
//! operation.
//!
//! Once [`CommandChannel::close`] has run, or once the control thread has gone
//! away, every submission fails fast with
//! [`TetherError::ChannelClosed`](crate::error::TetherError::ChannelClosed).

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Mutex;

use tracing::trace;

use crate::error::{Result, TetherError};
use crate::operation::{Operation, Reply};

struct Submitter
{
    pending: SyncSender<Operation>,
    done: Receiver<Result<Reply>>,
}

/// Client side of the hand-off (the `DoOperation` primitive)
pub struct CommandChannel
{
    submitter: Mutex<Option<Submitter>>,
}

/// Control-thread side of the hand-off
pub struct ControlEndpoint
{
    pending: Receiver<Operation>,
    done: SyncSender<Result<Reply>>,
}

/// Create a connected channel and endpoint pair
pub fn command_channel() -> (CommandChannel, ControlEndpoint)
{
    let (pending_tx, pending_rx) = mpsc::sync_channel(1);
    let (done_tx, done_rx) = mpsc::sync_channel(1);

    let channel = CommandChannel {
        submitter: Mutex::new(Some(Submitter {
            pending: pending_tx,
            done: done_rx,
        })),
    };
    let endpoint = ControlEndpoint {
        pending: pending_rx,
        done: done_tx,
    };
    (channel, endpoint)
}

impl CommandChannel
{
    /// Run `op` on the control thread and wait for its reply
    ///
    /// Concurrent callers are served one at a time, in the order they acquire
    /// the submission mutex.
    pub fn submit(&self, op: Operation) -> Result<Reply>
    {
        let guard = self.submitter.lock().map_err(|_| TetherError::ChannelClosed)?;
        let submitter = guard.as_ref().ok_or(TetherError::ChannelClosed)?;

        trace!("Submitting {}", op.name());
        submitter.pending.send(op).map_err(|_| TetherError::ChannelClosed)?;
        submitter.done.recv().map_err(|_| TetherError::ChannelClosed)?
    }

    /// Refuse further submissions and let the control thread drain
    ///
    /// Waits for an in-flight submission to finish first. Idempotent.
    pub fn close(&self)
    {
        let mut guard = match self.submitter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.take().is_some() {
            trace!("Command channel closed");
        }
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool
    {
        self.submitter.lock().map_or(true, |guard| guard.is_none())
    }
}

impl std::fmt::Debug for CommandChannel
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("CommandChannel").field("closed", &self.is_closed()).finish()
    }
}

impl ControlEndpoint
{
    /// Block until the next operation arrives
    ///
    /// Returns `None` once the client side has been closed or dropped.
    pub fn next(&self) -> Option<Operation>
    {
        self.pending.recv().ok()
    }

    /// Publish the reply to the operation returned by the last [`next`](Self::next)
    ///
    /// Returns `false` if the client side is gone.
    pub fn complete(&self, reply: Result<Reply>) -> bool
    {
        self.done.send(reply).is_ok()
    }
}
