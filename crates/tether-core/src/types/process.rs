//! Process and thread identifiers.

use std::fmt;

use nix::unistd::Pid;

/// Process identifier (PID) of the debuggee
///
/// On Linux the PID is also the thread id of the thread-group leader, so a
/// `ProcessId` converts losslessly into the [`ThreadId`] of the main thread.
///
/// ## Example
///
/// ```rust
/// use tether_core::types::{ProcessId, ThreadId};
///
/// let pid = ProcessId::from(12345);
/// assert_eq!(pid.main_thread(), ThreadId::from(12345));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// Thread id of the thread-group leader
    pub const fn main_thread(self) -> ThreadId
    {
        ThreadId(self.0 as u64)
    }

    /// Convert into the `nix` representation used by the Linux backend
    pub fn as_pid(self) -> Pid
    {
        Pid::from_raw(self.0 as i32)
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl From<Pid> for ProcessId
{
    fn from(pid: Pid) -> Self
    {
        ProcessId(pid.as_raw() as u32)
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// On Linux this is the kernel TID (`gettid()`), which is what every
/// `ptrace` request addresses. It is stored as a `u64` so that the public
/// types stay platform-neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    ///
    /// ```rust
    /// use tether_core::types::ThreadId;
    ///
    /// let thread = ThreadId::from(12345);
    /// assert_eq!(thread.raw(), 12345);
    /// ```
    pub fn raw(&self) -> u64
    {
        self.0
    }

    /// Convert into the `nix` representation used by the Linux backend
    pub fn as_pid(self) -> Pid
    {
        Pid::from_raw(self.0 as i32)
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl From<Pid> for ThreadId
{
    fn from(pid: Pid) -> Self
    {
        Self(pid.as_raw() as u64)
    }
}

impl From<ProcessId> for ThreadId
{
    fn from(pid: ProcessId) -> Self
    {
        pid.main_thread()
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}
