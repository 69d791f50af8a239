//! Decoded `siginfo_t`.

use super::Address;

/// The fields of a `siginfo_t` that the monitor and callers care about
///
/// Only the fields that are meaningful for the given `signo`/`code` pair are
/// populated: the sender is known for user-sent signals, the fault address
/// for synchronous faults.
///
/// ```rust
/// use tether_core::types::{Address, SignalInfo};
///
/// let info = SignalInfo::new(11, 1).with_fault_address(Address::from(0x10));
/// assert_eq!(info.signo, 11);
/// assert_eq!(info.fault_address, Some(Address::from(0x10)));
/// assert_eq!(info.sender_pid, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo
{
    /// Signal number (`si_signo`)
    pub signo: i32,
    /// Signal code (`si_code`); for ptrace event stops this is
    /// `SIGTRAP | (event << 8)`
    pub code: i32,
    /// Associated errno (`si_errno`), usually zero
    pub errno: i32,
    /// Process that sent the signal (`si_pid`), for `kill`/`tgkill`/`sigqueue`
    pub sender_pid: Option<u32>,
    /// Faulting address (`si_addr`), for SIGSEGV, SIGBUS, SIGILL, SIGFPE and SIGTRAP
    pub fault_address: Option<Address>,
}

impl SignalInfo
{
    /// Create an info record with only the signal number and code set
    pub const fn new(signo: i32, code: i32) -> Self
    {
        Self {
            signo,
            code,
            errno: 0,
            sender_pid: None,
            fault_address: None,
        }
    }

    /// Set the sending process
    #[must_use]
    pub const fn with_sender(mut self, pid: u32) -> Self
    {
        self.sender_pid = Some(pid);
        self
    }

    /// Set the faulting address
    #[must_use]
    pub const fn with_fault_address(mut self, address: Address) -> Self
    {
        self.fault_address = Some(address);
        self
    }

    /// Set `si_errno`
    #[must_use]
    pub const fn with_errno(mut self, errno: i32) -> Self
    {
        self.errno = errno;
        self
    }
}
