//! # Operations
//!
//! The closed set of privileged actions a client can ask the control thread
//! to perform, and the replies it sends back.
//!
//! An [`Operation`] is built by the facade on the client's thread, moved
//! through the [command channel](crate::channel) and executed exactly once by
//! the [`Inferior`](crate::inferior::Inferior) on the control thread. Its
//! [`Reply`] travels back the same way.

use nix::errno::Errno;

use crate::error::{Result, TetherError};
use crate::types::{Address, RegisterSet, RegisterValue, SignalInfo, ThreadId};

/// One privileged action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation
{
    /// Read `len` bytes of debuggee memory
    ReadMemory
    {
        /// Start address
        addr: Address,
        /// Number of bytes
        len: usize,
    },
    /// Write bytes into debuggee memory
    WriteMemory
    {
        /// Start address
        addr: Address,
        /// Bytes to store
        data: Vec<u8>,
    },
    /// Read one register from the thread's user area
    ReadRegisterValue
    {
        /// Target thread
        tid: ThreadId,
        /// Byte offset in the user area
        offset: usize,
        /// Register name, for diagnostics only
        name: String,
        /// Width of the register in bytes
        size: usize,
    },
    /// Write one register in the thread's user area
    WriteRegisterValue
    {
        /// Target thread
        tid: ThreadId,
        /// Byte offset in the user area
        offset: usize,
        /// Register name, for diagnostics only
        name: String,
        /// New value
        value: RegisterValue,
    },
    /// Read a whole register set into a buffer of at most `size` bytes
    ReadRegisterSet
    {
        /// Target thread
        tid: ThreadId,
        /// Register set
        set: RegisterSet,
        /// Capacity of the caller's buffer
        size: usize,
    },
    /// Replace a whole register set
    WriteRegisterSet
    {
        /// Target thread
        tid: ThreadId,
        /// Register set
        set: RegisterSet,
        /// Raw register set contents
        data: Vec<u8>,
    },
    /// Read the TLS base of a thread
    ReadThreadPointer
    {
        /// Target thread
        tid: ThreadId,
    },
    /// Fetch the `siginfo_t` of the signal that stopped a thread
    GetSignalInfo
    {
        /// Target thread
        tid: ThreadId,
    },
    /// Fetch the message of the last ptrace event (`PTRACE_GETEVENTMSG`)
    GetEventMessage
    {
        /// Target thread
        tid: ThreadId,
    },
    /// Continue a stopped thread, optionally delivering a signal
    Resume
    {
        /// Target thread
        tid: ThreadId,
        /// Signal to deliver, `None` to suppress
        signal: Option<i32>,
    },
    /// Execute one instruction, optionally delivering a signal
    SingleStep
    {
        /// Target thread
        tid: ThreadId,
        /// Signal to deliver, `None` to suppress
        signal: Option<i32>,
    },
    /// Kill the whole debuggee
    Kill,
    /// Stop tracing a thread and let it run
    Detach
    {
        /// Target thread
        tid: ThreadId,
    },
    /// Send `SIGSTOP` to a single thread (`tgkill`)
    StopThread
    {
        /// Target thread
        tid: ThreadId,
    },
}

impl Operation
{
    /// Short name used in logs and errors
    pub const fn name(&self) -> &'static str
    {
        match self {
            Operation::ReadMemory { .. } => "ReadMemory",
            Operation::WriteMemory { .. } => "WriteMemory",
            Operation::ReadRegisterValue { .. } => "ReadRegisterValue",
            Operation::WriteRegisterValue { .. } => "WriteRegisterValue",
            Operation::ReadRegisterSet { .. } => "ReadRegisterSet",
            Operation::WriteRegisterSet { .. } => "WriteRegisterSet",
            Operation::ReadThreadPointer { .. } => "ReadThreadPointer",
            Operation::GetSignalInfo { .. } => "GetSignalInfo",
            Operation::GetEventMessage { .. } => "GetEventMessage",
            Operation::Resume { .. } => "Resume",
            Operation::SingleStep { .. } => "SingleStep",
            Operation::Kill => "Kill",
            Operation::Detach { .. } => "Detach",
            Operation::StopThread { .. } => "StopThread",
        }
    }

    /// Thread the operation addresses, if it addresses one
    pub const fn thread(&self) -> Option<ThreadId>
    {
        match self {
            Operation::ReadMemory { .. } | Operation::WriteMemory { .. } | Operation::Kill => None,
            Operation::ReadRegisterValue { tid, .. }
            | Operation::WriteRegisterValue { tid, .. }
            | Operation::ReadRegisterSet { tid, .. }
            | Operation::WriteRegisterSet { tid, .. }
            | Operation::ReadThreadPointer { tid }
            | Operation::GetSignalInfo { tid }
            | Operation::GetEventMessage { tid }
            | Operation::Resume { tid, .. }
            | Operation::SingleStep { tid, .. }
            | Operation::Detach { tid }
            | Operation::StopThread { tid } => Some(*tid),
        }
    }
}

/// Result of a memory transfer
///
/// `data` holds the bytes actually read; writes only count what they moved
/// and leave it empty. `failure` is the error that ended the transfer early,
/// if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryTransfer
{
    /// Bytes read
    pub data: Vec<u8>,
    /// Number of bytes transferred
    pub transferred: usize,
    /// Error that stopped the transfer before the requested length
    pub failure: Option<Errno>,
}

impl MemoryTransfer
{
    /// A read that returned everything it was asked for
    pub fn complete(data: Vec<u8>) -> Self
    {
        Self {
            transferred: data.len(),
            data,
            failure: None,
        }
    }

    /// A read that stopped after `data` because of `errno`
    pub fn partial(data: Vec<u8>, errno: Errno) -> Self
    {
        Self {
            transferred: data.len(),
            data,
            failure: Some(errno),
        }
    }

    /// A write of `count` bytes, cut short by `failure` if set
    pub fn written(count: usize, failure: Option<Errno>) -> Self
    {
        Self {
            data: Vec::new(),
            transferred: count,
            failure,
        }
    }

    /// Number of bytes transferred
    pub fn len(&self) -> usize
    {
        self.transferred
    }

    /// Whether nothing was transferred
    pub fn is_empty(&self) -> bool
    {
        self.transferred == 0
    }
}

/// Successful outcome of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply
{
    /// Nothing to report
    Unit,
    /// Memory read or write
    Memory(MemoryTransfer),
    /// Register set contents
    Bytes(Vec<u8>),
    /// Single register value
    Register(RegisterValue),
    /// An address (thread pointer)
    Address(Address),
    /// Decoded `siginfo_t`
    SignalInfo(SignalInfo),
    /// `PTRACE_GETEVENTMSG` value
    EventMessage(u64),
}

impl Reply
{
    /// Expect [`Reply::Unit`]
    pub fn into_unit(self) -> Result<()>
    {
        match self {
            Reply::Unit => Ok(()),
            _ => Err(TetherError::UnexpectedReply { expected: "unit" }),
        }
    }

    /// Expect [`Reply::Memory`]
    pub fn into_memory(self) -> Result<MemoryTransfer>
    {
        match self {
            Reply::Memory(transfer) => Ok(transfer),
            _ => Err(TetherError::UnexpectedReply { expected: "memory" }),
        }
    }

    /// Expect [`Reply::Bytes`]
    pub fn into_bytes(self) -> Result<Vec<u8>>
    {
        match self {
            Reply::Bytes(bytes) => Ok(bytes),
            _ => Err(TetherError::UnexpectedReply { expected: "bytes" }),
        }
    }

    /// Expect [`Reply::Register`]
    pub fn into_register(self) -> Result<RegisterValue>
    {
        match self {
            Reply::Register(value) => Ok(value),
            _ => Err(TetherError::UnexpectedReply { expected: "register" }),
        }
    }

    /// Expect [`Reply::Address`]
    pub fn into_address(self) -> Result<Address>
    {
        match self {
            Reply::Address(address) => Ok(address),
            _ => Err(TetherError::UnexpectedReply { expected: "address" }),
        }
    }

    /// Expect [`Reply::SignalInfo`]
    pub fn into_signal_info(self) -> Result<SignalInfo>
    {
        match self {
            Reply::SignalInfo(info) => Ok(info),
            _ => Err(TetherError::UnexpectedReply { expected: "signal info" }),
        }
    }

    /// Expect [`Reply::EventMessage`]
    pub fn into_event_message(self) -> Result<u64>
    {
        match self {
            Reply::EventMessage(message) => Ok(message),
            _ => Err(TetherError::UnexpectedReply {
                expected: "event message",
            }),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_operation_thread()
    {
        let tid = ThreadId(42);
        assert_eq!(Operation::Resume { tid, signal: None }.thread(), Some(tid));
        assert_eq!(Operation::Kill.thread(), None);
        assert_eq!(
            Operation::ReadMemory {
                addr: Address::ZERO,
                len: 8
            }
            .thread(),
            None
        );
    }

    #[test]
    fn test_reply_mismatch()
    {
        let err = Reply::Unit.into_memory().unwrap_err();
        assert!(matches!(err, TetherError::UnexpectedReply { expected: "memory" }));
        assert_eq!(Reply::EventMessage(7).into_event_message().unwrap(), 7);
    }

    #[test]
    fn test_write_transfer_counts_without_payload()
    {
        let write = MemoryTransfer::written(4, Some(Errno::EFAULT));
        assert_eq!(write.len(), 4);
        assert!(write.data.is_empty());
        assert_eq!(write.failure, Some(Errno::EFAULT));

        let read = MemoryTransfer::partial(vec![1, 2], Errno::EIO);
        assert_eq!(read.len(), 2);
        assert!(MemoryTransfer::written(0, None).is_empty());
    }
}
