//! # ptrace Inferior
//!
//! The [`Inferior`] implementation that performs every control call with
//! `ptrace(2)`.
//!
//! ## Requests Used
//!
//! - **`PTRACE_PEEKDATA` / `PTRACE_POKEDATA`**: memory, one machine word at a time
//! - **`PTRACE_PEEKUSER` / `PTRACE_POKEUSER`**: single registers in the user area
//! - **`PTRACE_GETREGSET` / `PTRACE_SETREGSET`**: whole register sets
//! - **`PTRACE_GETSIGINFO` / `PTRACE_GETEVENTMSG`**: stop inspection
//! - **`PTRACE_CONT` / `PTRACE_SINGLESTEP` / `PTRACE_DETACH`**: execution control
//!
//! Thread stops use `tgkill(2)` and killing uses `kill(2)`.
//!
//! ## Thread affinity
//!
//! The kernel accepts these requests only from the tracer thread, so a
//! `PtraceInferior` is created and used on the control thread exclusively.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)

use std::ffi::c_void;
use std::ptr;

use libc::c_long;
use nix::errno::Errno;
use nix::sys::ptrace::{self, AddressType, Options};
use nix::sys::signal::{self, Signal};
use tracing::trace;

use super::constants::WORD_SIZE;
use crate::config::MonitorConfig;
use crate::error::{Result, TetherError};
use crate::inferior::Inferior;
use crate::operation::{MemoryTransfer, Operation, Reply};
use crate::types::{Address, ProcessId, RegisterValue, SignalInfo, ThreadId};

/// ptrace options for a freshly stopped tracee
///
/// `PTRACE_O_EXITKILL` is only ever set for debuggees we launched.
pub fn trace_options(config: &MonitorConfig, launched: bool) -> Options
{
    let mut options = Options::empty();
    if config.trace_clone {
        options |= Options::PTRACE_O_TRACECLONE;
    }
    if config.trace_exec {
        options |= Options::PTRACE_O_TRACEEXEC;
    }
    if config.trace_exit {
        options |= Options::PTRACE_O_TRACEEXIT;
    }
    if launched && config.kill_on_exit {
        options |= Options::PTRACE_O_EXITKILL;
    }
    options
}

/// Executes operations against one traced process
#[derive(Debug)]
pub struct PtraceInferior
{
    pid: ProcessId,
}

impl PtraceInferior
{
    /// Inferior for an already traced process
    pub fn new(pid: ProcessId) -> Self
    {
        Self { pid }
    }

    /// Read `len` bytes word by word, stopping at the first failure
    fn read_memory(&self, addr: Address, len: usize) -> MemoryTransfer
    {
        let pid = self.pid.as_pid();
        let mut data = Vec::with_capacity(len);
        let mut word_addr = addr.align_down(WORD_SIZE as u64);
        let mut skip = addr.offset_in(WORD_SIZE as u64);

        while data.len() < len {
            let word = match ptrace::read(pid, word_addr.value() as AddressType) {
                Ok(word) => word,
                Err(errno) => return MemoryTransfer::partial(data, errno),
            };
            let bytes = word.to_ne_bytes();
            let take = (WORD_SIZE - skip).min(len - data.len());
            data.extend_from_slice(&bytes[skip..skip + take]);
            skip = 0;

            match word_addr.checked_add(WORD_SIZE as u64) {
                Some(next) => word_addr = next,
                None if data.len() < len => return MemoryTransfer::partial(data, Errno::EIO),
                None => break,
            }
        }

        MemoryTransfer::complete(data)
    }

    /// Write `data` word by word; partial words keep their surrounding bytes
    fn write_memory(&self, addr: Address, data: &[u8]) -> MemoryTransfer
    {
        let pid = self.pid.as_pid();
        let mut written = 0;
        let mut word_addr = addr.align_down(WORD_SIZE as u64);
        let mut skip = addr.offset_in(WORD_SIZE as u64);

        while written < data.len() {
            let take = (WORD_SIZE - skip).min(data.len() - written);
            let mut bytes = if take == WORD_SIZE {
                [0u8; WORD_SIZE]
            } else {
                match ptrace::read(pid, word_addr.value() as AddressType) {
                    Ok(word) => word.to_ne_bytes(),
                    Err(errno) => return MemoryTransfer::written(written, Some(errno)),
                }
            };
            bytes[skip..skip + take].copy_from_slice(&data[written..written + take]);

            let word = c_long::from_ne_bytes(bytes);
            if let Err(errno) = poke(libc::PTRACE_POKEDATA, self.pid.main_thread(), word_addr.value(), word) {
                return MemoryTransfer::written(written, Some(errno));
            }
            written += take;
            skip = 0;

            match word_addr.checked_add(WORD_SIZE as u64) {
                Some(next) => word_addr = next,
                None if written < data.len() => return MemoryTransfer::written(written, Some(Errno::EIO)),
                None => break,
            }
        }

        MemoryTransfer::written(written, None)
    }

    fn read_register_value(&self, tid: ThreadId, offset: usize, name: &str, size: usize) -> Result<RegisterValue>
    {
        check_register_width(name, size)?;
        let word = peek_user(tid, offset).map_err(|errno| TetherError::control("ReadRegisterValue", tid, errno))?;
        trace!("Read {name} of thread {tid}: 0x{word:x}");
        Ok(RegisterValue::from_word(word as u64, size))
    }

    fn write_register_value(&self, tid: ThreadId, offset: usize, name: &str, value: &RegisterValue) -> Result<()>
    {
        check_register_width(name, value.len())?;
        let fail = |errno: Errno| TetherError::control("WriteRegisterValue", tid, errno);

        let mut bytes = if value.len() == WORD_SIZE {
            [0u8; WORD_SIZE]
        } else {
            peek_user(tid, offset).map_err(fail)?.to_ne_bytes()
        };
        bytes[..value.len()].copy_from_slice(value.as_bytes());

        let word = c_long::from_ne_bytes(bytes);
        trace!("Write {name} of thread {tid}: 0x{word:x}");
        poke(libc::PTRACE_POKEUSER, tid, offset as u64, word).map_err(fail)
    }

    #[cfg(target_arch = "x86_64")]
    fn read_thread_pointer(&self, tid: ThreadId) -> Result<Address>
    {
        // `struct user` starts with the general-purpose registers.
        let offset = std::mem::offset_of!(libc::user_regs_struct, fs_base);
        let word = peek_user(tid, offset).map_err(|errno| TetherError::control("ReadThreadPointer", tid, errno))?;
        Ok(Address::from(word as u64))
    }

    #[cfg(target_arch = "aarch64")]
    fn read_thread_pointer(&self, tid: ThreadId) -> Result<Address>
    {
        let bytes = get_regset(tid, crate::types::registers::NT_ARM_TLS, 8)
            .map_err(|errno| TetherError::control("ReadThreadPointer", tid, errno))?;
        let bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| TetherError::control("ReadThreadPointer", tid, Errno::EIO))?;
        Ok(Address::from(u64::from_le_bytes(bytes)))
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    fn read_thread_pointer(&self, _tid: ThreadId) -> Result<Address>
    {
        Err(TetherError::Unsupported("reading the thread pointer on this architecture"))
    }
}

impl Inferior for PtraceInferior
{
    fn execute(&mut self, op: &Operation) -> Result<Reply>
    {
        let fail = |errno: Errno| TetherError::control(op.name(), op.thread(), errno);

        match op {
            Operation::ReadMemory { addr, len } => Ok(Reply::Memory(self.read_memory(*addr, *len))),
            Operation::WriteMemory { addr, data } => Ok(Reply::Memory(self.write_memory(*addr, data))),
            Operation::ReadRegisterValue { tid, offset, name, size } => {
                self.read_register_value(*tid, *offset, name, *size).map(Reply::Register)
            }
            Operation::WriteRegisterValue {
                tid,
                offset,
                name,
                value,
            } => self.write_register_value(*tid, *offset, name, value).map(|()| Reply::Unit),
            Operation::ReadRegisterSet { tid, set, size } => {
                get_regset(*tid, set.note_type(), *size).map(Reply::Bytes).map_err(fail)
            }
            Operation::WriteRegisterSet { tid, set, data } => {
                set_regset(*tid, set.note_type(), data).map(|()| Reply::Unit).map_err(fail)
            }
            Operation::ReadThreadPointer { tid } => self.read_thread_pointer(*tid).map(Reply::Address),
            Operation::GetSignalInfo { tid } => ptrace::getsiginfo(tid.as_pid())
                .map(|raw| Reply::SignalInfo(decode_siginfo(&raw)))
                .map_err(fail),
            Operation::GetEventMessage { tid } => ptrace::getevent(tid.as_pid())
                .map(|message| Reply::EventMessage(message as u64))
                .map_err(fail),
            Operation::Resume { tid, signal } => {
                restart(libc::PTRACE_CONT, *tid, *signal).map(|()| Reply::Unit).map_err(fail)
            }
            Operation::SingleStep { tid, signal } => {
                restart(libc::PTRACE_SINGLESTEP, *tid, *signal).map(|()| Reply::Unit).map_err(fail)
            }
            Operation::Kill => signal::kill(self.pid.as_pid(), Signal::SIGKILL).map(|()| Reply::Unit).map_err(fail),
            Operation::Detach { tid } => ptrace::detach(tid.as_pid(), None).map(|()| Reply::Unit).map_err(fail),
            Operation::StopThread { tid } => tgkill(self.pid, *tid, libc::SIGSTOP).map(|()| Reply::Unit).map_err(fail),
        }
    }
}

fn check_register_width(name: &str, size: usize) -> Result<()>
{
    if size == 0 || size > WORD_SIZE {
        return Err(TetherError::InvalidArgument(format!(
            "register {name} is {size} bytes; the user area holds 1 to {WORD_SIZE}"
        )));
    }
    Ok(())
}

/// `PTRACE_PEEKUSER`, distinguishing a stored `-1` from a failure through errno
fn peek_user(tid: ThreadId, offset: usize) -> nix::Result<c_long>
{
    Errno::clear();
    // SAFETY: PEEKUSER only reads the tracee's user area; the kernel validates the offset.
    let word = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKUSER,
            tid.as_pid().as_raw(),
            offset as *mut c_void,
            ptr::null_mut::<c_void>(),
        )
    };
    if word == -1 {
        match Errno::last() {
            Errno::UnknownErrno => {}
            errno => return Err(errno),
        }
    }
    Ok(word)
}

/// Type of the request argument of `libc::ptrace` on this target
#[cfg(target_env = "gnu")]
type Request = libc::c_uint;
#[cfg(not(target_env = "gnu"))]
type Request = libc::c_int;

macro_rules! ptrace_request {
    ($request:expr, $tid:expr, $addr:expr, $data:expr) => {
        // SAFETY: every pointer argument is either an integer the kernel treats
        // as a plain value or points into a buffer that outlives the call.
        Errno::result(unsafe { libc::ptrace($request, $tid.as_pid().as_raw(), $addr, $data) }).map(drop)
    };
}

/// `PTRACE_POKEDATA` / `PTRACE_POKEUSER`
fn poke(request: Request, tid: ThreadId, addr: u64, word: c_long) -> nix::Result<()>
{
    ptrace_request!(request, tid, addr as *mut c_void, word as *mut c_void)
}

/// `PTRACE_CONT` / `PTRACE_SINGLESTEP` with a raw signal number
///
/// nix's `Signal` cannot name real-time signals, so the number is passed
/// through untouched.
fn restart(request: Request, tid: ThreadId, signal: Option<i32>) -> nix::Result<()>
{
    let data = signal.unwrap_or(0) as usize;
    ptrace_request!(request, tid, ptr::null_mut::<c_void>(), data as *mut c_void)
}

/// `PTRACE_GETREGSET` into a buffer of `size` bytes, truncated to what the kernel filled
fn get_regset(tid: ThreadId, note: u32, size: usize) -> nix::Result<Vec<u8>>
{
    let mut buf = vec![0u8; size];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<c_void>(),
        iov_len: buf.len(),
    };
    ptrace_request!(
        libc::PTRACE_GETREGSET,
        tid,
        note as usize as *mut c_void,
        ptr::addr_of_mut!(iov).cast::<c_void>()
    )?;
    let filled = iov.iov_len.min(size);
    buf.truncate(filled);
    Ok(buf)
}

/// `PTRACE_SETREGSET` from `data`
fn set_regset(tid: ThreadId, note: u32, data: &[u8]) -> nix::Result<()>
{
    let mut buf = data.to_vec();
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<c_void>(),
        iov_len: buf.len(),
    };
    ptrace_request!(
        libc::PTRACE_SETREGSET,
        tid,
        note as usize as *mut c_void,
        ptr::addr_of_mut!(iov).cast::<c_void>()
    )
}

fn tgkill(pid: ProcessId, tid: ThreadId, signal: i32) -> nix::Result<()>
{
    // SAFETY: tgkill takes three integers and touches no memory of ours.
    let res = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            c_long::from(pid.as_pid().as_raw()),
            c_long::from(tid.as_pid().as_raw()),
            c_long::from(signal),
        )
    };
    Errno::result(res).map(drop)
}

/// Pick the meaningful fields out of a `siginfo_t`
fn decode_siginfo(raw: &libc::siginfo_t) -> SignalInfo
{
    let info = SignalInfo::new(raw.si_signo, raw.si_code).with_errno(raw.si_errno);

    if raw.si_code <= 0 {
        // SAFETY: user-sent signals (kill, tgkill, sigqueue) fill in `si_pid`.
        let sender = unsafe { raw.si_pid() };
        info.with_sender(sender as u32)
    } else if matches!(
        raw.si_signo,
        libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE | libc::SIGTRAP
    ) {
        // SAFETY: kernel-raised faults and traps fill in `si_addr`.
        let addr = unsafe { raw.si_addr() };
        info.with_fault_address(Address::from(addr as usize as u64))
    } else {
        info
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_trace_options()
    {
        let config = MonitorConfig::default();
        let launched = trace_options(&config, true);
        assert!(launched.contains(Options::PTRACE_O_TRACECLONE | Options::PTRACE_O_EXITKILL));
        assert!(!launched.contains(Options::PTRACE_O_TRACEEXIT));

        let attached = trace_options(&config.clone().trace_exit(true), false);
        assert!(attached.contains(Options::PTRACE_O_TRACEEXIT));
        assert!(!attached.contains(Options::PTRACE_O_EXITKILL));
    }

    #[test]
    fn test_register_width_bounds()
    {
        assert!(check_register_width("rax", 8).is_ok());
        assert!(check_register_width("al", 1).is_ok());
        assert!(matches!(
            check_register_width("xmm0", 16),
            Err(TetherError::InvalidArgument(_))
        ));
        assert!(check_register_width("none", 0).is_err());
    }
}
