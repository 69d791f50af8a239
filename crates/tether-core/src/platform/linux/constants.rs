//! # Linux Platform Constants
//!
//! Magic numbers used by the ptrace backend.

use std::mem::size_of;

use libc::c_long;

/// Size of the unit moved by `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` and the
/// user-area requests
pub const WORD_SIZE: usize = size_of::<c_long>();

/// `personality(2)` argument that queries the current persona without changing it
pub const PERSONA_QUERY: libc::c_ulong = 0xffff_ffff;

/// Yama LSM setting that restricts `PTRACE_ATTACH` to descendants
///
/// See: [Yama documentation](https://www.kernel.org/doc/html/latest/admin-guide/LSM/Yama.html)
pub const YAMA_PTRACE_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";
