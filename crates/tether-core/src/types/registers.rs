//! Register buffers exchanged with the control thread.
//!
//! The layout of a register set belongs to the caller's register
//! description; this crate only moves raw bytes between the caller's
//! buffers and the kernel.

use std::fmt;

use smallvec::SmallVec;

/// ELF note type used by `PTRACE_GETREGSET` for general-purpose registers
pub const NT_PRSTATUS: u32 = 1;

/// ELF note type used by `PTRACE_GETREGSET` for floating-point registers
pub const NT_PRFPREG: u32 = 2;

/// ELF note type of the x86 extended state (XSAVE area)
pub const NT_X86_XSTATE: u32 = 0x202;

/// ELF note type of the AArch64 TLS register
pub const NT_ARM_TLS: u32 = 0x401;

/// A register set transferred as a single buffer
///
/// ## Example
///
/// ```rust
/// use tether_core::types::registers::NT_X86_XSTATE;
/// use tether_core::types::RegisterSet;
///
/// assert_eq!(RegisterSet::General.note_type(), 1);
/// assert_eq!(RegisterSet::from_note_type(2), RegisterSet::FloatingPoint);
/// assert_eq!(RegisterSet::Extended(NT_X86_XSTATE).note_type(), 0x202);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSet
{
    /// General-purpose registers (`NT_PRSTATUS`)
    General,
    /// Floating-point registers (`NT_PRFPREG`)
    FloatingPoint,
    /// Any other register set, named by its ELF note type
    Extended(u32),
}

impl RegisterSet
{
    /// The ELF note type passed to `PTRACE_GETREGSET` / `PTRACE_SETREGSET`
    pub const fn note_type(self) -> u32
    {
        match self {
            RegisterSet::General => NT_PRSTATUS,
            RegisterSet::FloatingPoint => NT_PRFPREG,
            RegisterSet::Extended(note) => note,
        }
    }

    /// Map an ELF note type back to a register set
    pub const fn from_note_type(note: u32) -> Self
    {
        match note {
            NT_PRSTATUS => RegisterSet::General,
            NT_PRFPREG => RegisterSet::FloatingPoint,
            other => RegisterSet::Extended(other),
        }
    }
}

impl fmt::Display for RegisterSet
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            RegisterSet::General => write!(f, "general-purpose"),
            RegisterSet::FloatingPoint => write!(f, "floating-point"),
            RegisterSet::Extended(note) => write!(f, "regset 0x{note:x}"),
        }
    }
}

/// Value of a single register, stored little-endian
///
/// Registers up to 16 bytes stay inline; wider vector registers spill to the
/// heap.
///
/// ```rust
/// use tether_core::types::RegisterValue;
///
/// let value = RegisterValue::from_u64(0xdead_beef);
/// assert_eq!(value.len(), 8);
/// assert_eq!(value.to_u64(), 0xdead_beef);
/// assert_eq!(RegisterValue::from_bytes(&[0x34, 0x12]).to_u64(), 0x1234);
/// ```
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RegisterValue(SmallVec<[u8; 16]>);

impl RegisterValue
{
    /// Build a value from raw little-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Self
    {
        Self(SmallVec::from_slice(bytes))
    }

    /// Build an 8-byte value from a `u64`
    pub fn from_u64(value: u64) -> Self
    {
        Self(SmallVec::from_slice(&value.to_le_bytes()))
    }

    /// Build a `size`-byte value from the low bytes of a machine word
    pub fn from_word(word: u64, size: usize) -> Self
    {
        let bytes = word.to_le_bytes();
        Self(SmallVec::from_slice(&bytes[..size.min(bytes.len())]))
    }

    /// Interpret the low (up to) eight bytes as a `u64`
    pub fn to_u64(&self) -> u64
    {
        let mut bytes = [0u8; 8];
        let len = self.0.len().min(8);
        bytes[..len].copy_from_slice(&self.0[..len]);
        u64::from_le_bytes(bytes)
    }

    /// Raw little-endian bytes
    pub fn as_bytes(&self) -> &[u8]
    {
        &self.0
    }

    /// Width of the value in bytes
    pub fn len(&self) -> usize
    {
        self.0.len()
    }

    /// Whether the value holds no bytes
    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }
}

impl fmt::Debug for RegisterValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "RegisterValue(0x")?;
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
