//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the debuggee's virtual address space
///
/// Wrapping the raw `u64` keeps addresses from being mixed up with sizes,
/// counts, or register offsets when they travel through an
/// [`Operation`](crate::operation::Operation).
///
/// ## Word access
///
/// `ptrace(PTRACE_PEEKDATA)` and `ptrace(PTRACE_POKEDATA)` only move whole
/// machine words, so memory transfers split every request into aligned words.
/// [`Address::align_down`] and [`Address::offset_in`] do that arithmetic.
///
/// ## Example
///
/// ```rust
/// use tether_core::types::Address;
///
/// let addr = Address::from(0x1003);
/// assert_eq!(addr.align_down(8), Address::from(0x1000));
/// assert_eq!(addr.offset_in(8), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts)
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, returning `None` on overflow
    ///
    /// ```rust
    /// use tether_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, returning `None` on underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset to this address, saturating at `u64::MAX`
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Round this address down to a multiple of `alignment`
    ///
    /// `alignment` must be a power of two (the machine word size in practice).
    pub fn align_down(self, alignment: u64) -> Self
    {
        debug_assert!(alignment.is_power_of_two());
        Address(self.0 & !(alignment - 1))
    }

    /// Byte offset of this address inside its `alignment`-sized block
    pub fn offset_in(self, alignment: u64) -> usize
    {
        debug_assert!(alignment.is_power_of_two());
        (self.0 & (alignment - 1)) as usize
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
