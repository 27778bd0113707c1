use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// Carries the *kind* of address at the type level so physical addresses are
/// never mixed up with virtual addresses or backing-store offsets. The DRAM
/// row a page belongs to is a function of this value.
///
/// ### Examples
/// ```rust
/// # use rowguard_addresses::*;
/// let pa = PhysicalAddress::from_frame(0x12_3456, 4096);
/// assert_eq!(pa.as_u64(), 0x1_2345_6000);
/// assert_eq!((pa + 0x1000).as_u64(), 0x1_2345_7000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Builds the address of frame number `pfn` for frames of `frame_size` bytes.
    #[inline]
    #[must_use]
    pub const fn from_frame(pfn: u64, frame_size: usize) -> Self {
        Self(pfn * frame_size as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Offset of this address inside its enclosing `align`-sized block.
    #[inline]
    #[must_use]
    pub const fn offset_in(self, align: usize) -> u64 {
        self.0 % align as u64
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
