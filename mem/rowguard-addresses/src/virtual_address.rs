use crate::BackingOffset;
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address in the current process.
///
/// No invariant beyond "this is intended to be a virtual address". Converting
/// from a pointer exposes its provenance so [`as_mut_ptr`](Self::as_mut_ptr)
/// can hand out a usable pointer again later.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.expose_provenance() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Raw pointer to this address.
    ///
    /// Dereferencing it is only sound if the address lies in a live mapping
    /// whose provenance was exposed via [`from_ptr`](Self::from_ptr).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        core::ptr::with_exposed_provenance_mut(self.0 as usize)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 % align as u64 == 0
    }

    /// Distance from `base` up to `self`, or `None` if `self` lies below `base`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<BackingOffset> {
        match self.0.checked_sub(base.0) {
            Some(d) => Some(BackingOffset::new(d)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Add<BackingOffset> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: BackingOffset) -> Self::Output {
        Self(self.0 + rhs.as_u64())
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
