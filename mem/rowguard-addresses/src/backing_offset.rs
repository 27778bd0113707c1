use core::fmt;
use core::ops::Add;

/// Byte offset into the backing store.
///
/// This is what the region mapper consumes: mapping a page of the arena into a
/// process means mapping `page_size` bytes of the backing descriptor starting
/// at this offset.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BackingOffset(u64);

impl BackingOffset {
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

    /// The offset as an in-memory index.
    ///
    /// Offsets index into a mapped backing store and always fit `usize`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BackingOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OFF(0x{:X})", self.0)
    }
}

impl fmt::Display for BackingOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for BackingOffset {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<usize> for BackingOffset {
    #[inline]
    fn from(v: usize) -> Self {
        Self::new(v as u64)
    }
}

impl Add<u64> for BackingOffset {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
