//! # Physical, Virtual and Backing-Store Addresses
//!
//! Strongly typed wrappers for the three kinds of page coordinates the arena
//! juggles while carving a memory region into row blocks.
//!
//! ## Overview
//!
//! Every page handed out by the arena is identified twice: once by its
//! **physical** address (what the memory controller sees, and what decides
//! which DRAM row the page lives in) and once by its **offset into the backing
//! store** (what a process needs to map the page). While classifying pages the
//! builder additionally reasons about **virtual** addresses of the mapped
//! backing region.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Host-physical address as reported by the translator. |
//! | [`VirtualAddress`] | Address in the current process' address space. |
//! | [`BackingOffset`] | Byte offset into the backing store (memfd). |
//!
//! All three are `#[repr(transparent)]` over `u64` and implement `Copy`, `Eq`,
//! `Ord` and `Hash`, so they can be sorted and used as merge keys directly.
//!
//! ```rust
//! # use rowguard_addresses::*;
//! let base = VirtualAddress::new(0x7f00_0000_0000);
//! let page = base + 3 * 4096;
//! assert_eq!(page.offset_from(base), Some(BackingOffset::new(3 * 4096)));
//! assert_eq!(ceil_div(4097, 4096), 2);
//! ```

mod backing_offset;
mod physical_address;
mod virtual_address;

pub use crate::backing_offset::BackingOffset;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Integer division rounding towards positive infinity.
///
/// # Panics
/// Panics if `divisor` is zero.
#[inline]
#[must_use]
pub const fn ceil_div(value: usize, divisor: usize) -> usize {
    value / divisor + if value % divisor == 0 { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(0, 4096), 0);
        assert_eq!(ceil_div(1, 4096), 1);
        assert_eq!(ceil_div(4096, 4096), 1);
        assert_eq!(ceil_div(4097, 4096), 2);
    }

    #[test]
    fn virtual_offsets_round_trip() {
        let base = VirtualAddress::new(0x7f12_3400_0000);
        let va = base + 0x5000;
        let off = va.offset_from(base).unwrap();
        assert_eq!(off.as_u64(), 0x5000);
        assert_eq!(base + off, va);
        assert_eq!(base.offset_from(va), None);
    }

    #[test]
    fn physical_addresses_order_numerically() {
        let mut v = [
            PhysicalAddress::new(0x3000),
            PhysicalAddress::new(0x1000),
            PhysicalAddress::new(0x2000),
        ];
        v.sort_unstable();
        assert_eq!(v.map(PhysicalAddress::as_u64), [0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn formatting() {
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x1234)),
            "PA(0x0000000000001234)"
        );
        assert_eq!(format!("{}", VirtualAddress::new(0xAB)), "0x00000000000000AB");
        assert_eq!(format!("{:?}", BackingOffset::new(0x2000)), "OFF(0x2000)");
    }
}
