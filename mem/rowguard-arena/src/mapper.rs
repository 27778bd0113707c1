//! # Region Mapper
//!
//! Maps an arbitrary list of backing-store chunks into one contiguous,
//! optionally aligned, virtual range:
//!
//! ```text
//!  reserve len + align (PROT_NONE)   ┌──────┬──────────────────────┬───────┐
//!                                    │ trim │  aligned window      │ trim  │
//!                                    └──────┴──────────────────────┴───────┘
//!  MAP_FIXED each chunk                     │ off[0] │ off[1] │ ...│
//! ```
//!
//! The window is reserved first so the per-chunk `MAP_FIXED` mappings can
//! only ever replace memory owned by the region itself.

#![allow(unsafe_code)]

use crate::errors::{MapError, TeardownError};
use log::{trace, warn};
use rowguard_addresses::{BackingOffset, VirtualAddress};
use rustix::fd::AsFd;
use rustix::mm::{self, MapFlags, ProtFlags};
use std::ptr;

/// A contiguous range of virtual memory owned by the caller.
///
/// Dropping it unmaps the range, logging failures; call
/// [`unmap`](Self::unmap) to observe them.
#[derive(Debug)]
pub struct MappedRegion {
    base: VirtualAddress,
    len: usize,
}

impl MappedRegion {
    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_mut_ptr()
    }

    /// Unmap the whole range.
    ///
    /// # Errors
    /// Surfaces the OS error if the range could not be unmapped.
    pub fn unmap(mut self) -> Result<(), TeardownError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), TeardownError> {
        let len = std::mem::take(&mut self.len);
        if len == 0 {
            return Ok(());
        }
        // SAFETY: the range is owned by this region and not referenced elsewhere.
        unsafe { mm::munmap(self.base.as_mut_ptr(), len) }.map_err(|err| TeardownError::Unmap {
            len,
            source: err.into(),
        })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("{err}");
        }
    }
}

/// Map `chunk_size` bytes of `fd` at each of `offsets`, back to back, into a
/// fresh range aligned to `align` (0 for no alignment).
///
/// `hint` is passed to the kernel as a placement hint only.
///
/// # Errors
/// - [`MapError::Empty`] for no offsets or a zero chunk size.
/// - [`MapError::InvalidAlignment`] if `align` is neither 0 nor a power of two.
/// - [`MapError::Reserve`] if the address range cannot be reserved.
/// - [`MapError::MapChunk`] if a chunk cannot be mapped; nothing stays mapped.
pub fn map_offsets(
    hint: Option<VirtualAddress>,
    align: usize,
    fd: impl AsFd,
    offsets: &[BackingOffset],
    chunk_size: usize,
) -> Result<MappedRegion, MapError> {
    if offsets.is_empty() || chunk_size == 0 {
        return Err(MapError::Empty);
    }
    if align != 0 && !align.is_power_of_two() {
        return Err(MapError::InvalidAlignment(align));
    }
    let len = offsets
        .len()
        .checked_mul(chunk_size)
        .ok_or_else(|| overflow(usize::MAX))?;

    let region = reserve_aligned(hint, len, align)?;
    let mut cursor = region.base();
    for (index, &offset) in offsets.iter().enumerate() {
        // SAFETY: `cursor..cursor + chunk_size` lies inside the reservation
        // owned by `region`, so MAP_FIXED only replaces our own pages.
        unsafe {
            mm::mmap(
                cursor.as_mut_ptr(),
                chunk_size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::FIXED,
                fd.as_fd(),
                offset.as_u64(),
            )
        }
        .map_err(|err| MapError::MapChunk {
            index,
            offset,
            source: err.into(),
        })?;
        cursor += chunk_size as u64;
    }

    trace!(
        "mapped {} chunks of {chunk_size:#x} bytes at {}",
        offsets.len(),
        region.base()
    );
    Ok(region)
}

fn overflow(len: usize) -> MapError {
    MapError::Reserve {
        len,
        source: std::io::ErrorKind::OutOfMemory.into(),
    }
}

/// Reserve an inaccessible, `align`-aligned window of `len` bytes.
fn reserve_aligned(
    hint: Option<VirtualAddress>,
    len: usize,
    align: usize,
) -> Result<MappedRegion, MapError> {
    let request = len.checked_add(align).ok_or_else(|| overflow(len))?;
    let hint = hint.map_or(ptr::null_mut(), VirtualAddress::as_mut_ptr);

    // SAFETY: without MAP_FIXED the address is only a hint; nothing is replaced.
    let raw = unsafe { mm::mmap_anonymous(hint, request, ProtFlags::empty(), MapFlags::PRIVATE) }
        .map_err(|err| MapError::Reserve {
            len: request,
            source: err.into(),
        })?;
    let misalign = if align == 0 { 0 } else { raw.addr() % align };
    let raw = VirtualAddress::from_ptr(raw);
    if align == 0 {
        return Ok(MappedRegion { base: raw, len });
    }

    let left = if misalign == 0 { 0 } else { align - misalign };
    let right = align - left;

    // SAFETY: the leading sliver is part of the reservation above and lies
    // below the window.
    if left > 0
        && let Err(err) = unsafe { mm::munmap(raw.as_mut_ptr(), left) }
    {
        drop(remainder(raw, request, 0));
        return Err(trim_error(left, err));
    }
    let base = raw + left as u64;
    // SAFETY: the trailing sliver is part of the reservation above and lies
    // past the window.
    if let Err(err) = unsafe { mm::munmap((base + len as u64).as_mut_ptr(), right) } {
        drop(remainder(raw, request, left));
        return Err(trim_error(right, err));
    }
    Ok(MappedRegion { base, len })
}

/// The part of a `request` byte reservation at `raw` that is still mapped
/// after its first `trimmed` bytes were unmapped.
fn remainder(raw: VirtualAddress, request: usize, trimmed: usize) -> MappedRegion {
    MappedRegion {
        base: raw + trimmed as u64,
        len: request - trimmed,
    }
}

fn trim_error(len: usize, err: rustix::io::Errno) -> MapError {
    MapError::Unmap(TeardownError::Unmap {
        len,
        source: err.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fd::OwnedFd;

    fn memfd() -> OwnedFd {
        let fd = rustix::fs::memfd_create(
            rustix::cstr!("mapper-test"),
            rustix::fs::MemfdFlags::CLOEXEC,
        )
        .unwrap();
        rustix::fs::ftruncate(&fd, 0x4000).unwrap();
        fd
    }

    #[test]
    fn rejects_bad_requests() {
        let fd = memfd();
        let off = [BackingOffset::new(0)];
        assert!(matches!(map_offsets(None, 0, &fd, &[], 4096), Err(MapError::Empty)));
        assert!(matches!(map_offsets(None, 0, &fd, &off, 0), Err(MapError::Empty)));
        assert!(matches!(
            map_offsets(None, 3 * 4096, &fd, &off, 4096),
            Err(MapError::InvalidAlignment(_))
        ));
    }

    #[test]
    fn remainder_covers_the_untrimmed_reservation() {
        let page = rustix::param::page_size();
        // SAFETY: a fresh reservation at a kernel-chosen address.
        let raw = unsafe {
            mm::mmap_anonymous(ptr::null_mut(), 4 * page, ProtFlags::empty(), MapFlags::PRIVATE)
        }
        .unwrap();
        let raw = VirtualAddress::from_ptr(raw);

        let whole = remainder(raw, 4 * page, 0);
        assert_eq!((whole.base(), whole.len()), (raw, 4 * page));
        std::mem::forget(whole);

        // SAFETY: the leading page of the reservation above.
        unsafe { mm::munmap(raw.as_mut_ptr(), page) }.unwrap();
        let rest = remainder(raw, 4 * page, page);
        assert_eq!(rest.base(), raw + page as u64);
        assert_eq!(rest.len(), 3 * page);
        drop(rest);

        // Nothing of the reservation is left behind.
        // SAFETY: FIXED_NOREPLACE fails instead of replacing live mappings.
        let again = unsafe {
            mm::mmap_anonymous(
                raw.as_mut_ptr(),
                4 * page,
                ProtFlags::empty(),
                MapFlags::PRIVATE | MapFlags::FIXED_NOREPLACE,
            )
        }
        .unwrap();
        assert_eq!(again, raw.as_mut_ptr());
        // SAFETY: the mapping created just above.
        unsafe { mm::munmap(again, 4 * page) }.unwrap();
    }

    #[test]
    fn aligned_window() {
        let region = reserve_aligned(None, 0x3000, 0x20_0000).unwrap();
        assert!(region.base().is_aligned(0x20_0000));
        assert_eq!(region.len(), 0x3000);
        region.unmap().unwrap();
    }
}
