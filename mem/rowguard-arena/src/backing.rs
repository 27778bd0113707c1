//! # Backing Stores
//!
//! The arena hands out pages of one large shared memory object. The builder
//! acquires that object through a [`BackingSource`], inspects it through the
//! geometry resolver, then shapes it: data pages are zeroed, guard pages are
//! filled with a sentinel byte, and everything else is discarded.
//!
//! [`MemfdSource`] is the Linux implementation: an anonymous memory file that
//! is mapped shared, advised for transparent huge pages and locked into RAM.
//! Because the pages live in a file, clients can later map them anywhere via
//! the descriptor (see [`mapper`](crate::mapper)).

#![allow(unsafe_code)]

use crate::errors::{BackingError, TeardownError};
use log::{debug, warn};
use rowguard_addresses::{BackingOffset, VirtualAddress};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::{self, MemfdFlags};
use rustix::mm::{self, Advice, MapFlags, ProtFlags};
use std::collections::BTreeMap;
use std::ptr;

/// Produces fresh backing stores of a requested length.
pub trait BackingSource {
    type Store: BackingStore;

    /// Acquire a mapped, resident store of exactly `len` bytes.
    ///
    /// # Errors
    /// Any failure here is fatal for the arena build.
    fn acquire(&mut self, len: usize) -> Result<Self::Store, BackingError>;
}

/// A mapped region of backing memory.
pub trait BackingStore {
    /// Address of the first byte in the builder's mapping.
    fn base(&self) -> VirtualAddress;

    /// Length of the store in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set `len` bytes starting at `offset` to `byte`.
    ///
    /// # Errors
    /// Fails if the range is out of bounds or was discarded.
    fn fill(&mut self, offset: BackingOffset, len: usize, byte: u8) -> Result<(), BackingError>;

    /// Drop the contents of `len` bytes at `offset` and unmap them from the
    /// builder's view. The range must not be accessed through this store
    /// afterwards.
    ///
    /// # Errors
    /// Fails if the range is out of bounds, already discarded, or the OS
    /// refuses the request.
    fn discard(&mut self, offset: BackingOffset, len: usize) -> Result<(), BackingError>;

    /// Unmap the store and release its descriptor.
    ///
    /// # Errors
    /// Surfaces unmap failures.
    fn release(self) -> Result<(), TeardownError>
    where
        Self: Sized;
}

/// Validates `[offset, offset + len)` against a store of `size` bytes and
/// returns the range start.
pub(crate) fn checked_range(
    offset: BackingOffset,
    len: usize,
    size: usize,
) -> Result<usize, BackingError> {
    let start = usize::try_from(offset.as_u64()).ok();
    match start.and_then(|s| s.checked_add(len).map(|e| (s, e))) {
        Some((start, end)) if end <= size => Ok(start),
        _ => Err(BackingError::OutOfBounds { offset, len, size }),
    }
}

/// Creates [`MemfdStore`]s.
#[derive(Debug, Default, Copy, Clone)]
pub struct MemfdSource;

impl MemfdSource {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BackingSource for MemfdSource {
    type Store = MemfdStore;

    fn acquire(&mut self, len: usize) -> Result<MemfdStore, BackingError> {
        let fd = fs::memfd_create(rustix::cstr!("rowguard-arena"), MemfdFlags::CLOEXEC)
            .map_err(|err| BackingError::Create(err.into()))?;
        fs::ftruncate(&fd, len as u64).map_err(|err| BackingError::Resize {
            len,
            source: err.into(),
        })?;

        // SAFETY: a fresh mapping at a kernel-chosen address; nothing existing is replaced.
        let ptr = unsafe {
            mm::mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(|err| BackingError::Map {
            len,
            source: err.into(),
        })?;

        let store = MemfdStore {
            fd,
            base: VirtualAddress::from_ptr(ptr),
            len,
            discarded: BTreeMap::new(),
        };

        // SAFETY: the range is exactly the mapping created above.
        if let Err(err) = unsafe { mm::madvise(ptr, len, Advice::LinuxHugepage) } {
            warn!("huge page advice refused for {len:#x} bytes: {err}");
        }

        // SAFETY: as above. On failure `store` is dropped and unmaps itself.
        unsafe { mm::mlock(ptr, len) }.map_err(|err| BackingError::Lock {
            len,
            source: err.into(),
        })?;

        debug!("acquired {len:#x} byte memfd backing at {}", store.base);
        Ok(store)
    }
}

/// Anonymous memory file mapped into the builder's address space.
///
/// Dropping the store unmaps it (logging failures) and closes the descriptor.
/// Use [`BackingStore::release`] to observe unmap failures; the result of
/// closing the descriptor is not observable.
#[derive(Debug)]
pub struct MemfdStore {
    fd: OwnedFd,
    base: VirtualAddress,
    len: usize,
    /// Discarded ranges, start to end.
    discarded: BTreeMap<usize, usize>,
}

impl MemfdStore {
    fn overlaps_discarded(&self, start: usize, end: usize) -> bool {
        self.discarded
            .range(..end)
            .next_back()
            .is_some_and(|(_, &e)| e > start)
    }

    fn unmap(&mut self) -> Result<(), TeardownError> {
        let len = std::mem::take(&mut self.len);
        if len == 0 {
            return Ok(());
        }
        // SAFETY: the whole mapping created in `acquire`; discarded holes are allowed.
        unsafe { mm::munmap(self.base.as_mut_ptr(), len) }.map_err(|err| TeardownError::Unmap {
            len,
            source: err.into(),
        })
    }
}

impl AsFd for MemfdStore {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl BackingStore for MemfdStore {
    fn base(&self) -> VirtualAddress {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }

    fn fill(&mut self, offset: BackingOffset, len: usize, byte: u8) -> Result<(), BackingError> {
        let start = checked_range(offset, len, self.len)?;
        if self.overlaps_discarded(start, start + len) {
            return Err(BackingError::Discarded { offset, len });
        }
        // SAFETY: in bounds of a live, writable mapping owned by `self`.
        unsafe {
            ptr::write_bytes((self.base + offset).as_mut_ptr::<u8>(), byte, len);
        }
        Ok(())
    }

    fn discard(&mut self, offset: BackingOffset, len: usize) -> Result<(), BackingError> {
        let start = checked_range(offset, len, self.len)?;
        if len == 0 {
            return Ok(());
        }
        if self.overlaps_discarded(start, start + len) {
            return Err(BackingError::Discarded { offset, len });
        }
        let ptr = (self.base + offset).as_mut_ptr();
        // SAFETY: in bounds of the mapping and not previously discarded; the
        // range is never touched through this store again. Locked pages
        // refuse MADV_REMOVE, so the range is unlocked first.
        unsafe {
            mm::munlock(ptr, len)
                .and_then(|()| mm::madvise(ptr, len, Advice::LinuxRemove))
                .and_then(|()| mm::munmap(ptr, len))
                .map_err(|err| BackingError::Discard {
                    offset,
                    source: err.into(),
                })?;
        }
        self.discarded.insert(start, start + len);
        Ok(())
    }

    fn release(mut self) -> Result<(), TeardownError> {
        self.unmap()
    }
}

impl Drop for MemfdStore {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            warn!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks() {
        assert_eq!(checked_range(BackingOffset::new(0x1000), 0x1000, 0x2000).unwrap(), 0x1000);
        assert!(matches!(
            checked_range(BackingOffset::new(0x1000), 0x1001, 0x2000),
            Err(BackingError::OutOfBounds { .. })
        ));
        assert!(checked_range(BackingOffset::new(u64::MAX), 1, 0x2000).is_err());
    }

    #[test]
    fn memfd_fill_discard_release() {
        let page = rustix::param::page_size();
        let mut store = match MemfdSource::new().acquire(4 * page) {
            Ok(store) => store,
            // Locked memory may be unavailable in restricted environments.
            Err(BackingError::Lock { .. }) => return,
            Err(err) => panic!("{err}"),
        };
        assert_eq!(store.len(), 4 * page);

        store.fill(BackingOffset::from(page), page, 0xAA).unwrap();
        // SAFETY: page 1 is mapped and was just filled.
        let byte = unsafe { *(store.base() + page as u64).as_mut_ptr::<u8>() };
        assert_eq!(byte, 0xAA);

        store.discard(BackingOffset::from(2 * page), page).unwrap();
        assert!(matches!(
            store.fill(BackingOffset::from(2 * page), page, 0),
            Err(BackingError::Discarded { .. })
        ));
        assert!(matches!(
            store.discard(BackingOffset::from(2 * page), page),
            Err(BackingError::Discarded { .. })
        ));
        store.fill(BackingOffset::from(3 * page), page, 0).unwrap();

        store.release().unwrap();
    }
}
