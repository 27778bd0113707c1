//! # Arena: tickets, row blocks and reservations
//!
//! An [`Arena`] owns a table of [`RowBlock`]s sorted ascending by data page
//! count, plus two shared page pools the blocks index into. Reservations hand
//! out whole blocks under a fresh [`Ticket`]; the block table itself never
//! changes after construction.
//!
//! ## Free totals
//!
//! `free_totals[i]` is the number of free data pages in blocks `0..=i`. The
//! reservation walk uses it to find a starting block from which walking
//! *down* is guaranteed to collect enough pages:
//!
//! ```text
//!  index        0    1    2    3
//!  data_count   2    4    4    9
//!  owner        -    #1   -    -
//!  free_totals  2    2    6    15
//! ```
//!
//! Both `reserve` and `release` recompute the totals from the lowest index
//! they touched before returning.

use crate::backing::BackingStore;
use crate::errors::{ArenaError, TeardownError};
use log::{debug, trace};
use rowguard_addresses::{BackingOffset, PhysicalAddress, ceil_div};
use rowguard_mergeheap::{HeapKey, MergeHeap, MergeHeapError, capacity_for};
use std::fmt;
use std::num::NonZeroU16;
use std::ops::Range;

/// Identifies one live reservation.
///
/// Tickets are issued in increasing order starting at 1 and are never reused
/// within an arena's lifetime.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(NonZeroU16);

impl Ticket {
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Option<Self> {
        match NonZeroU16::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticket({})", self.0)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One physical page of the backing store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub phys: PhysicalAddress,
    pub offset: BackingOffset,
}

/// Atomic unit of reservation.
///
/// Refers to `data_count` entries of the data pool starting at `data_offset`
/// and `guard_count` entries of the guard pool starting at `guard_offset`.
/// Both sub-ranges are sorted by physical address. Guard ranges of adjacent
/// blocks may name the same page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RowBlock {
    pub data_count: usize,
    pub data_offset: usize,
    pub guard_count: usize,
    pub guard_offset: usize,
}

impl RowBlock {
    #[inline]
    #[must_use]
    pub const fn data_range(&self) -> Range<usize> {
        self.data_offset..self.data_offset + self.data_count
    }

    #[inline]
    #[must_use]
    pub const fn guard_range(&self) -> Range<usize> {
        self.guard_offset..self.guard_offset + self.guard_count
    }
}

/// Which pool [`Arena::chunks`] enumerates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    Data,
    Guard,
}

/// Row-isolated page arena over a backing store `S`.
///
/// # Invariants
/// - `row_blocks` is sorted ascending by `data_count`; every block has data.
/// - `owners` and `free_totals` are parallel to `row_blocks`.
/// - `free_totals[i] == free_totals[i - 1] + (owners[i] is free ? data_count : 0)`.
/// - A block is owned by at most one ticket.
#[derive(Debug)]
pub struct Arena<S> {
    page_size: usize,
    backing: S,
    row_blocks: Vec<RowBlock>,
    free_totals: Vec<usize>,
    owners: Vec<Option<Ticket>>,
    last_ticket: u16,
    data_pool: Vec<PageEntry>,
    guard_pool: Vec<PageEntry>,
}

impl<S> Arena<S> {
    /// Assemble an arena from a block table and its page pools.
    ///
    /// Blocks are stably sorted by data count; all blocks start out free.
    ///
    /// # Errors
    /// Rejects a zero page size, blocks without data pages, and blocks whose
    /// ranges fall outside their pool.
    pub fn from_parts(
        page_size: usize,
        backing: S,
        mut row_blocks: Vec<RowBlock>,
        data_pool: Vec<PageEntry>,
        guard_pool: Vec<PageEntry>,
    ) -> Result<Self, ArenaError> {
        if page_size == 0 {
            return Err(ArenaError::ZeroPageSize);
        }
        for (index, block) in row_blocks.iter().enumerate() {
            if block.data_count == 0 {
                return Err(ArenaError::EmptyBlock { index });
            }
            if data_pool.get(block.data_range()).is_none()
                || guard_pool.get(block.guard_range()).is_none()
            {
                return Err(ArenaError::BlockOutOfBounds { index });
            }
        }
        row_blocks.sort_by_key(|b| b.data_count);

        let blocks = row_blocks.len();
        let mut arena = Self {
            page_size,
            backing,
            row_blocks,
            free_totals: vec![0; blocks],
            owners: vec![None; blocks],
            last_ticket: 0,
            data_pool,
            guard_pool,
        };
        arena.update_totals(0);
        debug!(
            "arena ready: {} row blocks, {} data pages, {} guard entries",
            blocks,
            arena.free_pages(),
            arena.guard_pool.len()
        );
        Ok(arena)
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Row blocks, ascending by data page count.
    #[inline]
    #[must_use]
    pub fn row_blocks(&self) -> &[RowBlock] {
        &self.row_blocks
    }

    #[inline]
    #[must_use]
    pub fn free_totals(&self) -> &[usize] {
        &self.free_totals
    }

    /// Current owner of row block `index`, `None` if free or out of range.
    #[inline]
    #[must_use]
    pub fn owner(&self, index: usize) -> Option<Ticket> {
        self.owners.get(index).copied().flatten()
    }

    /// Data pages not owned by any ticket.
    #[inline]
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free_totals.last().copied().unwrap_or(0)
    }

    /// Data pages across all row blocks.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.row_blocks.iter().map(|b| b.data_count).sum()
    }

    #[inline]
    #[must_use]
    pub fn data_pool(&self) -> &[PageEntry] {
        &self.data_pool
    }

    #[inline]
    #[must_use]
    pub fn guard_pool(&self) -> &[PageEntry] {
        &self.guard_pool
    }

    #[inline]
    #[must_use]
    pub const fn backing(&self) -> &S {
        &self.backing
    }

    /// Most recently issued ticket id, 0 if none was issued yet.
    #[inline]
    #[must_use]
    pub const fn last_ticket(&self) -> u16 {
        self.last_ticket
    }

    /// Reserve whole row blocks covering at least `size_bytes`.
    ///
    /// A size of 0 requests every free page. Returns `None` if the arena has
    /// no blocks, the ticket space is exhausted, or not enough pages are free.
    pub fn reserve(&mut self, size_bytes: usize) -> Option<Ticket> {
        let top = self.row_blocks.len().checked_sub(1)?;
        let free = self.free_pages();
        let needed = if size_bytes == 0 {
            free
        } else {
            ceil_div(size_bytes, self.page_size)
        };
        if needed == 0 || needed > free {
            trace!("reserve of {needed} pages denied, {free} free");
            return None;
        }
        let ticket = Ticket::new(self.last_ticket.checked_add(1)?)?;

        let mut sp = self.start_index(needed, top);
        self.last_ticket = ticket.get();
        let mut taken = 0;
        loop {
            if self.owners[sp].is_none() {
                self.owners[sp] = Some(ticket);
                taken += self.row_blocks[sp].data_count;
            }
            if taken >= needed || sp == 0 {
                break;
            }
            sp -= 1;
        }
        debug_assert!(taken >= needed);
        self.update_totals(sp);

        trace!("{ticket} reserved {taken} pages for a request of {needed}");
        Some(ticket)
    }

    /// Best-fit starting block: walking down from it collects `needed` pages.
    fn start_index(&self, needed: usize, top: usize) -> usize {
        if self.row_blocks[top].data_count <= needed {
            return top;
        }
        let mut sp = match self
            .row_blocks
            .binary_search_by_key(&needed, |b| b.data_count)
        {
            Ok(exact) => exact,
            Err(insert) => insert.saturating_sub(1),
        };
        while self.free_totals[sp] < needed {
            sp += 1;
        }

        let current = self.row_blocks[sp].data_count;
        if current != needed && sp < top {
            let next = self.row_blocks[sp + 1].data_count;
            if next / needed <= needed / current {
                sp += 1;
            }
        }
        sp
    }

    /// Return every block owned by `ticket` to the free pool.
    ///
    /// Unknown or already released tickets are ignored.
    pub fn release(&mut self, ticket: Ticket) {
        let mut lowest = None;
        for (i, owner) in self.owners.iter_mut().enumerate().rev() {
            if *owner == Some(ticket) {
                *owner = None;
                lowest = Some(i);
            }
        }
        if let Some(lowest) = lowest {
            self.update_totals(lowest);
            trace!("{ticket} released, {} pages free", self.free_pages());
        }
    }

    /// Recompute `free_totals[start..]` from `free_totals[start - 1]`.
    fn update_totals(&mut self, start: usize) {
        let mut acc = start
            .checked_sub(1)
            .map_or(0, |prev| self.free_totals[prev]);
        for i in start..self.row_blocks.len() {
            if self.owners[i].is_none() {
                acc += self.row_blocks[i].data_count;
            }
            self.free_totals[i] = acc;
        }
    }

    /// Pages of `ticket` in increasing physical address order, without
    /// duplicates. Empty for unknown tickets.
    #[must_use]
    pub fn chunks(&self, ticket: Ticket, kind: ChunkKind) -> Chunks<'_> {
        let owned: Vec<&RowBlock> = self
            .row_blocks
            .iter()
            .zip(&self.owners)
            .rev()
            .filter(|&(_, &owner)| owner == Some(ticket))
            .map(|(block, _)| block)
            .collect();

        let mut heap = MergeHeap::with_capacity(capacity_for(owned.len()), page_key as KeyFn);
        for block in owned {
            let run = match kind {
                ChunkKind::Data => &self.data_pool[block.data_range()],
                ChunkKind::Guard => &self.guard_pool[block.guard_range()],
            };
            if let Err(err) = heap.insert(run) {
                debug_assert_eq!(err, MergeHeapError::EmptyRun);
            }
        }
        Chunks { heap, last: None }
    }

    /// Write the backing offsets of `ticket`'s data pages into `out`.
    ///
    /// Returns the total number of distinct pages, which may exceed `out.len()`.
    pub fn data_offsets(&self, ticket: Ticket, out: &mut [BackingOffset]) -> usize {
        self.write_chunks(ticket, ChunkKind::Data, out, |p| p.offset)
    }

    /// Write the backing offsets of `ticket`'s guard pages into `out`.
    ///
    /// Returns the total number of distinct pages, which may exceed `out.len()`.
    pub fn guard_offsets(&self, ticket: Ticket, out: &mut [BackingOffset]) -> usize {
        self.write_chunks(ticket, ChunkKind::Guard, out, |p| p.offset)
    }

    /// Physical address flavor of [`data_offsets`](Self::data_offsets).
    pub fn data_addresses(&self, ticket: Ticket, out: &mut [PhysicalAddress]) -> usize {
        self.write_chunks(ticket, ChunkKind::Data, out, |p| p.phys)
    }

    /// Physical address flavor of [`guard_offsets`](Self::guard_offsets).
    pub fn guard_addresses(&self, ticket: Ticket, out: &mut [PhysicalAddress]) -> usize {
        self.write_chunks(ticket, ChunkKind::Guard, out, |p| p.phys)
    }

    fn write_chunks<V>(
        &self,
        ticket: Ticket,
        kind: ChunkKind,
        out: &mut [V],
        value: impl Fn(&PageEntry) -> V,
    ) -> usize {
        let mut total = 0;
        for entry in self.chunks(ticket, kind) {
            if let Some(slot) = out.get_mut(total) {
                *slot = value(entry);
            }
            total += 1;
        }
        total
    }
}

impl<S: BackingStore> Arena<S> {
    /// Tear the arena down and release its backing store.
    ///
    /// # Errors
    /// Surfaces failures to unmap the backing memory.
    pub fn destroy(self) -> Result<(), TeardownError> {
        debug!("destroying arena with {} row blocks", self.row_blocks.len());
        self.backing.release()
    }
}

type KeyFn = fn(&PageEntry) -> HeapKey;

fn page_key(page: &PageEntry) -> HeapKey {
    page.phys.as_u64()
}

/// Iterator returned by [`Arena::chunks`].
pub struct Chunks<'a> {
    heap: MergeHeap<'a, PageEntry, KeyFn>,
    last: Option<PhysicalAddress>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a PageEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = self.heap.next()?;
            if self.last != Some(page.phys) {
                self.last = Some(page.phys);
                return Some(page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    /// Blocks with the given data counts over distinct, interleaved pages.
    fn arena(counts: &[usize]) -> Arena<()> {
        let mut blocks = Vec::new();
        let mut data = Vec::new();
        for (b, &count) in counts.iter().enumerate() {
            blocks.push(RowBlock {
                data_count: count,
                data_offset: data.len(),
                guard_count: 0,
                guard_offset: 0,
            });
            for p in 0..count {
                let n = (p * counts.len() + b) as u64;
                data.push(PageEntry {
                    phys: PhysicalAddress::new(n * PAGE as u64),
                    offset: BackingOffset::new(n * PAGE as u64),
                });
            }
        }
        Arena::from_parts(PAGE, (), blocks, data, Vec::new()).unwrap()
    }

    #[test]
    fn ticket_zero_is_invalid() {
        assert!(Ticket::new(0).is_none());
        assert_eq!(Ticket::new(7).map(Ticket::get), Some(7));
        assert_eq!(size_of::<Option<Ticket>>(), size_of::<u16>());
    }

    #[test]
    fn from_parts_validates_and_sorts() {
        let page = PageEntry {
            phys: PhysicalAddress::zero(),
            offset: BackingOffset::new(0),
        };
        let block = |count, offset| RowBlock {
            data_count: count,
            data_offset: offset,
            guard_count: 0,
            guard_offset: 0,
        };
        assert_eq!(
            Arena::from_parts(0, (), vec![], vec![], vec![]).unwrap_err(),
            ArenaError::ZeroPageSize
        );
        assert_eq!(
            Arena::from_parts(PAGE, (), vec![block(0, 0)], vec![page], vec![]).unwrap_err(),
            ArenaError::EmptyBlock { index: 0 }
        );
        assert_eq!(
            Arena::from_parts(PAGE, (), vec![block(1, 0), block(2, 0)], vec![page], vec![])
                .unwrap_err(),
            ArenaError::BlockOutOfBounds { index: 1 }
        );

        let a = Arena::from_parts(PAGE, (), vec![block(3, 0), block(1, 3)], vec![page; 4], vec![])
            .unwrap();
        assert_eq!(a.row_blocks()[0].data_count, 1);
        assert_eq!(a.free_totals(), [1, 4]);
    }

    #[test]
    fn exact_fit_is_preferred() {
        let mut a = arena(&[2, 4, 4, 9]);
        let t = a.reserve(4 * PAGE).unwrap();
        let owned: Vec<_> = (0..4).filter(|&i| a.owner(i) == Some(t)).collect();
        assert_eq!(owned.len(), 1);
        assert_eq!(a.row_blocks()[owned[0]].data_count, 4);
        assert_eq!(a.free_pages(), 15);
    }

    #[test]
    fn small_blocks_are_combined_before_a_much_larger_one() {
        let mut a = arena(&[3, 3, 10]);
        let t = a.reserve(4 * PAGE).unwrap();
        assert_eq!(a.owner(0), Some(t));
        assert_eq!(a.owner(1), Some(t));
        assert_eq!(a.owner(2), None);
        assert_eq!(a.free_totals(), [0, 0, 10]);
    }

    #[test]
    fn close_larger_block_wins_the_tie_break() {
        let mut a = arena(&[3, 3, 5]);
        let t = a.reserve(4 * PAGE).unwrap();
        assert_eq!(a.owner(2), Some(t));
        assert_eq!(a.owner(0), None);
        assert_eq!(a.owner(1), None);
    }

    #[test]
    fn walks_past_owned_exact_match() {
        let mut a = arena(&[2, 4, 9]);
        let first = a.reserve(4 * PAGE).unwrap();
        assert_eq!(a.owner(1), Some(first));
        let second = a.reserve(4 * PAGE).unwrap();
        assert_eq!(a.owner(2), Some(second));
        assert_eq!(a.free_totals(), [2, 2, 2]);
    }

    #[test]
    fn zero_size_takes_everything_and_release_restores() {
        let mut a = arena(&[1, 2, 3]);
        let before = a.free_totals().to_vec();
        let t = a.reserve(0).unwrap();
        assert_eq!(a.free_pages(), 0);
        assert!(a.reserve(0).is_none());
        assert!(a.reserve(1).is_none());
        a.release(t);
        assert_eq!(a.free_totals(), before);
        a.release(t);
        assert_eq!(a.free_totals(), before);
    }

    #[test]
    fn tickets_are_monotonic_until_exhausted() {
        let mut a = arena(&[1]);
        a.last_ticket = u16::MAX - 1;
        let t = a.reserve(1).unwrap();
        assert_eq!(t.get(), u16::MAX);
        a.release(t);
        assert!(a.reserve(1).is_none());
        assert_eq!(a.free_pages(), 1);
    }

    #[test]
    fn chunks_merge_blocks_in_address_order() {
        let mut a = arena(&[2, 3]);
        let t = a.reserve(0).unwrap();
        let addrs: Vec<u64> = a
            .chunks(t, ChunkKind::Data)
            .map(|p| p.phys.as_u64() / PAGE as u64)
            .collect();
        assert_eq!(addrs, [0, 1, 2, 3, 5]);

        let mut short = [BackingOffset::default(); 2];
        assert_eq!(a.data_offsets(t, &mut short), 5);
        assert_eq!(short, [BackingOffset::new(0), BackingOffset::new(0x1000)]);
    }

    #[test]
    fn unknown_ticket_yields_nothing() {
        let a = arena(&[2]);
        let mut out = [PhysicalAddress::zero(); 4];
        let ghost = Ticket::new(9).unwrap();
        assert_eq!(a.data_addresses(ghost, &mut out), 0);
        assert_eq!(a.guard_addresses(ghost, &mut out), 0);
        assert_eq!(out, [PhysicalAddress::zero(); 4]);
    }
}
