//! # Page classification
//!
//! Turns a [`RegionMap`] into row blocks in two passes over its entry ranges.
//!
//! **Pass 1** ([`mark_boundaries`]) flags pages that must not anchor a row
//! block. A partial row at either end of a range is `UNSAFE`; the first full
//! row after such a boundary and the last full row before one are `EDGE`:
//!
//! ```text
//!  range:  ..part│ full │ full │ full │ full │part..
//!  flags:  UNSAFE│ EDGE │  -   │  -   │ EDGE │UNSAFE
//! ```
//!
//! **Pass 2** ([`assemble`]) collects the unflagged entries into blocks of
//! whole rows. The row before a block becomes its pre-guard, the row after it
//! its post-guard. With a row cap, the row at which the cap hits is the
//! post-guard of one block and the pre-guard of the next, so it is listed in
//! both blocks' guard ranges.

use crate::arena::{PageEntry, RowBlock};
use bitflags::bitflags;
use rowguard_geometry::RegionMap;

bitflags! {
    /// Classification of one page of the backing region.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Part of a row that is not fully contained in the range.
        const UNSAFE = 1 << 0;
        /// Full row adjacent to a range boundary.
        const EDGE = 1 << 1;
        /// Row preceding a row block.
        const GUARD_PRE = 1 << 2;
        /// Row following a row block.
        const GUARD_POST = 1 << 3;
        /// Data page of a row block.
        const ROWBLOCK = 1 << 4;

        const BOUNDARY = Self::UNSAFE.bits() | Self::EDGE.bits();
        const GUARD = Self::GUARD_PRE.bits() | Self::GUARD_POST.bits();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RowState {
    /// No full row seen since the last boundary.
    RowStart,
    /// Inside a run of full rows.
    MidRow,
}

/// Pass 1: flag boundary pages. Returns one entry per mapped page.
#[must_use]
pub fn mark_boundaries(map: &RegionMap) -> Vec<PageFlags> {
    let mut flags = vec![PageFlags::empty(); map.pages().len()];
    let epr = map.entries_per_row();

    for range in map.ranges() {
        let entries = &range.entries;
        let count = entries.len();
        let mut ei = 0;

        if range.start_column != 0 {
            let lead = map.entries_to_row_end(range.start_column).min(count);
            mark(&mut flags, &entries[..lead], PageFlags::UNSAFE);
            ei = lead;
        }

        let mut state = RowState::RowStart;
        while ei < count {
            let rem = count - ei;
            match state {
                RowState::MidRow if rem >= 2 * epr => {
                    ei += epr;
                }
                RowState::MidRow if rem >= epr => {
                    mark(&mut flags, &entries[ei..ei + epr], PageFlags::EDGE);
                    ei += epr;
                    state = RowState::RowStart;
                }
                RowState::MidRow => state = RowState::RowStart,
                RowState::RowStart if rem >= epr => {
                    mark(&mut flags, &entries[ei..ei + epr], PageFlags::EDGE);
                    ei += epr;
                    state = RowState::MidRow;
                }
                RowState::RowStart => {
                    mark(&mut flags, &entries[ei..], PageFlags::UNSAFE);
                    ei = count;
                }
            }
        }
    }
    flags
}

fn mark(flags: &mut [PageFlags], pages: &[usize], flag: PageFlags) {
    for &page in pages {
        flags[page] |= flag;
    }
}

/// Pages that survived pass 1.
#[must_use]
pub fn usable_pages(flags: &[PageFlags]) -> usize {
    flags
        .iter()
        .filter(|f| !f.intersects(PageFlags::BOUNDARY))
        .count()
}

/// Row blocks and page pools produced by [`assemble`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// Blocks in assembly order.
    pub row_blocks: Vec<RowBlock>,
    pub data_pool: Vec<PageEntry>,
    pub guard_pool: Vec<PageEntry>,
}

/// Pass 2: collect data and guard pages into row blocks.
///
/// A block holds at most `max_rows_per_block` rows (0 for no limit). Each
/// block's data and guard ranges are sorted by physical address.
#[must_use]
pub fn assemble(map: &RegionMap, flags: &mut [PageFlags], max_rows_per_block: usize) -> Assembly {
    const INELIGIBLE: PageFlags = PageFlags::BOUNDARY.union(PageFlags::GUARD);

    let epr = map.entries_per_row();
    let cap = max_rows_per_block.saturating_mul(epr);
    let entry = |page: usize| PageEntry {
        phys: map.pages()[page].phys,
        offset: map.offset_of(page),
    };

    let mut out = Assembly::default();
    let mut data_start = 0;
    let mut guard_start = 0;

    for range in map.ranges() {
        let entries = &range.entries;
        let mut block_entries = 0;

        for (ei, &page) in entries.iter().enumerate() {
            let open = out.data_pool.len() > data_start;
            let eligible =
                !flags[page].intersects(INELIGIBLE) && (cap == 0 || block_entries < cap);

            if eligible {
                if !flags[page].contains(PageFlags::ROWBLOCK) {
                    if !open {
                        let guard = &entries[ei.saturating_sub(epr)..ei];
                        add_guards(flags, guard, PageFlags::GUARD_PRE, &mut out.guard_pool, entry);
                    }
                    flags[page] |= PageFlags::ROWBLOCK;
                    out.data_pool.push(entry(page));
                }
                block_entries += 1;
            } else if open {
                let guard = &entries[ei..(ei + epr).min(entries.len())];
                add_guards(flags, guard, PageFlags::GUARD_POST, &mut out.guard_pool, entry);
                close_block(&mut out, &mut data_start, &mut guard_start);
                block_entries = 0;
            }
        }

        // Pass 1 always flags a range's tail, so this only closes blocks
        // for flag sets that were not produced by `mark_boundaries`.
        if out.data_pool.len() > data_start {
            close_block(&mut out, &mut data_start, &mut guard_start);
        }
    }
    out
}

fn add_guards(
    flags: &mut [PageFlags],
    pages: &[usize],
    flag: PageFlags,
    pool: &mut Vec<PageEntry>,
    entry: impl Fn(usize) -> PageEntry,
) {
    for &page in pages {
        if !flags[page].intersects(flag | PageFlags::ROWBLOCK) {
            flags[page] |= flag;
            pool.push(entry(page));
        }
    }
}

fn close_block(out: &mut Assembly, data_start: &mut usize, guard_start: &mut usize) {
    out.data_pool[*data_start..].sort_unstable_by_key(|p| p.phys);
    out.guard_pool[*guard_start..].sort_unstable_by_key(|p| p.phys);
    out.row_blocks.push(RowBlock {
        data_count: out.data_pool.len() - *data_start,
        data_offset: *data_start,
        guard_count: out.guard_pool.len() - *guard_start,
        guard_offset: *guard_start,
    });
    *data_start = out.data_pool.len();
    *guard_start = out.guard_pool.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_addresses::{PhysicalAddress, VirtualAddress};
    use rowguard_geometry::{DramGeometry, EntryRange, MappedPage};

    const PAGE: u64 = 4096;

    /// `n` pages with physical frame `frame0 + i`, two pages per row.
    fn map(n: usize, ranges: Vec<EntryRange>) -> RegionMap {
        let pages = (0..n as u64)
            .map(|i| MappedPage {
                virt: VirtualAddress::new(0x7000_0000 + i * PAGE),
                phys: PhysicalAddress::new(0x100_0000 + i * PAGE),
            })
            .collect();
        RegionMap::new(
            VirtualAddress::new(0x7000_0000),
            PAGE as usize,
            PAGE as usize,
            DramGeometry::new(1024, 8),
            pages,
            ranges,
        )
        .unwrap()
    }

    fn flagged(flags: &[PageFlags], flag: PageFlags) -> Vec<usize> {
        (0..flags.len()).filter(|&i| flags[i].contains(flag)).collect()
    }

    #[test]
    fn aligned_range_gets_edge_rows() {
        let m = map(8, vec![EntryRange::new(0, (0..8).collect())]);
        let flags = mark_boundaries(&m);
        assert_eq!(flagged(&flags, PageFlags::EDGE), [0, 1, 6, 7]);
        assert!(flagged(&flags, PageFlags::UNSAFE).is_empty());
        assert_eq!(usable_pages(&flags), 4);
    }

    #[test]
    fn partial_rows_are_unsafe() {
        // Starts mid-row, then 3 full rows, then half a row.
        let m = map(8, vec![EntryRange::new(512, (0..8).collect())]);
        let flags = mark_boundaries(&m);
        assert_eq!(flagged(&flags, PageFlags::UNSAFE), [0, 7]);
        assert_eq!(flagged(&flags, PageFlags::EDGE), [1, 2, 5, 6]);
        assert_eq!(usable_pages(&flags), 2);
    }

    #[test]
    fn short_ranges_are_entirely_unusable() {
        let m = map(3, vec![EntryRange::new(0, vec![0]), EntryRange::new(0, vec![1, 2])]);
        let flags = mark_boundaries(&m);
        assert_eq!(flags[0], PageFlags::UNSAFE);
        assert_eq!(flags[1], PageFlags::EDGE);
        assert_eq!(flags[2], PageFlags::EDGE);
        assert_eq!(usable_pages(&flags), 0);
    }

    #[test]
    fn block_is_wrapped_in_guard_rows() {
        let m = map(8, vec![EntryRange::new(0, (0..8).collect())]);
        let mut flags = mark_boundaries(&m);
        let a = assemble(&m, &mut flags, 0);

        assert_eq!(a.row_blocks.len(), 1);
        let block = a.row_blocks[0];
        assert_eq!(block.data_count, 4);
        assert_eq!(block.guard_count, 4);
        let guards: Vec<u64> = a.guard_pool.iter().map(|p| p.offset.as_u64() / PAGE).collect();
        assert_eq!(guards, [0, 1, 6, 7]);
        assert_eq!(flagged(&flags, PageFlags::ROWBLOCK), [2, 3, 4, 5]);
    }

    #[test]
    fn row_cap_splits_blocks_and_shares_guards() {
        let m = map(16, vec![EntryRange::new(0, (0..16).collect())]);
        let mut flags = mark_boundaries(&m);
        let a = assemble(&m, &mut flags, 2);

        assert_eq!(a.row_blocks.len(), 2);
        let pages = |pool: &[PageEntry], r: std::ops::Range<usize>| -> Vec<u64> {
            pool[r].iter().map(|p| p.offset.as_u64() / PAGE).collect()
        };
        let (b0, b1) = (a.row_blocks[0], a.row_blocks[1]);
        assert_eq!(pages(&a.data_pool, b0.data_range()), [2, 3, 4, 5]);
        assert_eq!(pages(&a.guard_pool, b0.guard_range()), [0, 1, 6, 7]);
        assert_eq!(pages(&a.data_pool, b1.data_range()), [8, 9, 10, 11]);
        assert_eq!(pages(&a.guard_pool, b1.guard_range()), [6, 7, 12, 13]);

        assert!(flags[6].contains(PageFlags::GUARD));
        assert_eq!(flags[14], PageFlags::EDGE);
    }

    #[test]
    fn unflagged_range_end_closes_the_block() {
        let m = map(6, vec![EntryRange::new(0, (0..6).collect())]);
        let mut flags = vec![PageFlags::empty(); 6];
        flags[0] = PageFlags::EDGE;
        flags[1] = PageFlags::EDGE;
        let a = assemble(&m, &mut flags, 0);

        assert_eq!(a.row_blocks.len(), 1);
        assert_eq!(a.row_blocks[0].data_count, 4);
        // Only the pre-guard row; nothing follows the block.
        assert_eq!(a.row_blocks[0].guard_count, 2);
        assert_eq!(flagged(&flags, PageFlags::GUARD_POST), Vec::<usize>::new());
    }

    #[test]
    fn block_ranges_are_sorted_by_physical_address() {
        // DRAM order differs from page order: 3 2 1 0 5 4 7 6.
        let order = vec![3, 2, 1, 0, 5, 4, 7, 6];
        let m = map(8, vec![EntryRange::new(0, order)]);
        let mut flags = mark_boundaries(&m);
        let a = assemble(&m, &mut flags, 0);
        let block = a.row_blocks[0];
        let data = &a.data_pool[block.data_range()];
        assert!(data.windows(2).all(|w| w[0].phys < w[1].phys));
        let guard = &a.guard_pool[block.guard_range()];
        assert!(guard.windows(2).all(|w| w[0].phys < w[1].phys));
    }
}
