use crate::{DramGeometry, GeometryError};
use rowguard_addresses::{BackingOffset, PhysicalAddress, VirtualAddress};

/// One page of a mapped region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MappedPage {
    pub virt: VirtualAddress,
    pub phys: PhysicalAddress,
}

/// A run of entries that are consecutive in DRAM row/column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRange {
    /// Column of the first entry within its row.
    pub start_column: usize,
    /// Page index (into [`RegionMap::pages`]) of every entry, in DRAM order.
    pub entries: Vec<usize>,
}

impl EntryRange {
    #[must_use]
    pub const fn new(start_column: usize, entries: Vec<usize>) -> Self {
        Self {
            start_column,
            entries,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Page and DRAM-range view of one mapped region.
///
/// # Invariants
/// - The geometry is valid and its row length is a multiple of `entry_len`.
/// - Every entry refers to an existing page.
/// - Every range starts inside a row.
#[derive(Debug, Clone)]
pub struct RegionMap {
    base: VirtualAddress,
    page_size: usize,
    entry_len: usize,
    geometry: DramGeometry,
    pages: Vec<MappedPage>,
    ranges: Vec<EntryRange>,
}

impl RegionMap {
    /// Assemble a region map, checking its invariants.
    ///
    /// # Errors
    /// See the invariants on [`RegionMap`].
    pub fn new(
        base: VirtualAddress,
        page_size: usize,
        entry_len: usize,
        geometry: DramGeometry,
        pages: Vec<MappedPage>,
        ranges: Vec<EntryRange>,
    ) -> Result<Self, GeometryError> {
        if !geometry.is_valid() || page_size == 0 || entry_len == 0 {
            return Err(GeometryError::InvalidGeometry(geometry));
        }
        let row_len = geometry.row_len();
        if row_len % entry_len != 0 {
            return Err(GeometryError::RowNotEntryMultiple { row_len, entry_len });
        }
        for (ri, range) in ranges.iter().enumerate() {
            if range.start_column >= geometry.columns_per_row {
                return Err(GeometryError::ColumnOutOfBounds {
                    range: ri,
                    column: range.start_column,
                    columns: geometry.columns_per_row,
                });
            }
            if let Some(&page) = range.entries.iter().find(|&&p| p >= pages.len()) {
                return Err(GeometryError::EntryOutOfBounds {
                    range: ri,
                    page,
                    pages: pages.len(),
                });
            }
        }
        Ok(Self {
            base,
            page_size,
            entry_len,
            geometry,
            pages,
            ranges,
        })
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size in bytes of one range entry.
    #[inline]
    #[must_use]
    pub const fn entry_len(&self) -> usize {
        self.entry_len
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> DramGeometry {
        self.geometry
    }

    /// Number of entries spanning one DRAM row.
    #[inline]
    #[must_use]
    pub const fn entries_per_row(&self) -> usize {
        self.geometry.row_len() / self.entry_len
    }

    /// Entries from `column` up to the end of its row.
    #[inline]
    #[must_use]
    pub const fn entries_to_row_end(&self, column: usize) -> usize {
        (self.geometry.columns_per_row - column) * self.geometry.cell_size / self.entry_len
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> &[MappedPage] {
        &self.pages
    }

    #[inline]
    #[must_use]
    pub fn ranges(&self) -> &[EntryRange] {
        &self.ranges
    }

    /// Byte offset of page `page` from the region base.
    ///
    /// # Panics
    /// Panics if `page` is out of bounds.
    #[must_use]
    pub fn offset_of(&self, page: usize) -> BackingOffset {
        BackingOffset::new(self.pages[page].virt.as_u64() - self.base.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: usize) -> Vec<MappedPage> {
        (0..n as u64)
            .map(|i| MappedPage {
                virt: VirtualAddress::new(0x7000_0000 + i * 0x1000),
                phys: PhysicalAddress::new(0x10_0000 + i * 0x1000),
            })
            .collect()
    }

    #[test]
    fn rejects_inconsistent_maps() {
        let base = VirtualAddress::new(0x7000_0000);
        let g = DramGeometry::new(1024, 8);

        let bad_len = RegionMap::new(base, 4096, 3000, g, pages(2), vec![]);
        assert!(matches!(
            bad_len,
            Err(GeometryError::RowNotEntryMultiple { .. })
        ));

        let bad_page = RegionMap::new(base, 4096, 4096, g, pages(2), vec![EntryRange::new(0, vec![0, 2])]);
        assert!(matches!(
            bad_page,
            Err(GeometryError::EntryOutOfBounds { page: 2, .. })
        ));

        let bad_col = RegionMap::new(base, 4096, 4096, g, pages(2), vec![EntryRange::new(1024, vec![0])]);
        assert!(matches!(bad_col, Err(GeometryError::ColumnOutOfBounds { .. })));
    }

    #[test]
    fn derived_quantities() {
        let base = VirtualAddress::new(0x7000_0000);
        let g = DramGeometry::new(1024, 8);
        let map = RegionMap::new(
            base,
            4096,
            4096,
            g,
            pages(4),
            vec![EntryRange::new(512, vec![1, 2, 3]), EntryRange::new(0, vec![0])],
        )
        .unwrap();
        assert_eq!(map.entries_per_row(), 2);
        assert_eq!(map.entries_to_row_end(512), 1);
        assert_eq!(map.entries_to_row_end(0), 2);
        assert_eq!(map.ranges()[0].len(), 3);
        assert_eq!(map.offset_of(3), BackingOffset::new(0x3000));
    }
}
