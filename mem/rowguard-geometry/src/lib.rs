//! # DRAM Geometry and Address Translation
//!
//! The arena builder needs to know, for every page of a freshly mapped backing
//! region, *where in DRAM* that page lives. This crate provides the interface
//! it consumes and a minimal implementation for Linux.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              GeometryResolver                       │
//! │    • page size and DRAM row geometry                │
//! │    • map_region(): pages + DRAM-ordered ranges      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Translator                             │
//! │    • virtual → physical, one page at a time         │
//! │    • PagemapTranslator: /proc/self/pagemap          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Region maps
//!
//! [`GeometryResolver::map_region`] produces a [`RegionMap`]: the list of
//! mapped pages with their virtual and physical addresses, plus a list of
//! [`EntryRange`]s. A range is a run of *entries* (units of
//! [`RegionMap::entry_len`] bytes) that are consecutive in DRAM row/column
//! order; each entry refers back to the page containing it. A range may start
//! in the middle of a row ([`EntryRange::start_column`]); one DRAM row spans
//! [`RegionMap::entries_per_row`] entries.
//!
//! The shipped [`LinearResolver`] treats physical memory as consecutive rows of
//! [`DramGeometry::row_len`] bytes. Resolvers for interleaved memory
//! controllers plug in through the same trait.

mod linear;
mod pagemap;
mod region;
mod translate;

pub use crate::linear::LinearResolver;
pub use crate::pagemap::{PagemapEntry, PagemapTranslator};
pub use crate::region::{EntryRange, MappedPage, RegionMap};
pub use crate::translate::{TranslateError, Translator};

use rowguard_addresses::VirtualAddress;

/// Row geometry of the memory system.
///
/// One DRAM row spans `columns_per_row * cell_size` bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DramGeometry {
    /// Number of columns in one row.
    pub columns_per_row: usize,
    /// Bytes stored per column (across the rank).
    pub cell_size: usize,
}

impl DramGeometry {
    #[must_use]
    pub const fn new(columns_per_row: usize, cell_size: usize) -> Self {
        Self {
            columns_per_row,
            cell_size,
        }
    }

    /// Length of one DRAM row in bytes.
    #[inline]
    #[must_use]
    pub const fn row_len(&self) -> usize {
        self.columns_per_row * self.cell_size
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.columns_per_row > 0 && self.cell_size > 0
    }
}

/// Supplies translation and row geometry for a mapped region.
pub trait GeometryResolver {
    /// Translation granularity in bytes (the arena's page size).
    fn page_size(&self) -> usize;

    /// Row geometry of the underlying memory system.
    fn geometry(&self) -> DramGeometry;

    /// Size in bytes of one range entry; divides the row length.
    fn entry_len(&self) -> usize {
        self.page_size()
    }

    /// Build the page and range view of `[base, base + len)`.
    ///
    /// The region must be mapped and resident (locked) for the physical
    /// addresses to be meaningful.
    ///
    /// # Errors
    /// Fails if the region is not page aligned, if the geometry is
    /// inconsistent with the page size, or if any page cannot be translated.
    fn map_region(&self, base: VirtualAddress, len: usize) -> Result<RegionMap, GeometryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid DRAM geometry {0:?}")]
    InvalidGeometry(DramGeometry),
    #[error("row length {row_len} is not a multiple of the entry length {entry_len}")]
    RowNotEntryMultiple { row_len: usize, entry_len: usize },
    #[error("region at {base} with length {len:#x} is not aligned to {page_size:#x}")]
    Unaligned {
        base: VirtualAddress,
        len: usize,
        page_size: usize,
    },
    #[error("range {range} refers to page {page}, but only {pages} pages are mapped")]
    EntryOutOfBounds {
        range: usize,
        page: usize,
        pages: usize,
    },
    #[error("range {range} starts at column {column}, beyond {columns} columns per row")]
    ColumnOutOfBounds {
        range: usize,
        column: usize,
        columns: usize,
    },
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_len_is_columns_times_cells() {
        let g = DramGeometry::new(1024, 8);
        assert_eq!(g.row_len(), 8192);
        assert!(g.is_valid());
        assert!(!DramGeometry::new(0, 8).is_valid());
    }
}
