//! Linear physical-to-DRAM mapping.
//!
//! Physical memory is modelled as consecutive rows of `row_len` bytes: the
//! row of an address is `pa / row_len`, its column `(pa % row_len) / cell_size`.
//! Pages that are physically contiguous are therefore also contiguous in DRAM
//! order, and each such run becomes one [`EntryRange`].

use crate::region::{EntryRange, MappedPage, RegionMap};
use crate::translate::Translator;
use crate::{DramGeometry, GeometryError, GeometryResolver};
use log::debug;
use rowguard_addresses::VirtualAddress;

pub struct LinearResolver<T> {
    translator: T,
    geometry: DramGeometry,
}

impl<T: Translator> LinearResolver<T> {
    #[must_use]
    pub const fn new(translator: T, geometry: DramGeometry) -> Self {
        Self {
            translator,
            geometry,
        }
    }

    fn check(&self, base: VirtualAddress, len: usize) -> Result<(), GeometryError> {
        let page_size = self.page_size();
        if !self.geometry.is_valid() || page_size == 0 {
            return Err(GeometryError::InvalidGeometry(self.geometry));
        }
        let row_len = self.geometry.row_len();
        if row_len % page_size != 0 {
            return Err(GeometryError::RowNotEntryMultiple {
                row_len,
                entry_len: page_size,
            });
        }
        if !base.is_aligned(page_size) || len % page_size != 0 {
            return Err(GeometryError::Unaligned {
                base,
                len,
                page_size,
            });
        }
        Ok(())
    }
}

impl<T: Translator> GeometryResolver for LinearResolver<T> {
    fn page_size(&self) -> usize {
        self.translator.granularity()
    }

    fn geometry(&self) -> DramGeometry {
        self.geometry
    }

    #[allow(clippy::cast_possible_truncation)]
    fn map_region(&self, base: VirtualAddress, len: usize) -> Result<RegionMap, GeometryError> {
        self.check(base, len)?;
        let page_size = self.page_size();
        let row_len = self.geometry.row_len();

        let pages = (0..len / page_size)
            .map(|i| {
                let virt = base + (i * page_size) as u64;
                let phys = self.translator.translate(virt)?;
                Ok(MappedPage { virt, phys })
            })
            .collect::<Result<Vec<_>, GeometryError>>()?;

        let mut order: Vec<usize> = (0..pages.len()).collect();
        order.sort_unstable_by_key(|&i| pages[i].phys);

        let mut ranges: Vec<EntryRange> = Vec::new();
        let mut prev = None;
        for &i in &order {
            let pa = pages[i].phys;
            match (prev, ranges.last_mut()) {
                (Some(p), Some(range)) if pa.as_u64() == p + page_size as u64 => {
                    range.entries.push(i);
                }
                _ => {
                    let column = (pa.offset_in(row_len) / self.geometry.cell_size as u64) as usize;
                    ranges.push(EntryRange::new(column, vec![i]));
                }
            }
            prev = Some(pa.as_u64());
        }

        debug!(
            "mapped {} pages at {base} into {} physically contiguous ranges",
            pages.len(),
            ranges.len()
        );
        RegionMap::new(base, page_size, page_size, self.geometry, pages, ranges)
    }
}
