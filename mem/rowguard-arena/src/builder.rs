//! # Arena construction
//!
//! Each attempt acquires a backing region, asks the geometry resolver where its
//! pages live, classifies them and assembles row blocks:
//!
//! ```text
//!  acquire ─► map_region ─► mark_boundaries ─► enough usable? ─► assemble ─► enough data? ─► finalize
//!                                                    │ no                          │ no
//!                                                    └──────── grow region ◄───────┘
//! ```
//!
//! Only a short yield is retried, with a region twice as large (roughly) as
//! the previous one. OS and geometry failures abort the build.

use crate::arena::Arena;
use crate::backing::{BackingSource, BackingStore};
use crate::classify::{self, PageFlags};
use crate::config::BuilderConfig;
use crate::errors::{ArenaError, BackingError, BuildError};
use crate::stats::ArenaStats;
use log::{debug, info};
use rowguard_addresses::ceil_div;
use rowguard_geometry::{GeometryResolver, RegionMap};

/// Builds [`Arena`]s from a geometry resolver and a backing source.
pub struct ArenaBuilder<R, B> {
    resolver: R,
    source: B,
    config: BuilderConfig,
}

impl<R, B> ArenaBuilder<R, B>
where
    R: GeometryResolver,
    B: BackingSource,
{
    #[must_use]
    pub fn new(resolver: R, source: B) -> Self {
        Self {
            resolver,
            source,
            config: BuilderConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap row blocks at `rows` DRAM rows each (0 for no limit).
    #[must_use]
    pub const fn with_max_rows_per_block(mut self, rows: usize) -> Self {
        self.config.max_rows_per_block = rows;
        self
    }

    /// Build an arena with at least `size_hint` bytes of data pages.
    ///
    /// # Errors
    /// - [`BuildError::Backing`], [`BuildError::Geometry`]: the OS or the
    ///   resolver failed; nothing is retried.
    /// - [`BuildError::RegionTooLarge`]: the next region length overflows.
    /// - [`BuildError::GaveUp`]: no attempt yielded enough data pages.
    pub fn build(&mut self, size_hint: usize) -> Result<(Arena<B::Store>, ArenaStats), BuildError> {
        let page_size = self.resolver.page_size();
        if page_size == 0 {
            return Err(ArenaError::ZeroPageSize.into());
        }
        let required = ceil_div(size_hint, page_size);
        let shift = self.config.initial_shift(size_hint, page_size);
        info!("building arena for {size_hint:#x} bytes ({required} pages of {page_size:#x})");

        let mut best_usable = 0;
        let mut best_yield = 0;
        for attempt in 0..self.config.max_attempts {
            let len = isize::try_from(attempt)
                .ok()
                .and_then(|n| self.config.region_len(size_hint, shift + n))
                .and_then(|len| len.checked_next_multiple_of(page_size))
                .ok_or(BuildError::RegionTooLarge { size_hint })?;

            let mut store = self.source.acquire(len)?;
            let map = self.resolver.map_region(store.base(), len)?;

            let mut flags = classify::mark_boundaries(&map);
            let usable = classify::usable_pages(&flags);
            best_usable = best_usable.max(usable);
            if usable < required {
                debug!(
                    "attempt {}: {len:#x} byte region has {usable} of {required} usable pages",
                    attempt + 1
                );
                continue;
            }

            let assembly = classify::assemble(&map, &mut flags, self.config.max_rows_per_block);
            let data = assembly.data_pool.len();
            if data < required {
                debug!(
                    "attempt {}: {len:#x} byte region yields {data} of {required} data pages",
                    attempt + 1
                );
                best_yield = best_yield.max(data);
                continue;
            }

            let mut stats = self.finalize(&mut store, &map, &flags)?;
            stats.attempts = attempt + 1;
            let arena = Arena::from_parts(
                page_size,
                store,
                assembly.row_blocks,
                assembly.data_pool,
                assembly.guard_pool,
            )?;
            info!(
                "arena built from a {len:#x} byte region: {stats}, {} row blocks",
                arena.row_blocks().len()
            );
            return Ok((arena, stats));
        }

        Err(BuildError::GaveUp {
            attempts: self.config.max_attempts,
            best_usable,
            best_yield,
            required,
        })
    }

    /// Zero data pages, paint guard pages and discard the rest.
    fn finalize(
        &self,
        store: &mut B::Store,
        map: &RegionMap,
        flags: &[PageFlags],
    ) -> Result<ArenaStats, BackingError> {
        let page_size = map.page_size();
        let mut stats = ArenaStats::default();
        for (page, &flag) in flags.iter().enumerate() {
            let offset = map.offset_of(page);
            if flag.contains(PageFlags::ROWBLOCK) {
                store.fill(offset, page_size, 0)?;
                stats.data_pages += 1;
            } else if flag.intersects(PageFlags::GUARD) {
                store.fill(offset, page_size, self.config.guard_byte)?;
                stats.guard_pages += 1;
            } else {
                store.discard(offset, page_size)?;
                stats.dropped_pages += 1;
            }
        }
        Ok(stats)
    }
}
