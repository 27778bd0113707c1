//! # Row-Isolated Page Arena
//!
//! Carves a large, locked memory region into *row blocks*: groups of whole
//! DRAM rows that are separated from every other block by guard rows. Pages
//! of different reservations therefore never share a DRAM row, and writes to
//! one reservation cannot disturb rows adjacent to another.
//!
//! ## Pieces
//!
//! | Module | Role |
//! |:-------|:-----|
//! | [`builder`] | Acquires backing memory and retries until enough data pages survive classification. |
//! | [`classify`] | Boundary marking (pass 1) and row block assembly (pass 2). |
//! | [`arena`] | Ticketed reservation and release of whole row blocks; page enumeration. |
//! | [`backing`] | Backing store trait and the memfd implementation. |
//! | [`mapper`] | Maps a ticket's pages into one contiguous aligned range. |
//!
//! ## Example
//! ```no_run
//! use rowguard_arena::{ArenaBuilder, MemfdSource, mapper};
//! use rowguard_addresses::BackingOffset;
//! use rowguard_geometry::{DramGeometry, LinearResolver, PagemapTranslator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = LinearResolver::new(PagemapTranslator::open()?, DramGeometry::new(1024, 8));
//! let (mut arena, stats) = ArenaBuilder::new(resolver, MemfdSource::new()).build(16 << 20)?;
//! println!("{stats}");
//!
//! let ticket = arena.reserve(1 << 20).expect("free capacity");
//! let mut offsets = vec![BackingOffset::default(); arena.total_pages()];
//! let n = arena.data_offsets(ticket, &mut offsets);
//! let region = mapper::map_offsets(None, 2 << 20, arena.backing(), &offsets[..n], arena.page_size())?;
//! region.unmap()?;
//!
//! arena.release(ticket);
//! arena.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod backing;
pub mod builder;
pub mod classify;
mod config;
mod errors;
pub mod mapper;
mod stats;

pub use crate::arena::{Arena, ChunkKind, Chunks, PageEntry, RowBlock, Ticket};
pub use crate::backing::{BackingSource, BackingStore, MemfdSource, MemfdStore};
pub use crate::builder::ArenaBuilder;
pub use crate::config::BuilderConfig;
pub use crate::errors::{ArenaError, BackingError, BuildError, MapError, TeardownError};
pub use crate::mapper::MappedRegion;
pub use crate::stats::ArenaStats;
