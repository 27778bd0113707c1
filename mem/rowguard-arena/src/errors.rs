use rowguard_addresses::BackingOffset;
use rowguard_geometry::GeometryError;
use std::io;

/// Failures while acquiring or shaping the backing store.
#[derive(Debug, thiserror::Error)]
pub enum BackingError {
    #[error("failed to create the backing memory file")]
    Create(#[source] io::Error),
    #[error("failed to resize the backing memory file to {len:#x} bytes")]
    Resize {
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to map {len:#x} bytes of backing memory")]
    Map {
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to lock {len:#x} bytes of backing memory")]
    Lock {
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to discard backing page at {offset}")]
    Discard {
        offset: BackingOffset,
        #[source]
        source: io::Error,
    },
    #[error("range {offset} + {len:#x} lies outside the {size:#x} byte backing store")]
    OutOfBounds {
        offset: BackingOffset,
        len: usize,
        size: usize,
    },
    #[error("range {offset} + {len:#x} overlaps discarded backing memory")]
    Discarded { offset: BackingOffset, len: usize },
}

/// Failures while releasing OS resources.
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("failed to unmap {len:#x} bytes")]
    Unmap {
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// Inconsistent row-block tables handed to [`Arena::from_parts`](crate::Arena::from_parts).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("page size must be non-zero")]
    ZeroPageSize,
    #[error("row block {index} has no data pages")]
    EmptyBlock { index: usize },
    #[error("row block {index} references entries outside its page pool")]
    BlockOutOfBounds { index: usize },
}

/// Failures of [`ArenaBuilder::build`](crate::ArenaBuilder::build).
///
/// Everything but [`GaveUp`](Self::GaveUp) is fatal on first occurrence.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Backing(#[from] BackingError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("backing region for a size hint of {size_hint:#x} bytes overflows the address space")]
    RegionTooLarge { size_hint: usize },
    #[error("gave up after {attempts} attempts: {best_usable} usable, {best_yield} of {required} data pages")]
    GaveUp {
        attempts: usize,
        /// Most pages any attempt kept after boundary marking.
        best_usable: usize,
        /// Most data pages any attempt assembled into row blocks.
        best_yield: usize,
        required: usize,
    },
}

/// Failures of [`map_offsets`](crate::mapper::map_offsets).
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("nothing to map")]
    Empty,
    #[error("alignment {0:#x} is not a power of two")]
    InvalidAlignment(usize),
    #[error("failed to reserve {len:#x} bytes of address space")]
    Reserve {
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to map chunk {index} at backing offset {offset}")]
    MapChunk {
        index: usize,
        offset: BackingOffset,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Unmap(#[from] TeardownError),
}
