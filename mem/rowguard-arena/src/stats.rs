use core::fmt;

/// Outcome of a successful [`ArenaBuilder::build`](crate::ArenaBuilder::build).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    /// Pages handed out through row blocks.
    pub data_pages: usize,
    /// Pages kept as guards around row blocks.
    pub guard_pages: usize,
    /// Pages returned to the system.
    pub dropped_pages: usize,
    /// Backing regions tried, including the successful one.
    pub attempts: usize,
}

impl ArenaStats {
    /// All pages of the final backing region.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.data_pages + self.guard_pages + self.dropped_pages
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} data, {} guard, {} dropped pages after {} attempt(s)",
            self.data_pages, self.guard_pages, self.dropped_pages, self.attempts
        )
    }
}
