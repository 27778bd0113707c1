/// Tuning knobs of [`ArenaBuilder`](crate::ArenaBuilder).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Smallest backing region ever requested, in bytes.
    pub min_region_len: usize,
    /// Size hints up to this many bytes start with a region three times the
    /// hint; larger hints start at one and a half times the hint.
    pub growth_threshold: usize,
    /// Byte written to every guard page.
    pub guard_byte: u8,
    /// Upper bound on rows per row block, 0 for no limit.
    pub max_rows_per_block: usize,
    /// Attempts before giving up on a too small usable yield.
    pub max_attempts: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_region_len: 32 * 1024 * 1024,
            growth_threshold: 128 * 1024 * 1024,
            guard_byte: 0xAA,
            max_rows_per_block: 0,
            max_attempts: 16,
        }
    }
}

impl BuilderConfig {
    /// Backing region length for `size_hint` grown by `shift`:
    /// `hint + (hint << shift)`, or `hint + (hint >> -shift)` for negative
    /// shifts, floored at [`min_region_len`](Self::min_region_len).
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub fn region_len(&self, size_hint: usize, shift: isize) -> Option<usize> {
        let grown = shifted(size_hint, shift)?;
        Some(size_hint.checked_add(grown)?.max(self.min_region_len))
    }

    /// Shift used by the first attempt.
    ///
    /// Large hints start with the most negative shift that still keeps the
    /// region above [`min_region_len`](Self::min_region_len).
    #[must_use]
    pub fn initial_shift(&self, size_hint: usize, page_size: usize) -> isize {
        if size_hint <= self.growth_threshold {
            return 1;
        }
        let floor = -isize::try_from(self.growth_threshold / page_size.max(1)).unwrap_or(isize::MAX);
        let mut shift = 0_isize;
        let mut x = self.growth_threshold / size_hint + 1;
        while x > 0 && shift > floor {
            shift -= 1;
            x >>= 1;
        }
        let mut x = shifted(size_hint, shift)
            .and_then(|grown| size_hint.checked_add(grown))
            .map_or(0, |len| self.min_region_len / len.max(1));
        while x > 0 {
            shift += 1;
            x >>= 1;
        }
        shift
    }

    #[must_use]
    pub const fn with_max_rows_per_block(mut self, rows: usize) -> Self {
        self.max_rows_per_block = rows;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_min_region_len(mut self, len: usize) -> Self {
        self.min_region_len = len;
        self
    }
}

/// `value << shift` for `shift >= 0`, `value >> -shift` otherwise.
fn shifted(value: usize, shift: isize) -> Option<usize> {
    let amount = u32::try_from(shift.unsigned_abs()).ok()?;
    if shift >= 0 {
        if value == 0 {
            return Some(0);
        }
        if amount >= usize::BITS || value.leading_zeros() < amount {
            return None;
        }
        Some(value << amount)
    } else {
        Some(value.checked_shr(amount).unwrap_or(0))
    }
}
