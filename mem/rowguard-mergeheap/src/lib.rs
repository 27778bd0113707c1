//! # K-Way Merge Heap
//!
//! A bounded binary min-heap over *runs* (already sorted slices) that drains
//! them as one globally ordered sequence.
//!
//! ## How it works
//!
//! Each heap node is a cursor over one non-empty run. Nodes are ordered by the
//! key of their current head element, as computed by a caller-supplied key
//! function. Taking the next element reads the root's head, advances that
//! cursor by one element and restores the heap property:
//!
//! ```text
//!            ┌──────────────┐
//!  next() ◄──│ root: run #2 │  head = min over all heads
//!            └──────┬───────┘
//!         ┌─────────┴─────────┐
//!   ┌─────▼──────┐      ┌─────▼──────┐
//!   │   run #0   │      │   run #1   │  ...
//!   └────────────┘      └────────────┘
//! ```
//!
//! - If the advanced run still has elements, its key can only grow, so one
//!   sift-down from the root suffices.
//! - If it is exhausted, it is replaced by the last node and sifted down.
//!
//! Draining `n` elements from `k` runs costs `O(n log k)`. Ties between equal
//! keys are broken arbitrarily; the heap is not stable.
//!
//! ## Example
//! ```rust
//! use rowguard_mergeheap::{MergeHeap, capacity_for};
//!
//! let a = [1_u64, 4, 9];
//! let b = [2_u64, 3, 10];
//! let mut heap = MergeHeap::with_capacity(capacity_for(2), |x: &u64| *x);
//! heap.insert(&a).unwrap();
//! heap.insert(&b).unwrap();
//! let merged: Vec<u64> = heap.copied().collect();
//! assert_eq!(merged, [1, 2, 3, 4, 9, 10]);
//! ```

/// Key type produced by the key function.
pub type HeapKey = u64;

/// Reasons a run was not accepted by [`MergeHeap::insert`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeHeapError {
    #[error("merge heap is full ({capacity} runs)")]
    Full { capacity: usize },
    #[error("refusing to insert an empty run")]
    EmptyRun,
}

/// Capacity to allocate for an expected number of runs.
///
/// Returns the smallest power of two that is at least `runs` (and at least 1).
/// The heap is correct for any capacity that holds all runs; this is merely a
/// conservative sizing rule.
#[inline]
#[must_use]
pub const fn capacity_for(runs: usize) -> usize {
    runs.next_power_of_two()
}

/// Bounded min-heap of sorted runs, see the [crate documentation](crate).
///
/// # Invariants
/// - Every stored run is non-empty.
/// - For every node `i > 0`: `key(parent(i)) <= key(i)`.
/// - `runs.len() <= capacity`.
pub struct MergeHeap<'a, T, K> {
    runs: Vec<&'a [T]>,
    capacity: usize,
    key: K,
}

impl<'a, T, K> MergeHeap<'a, T, K>
where
    K: Fn(&T) -> HeapKey,
{
    /// Create an empty heap able to hold `capacity` runs at once.
    #[must_use]
    pub fn with_capacity(capacity: usize, key: K) -> Self {
        Self {
            runs: Vec::with_capacity(capacity),
            capacity,
            key,
        }
    }

    /// Number of runs that still have elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Add a sorted run.
    ///
    /// The run must be sorted ascending by the key function; this is not
    /// checked.
    ///
    /// # Errors
    /// - [`MergeHeapError::Full`] if the heap already holds `capacity` runs.
    /// - [`MergeHeapError::EmptyRun`] if `run` has no elements.
    ///
    /// The heap is left unchanged on error.
    pub fn insert(&mut self, run: &'a [T]) -> Result<(), MergeHeapError> {
        if self.runs.len() >= self.capacity {
            return Err(MergeHeapError::Full {
                capacity: self.capacity,
            });
        }
        if run.is_empty() {
            return Err(MergeHeapError::EmptyRun);
        }
        self.runs.push(run);
        self.sift_up();
        Ok(())
    }

    /// Key of the head element of node `i`.
    #[inline]
    fn key_at(&self, i: usize) -> HeapKey {
        (self.key)(&self.runs[i][0])
    }

    /// Move the last node towards the root until its parent is not larger.
    fn sift_up(&mut self) {
        let Some(mut p) = self.runs.len().checked_sub(1) else {
            return;
        };
        while p > 0 {
            let parent = (p - 1) / 2;
            if self.key_at(parent) <= self.key_at(p) {
                break;
            }
            self.runs.swap(p, parent);
            p = parent;
        }
    }

    /// Move the root down until both children are not smaller.
    fn sift_down(&mut self) {
        let len = self.runs.len();
        let mut p = 0;
        loop {
            let left = 2 * p + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let runt = if right < len && self.key_at(right) < self.key_at(left) {
                right
            } else {
                left
            };
            if self.key_at(p) <= self.key_at(runt) {
                break;
            }
            self.runs.swap(p, runt);
            p = runt;
        }
    }

    /// Remove the root node.
    fn pop(&mut self) {
        self.runs.swap_remove(0);
        self.sift_down();
    }
}

impl<'a, T, K> Iterator for MergeHeap<'a, T, K>
where
    K: Fn(&T) -> HeapKey,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let run: &'a [T] = self.runs.first().copied()?;
        let (head, rest) = run.split_first()?;
        if rest.is_empty() {
            self.pop();
        } else {
            self.runs[0] = rest;
            self.sift_down();
        }
        Some(head)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.runs.iter().map(|r| r.len()).sum::<usize>();
        (remaining, Some(remaining))
    }
}
