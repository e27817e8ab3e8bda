#![forbid(unsafe_code)]

//! Greedy positional calculator.
//!
//! Walks the new snapshot in order. For each item it scans the old snapshot
//! forward from the last match for an equal item. A match flushes the
//! buffered unmatched new items as one `Inserted` and the skipped old items
//! as one `Removed`. Whatever is left at the end is flushed the same way.
//!
//! # Shrink policy
//!
//! With [`PositionalCalculator::shrinking`], output is bounded by the net
//! size delta: once the granular edits would insert more items than the
//! list grows by (or remove more than it shrinks by), the calculator gives
//! up on precision and emits `Changed(0, min(old, new))` followed by a
//! trailing `Inserted` (growth) or `Removed` (shrink).

use super::{ChangesCalculator, push_inserted, push_removed};
use crate::change::Change;

/// Positional calculator matching items with `PartialEq`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionalCalculator {
    shrink_to_modified_size: bool,
}

impl PositionalCalculator {
    /// Granular output, no size bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse output whenever granular edits exceed the net size delta.
    #[must_use]
    pub fn shrinking() -> Self {
        Self {
            shrink_to_modified_size: true,
        }
    }

    #[must_use]
    pub fn shrinks_to_modified_size(&self) -> bool {
        self.shrink_to_modified_size
    }

    /// Granular edits, or `None` once the shrink budget is exceeded.
    fn granular<T: PartialEq>(&self, old: &[T], new: &[T]) -> Option<Vec<Change>> {
        let delta = new.len() as isize - old.len() as isize;
        let insert_budget = delta.max(0) as usize;
        let remove_budget = (-delta).max(0) as usize;
        let (mut inserted, mut removed) = (0usize, 0usize);
        let mut over_budget = |ins: usize, rem: usize| {
            inserted += ins;
            removed += rem;
            self.shrink_to_modified_size && (inserted > insert_budget || removed > remove_budget)
        };

        let mut changes = Vec::new();
        let mut offset = 0;
        let mut pending = 0;
        for (j, item) in new.iter().enumerate() {
            let Some(found) = old[offset..].iter().position(|o| o == item) else {
                pending += 1;
                continue;
            };
            let gap = found;
            if over_budget(pending, gap) {
                return None;
            }
            push_inserted(&mut changes, j - pending, pending);
            push_removed(&mut changes, j, gap);
            pending = 0;
            offset += found + 1;
        }
        let rest = old.len() - offset;
        if over_budget(pending, rest) {
            return None;
        }
        push_inserted(&mut changes, new.len() - pending, pending);
        push_removed(&mut changes, new.len(), rest);
        Some(changes)
    }
}

impl<T: PartialEq + Send + Sync> ChangesCalculator<T> for PositionalCalculator {
    fn calculate(&self, old: &[T], new: &[T]) -> Vec<Change> {
        if let Some(changes) = self.granular(old, new) {
            tracing::trace!(
                old = old.len(),
                new = new.len(),
                changes = changes.len(),
                "positional diff"
            );
            return changes;
        }

        tracing::trace!(
            old = old.len(),
            new = new.len(),
            "positional diff exceeded size delta; coarse output"
        );
        let mut changes = Vec::with_capacity(2);
        let common = old.len().min(new.len());
        if common > 0 {
            changes.push(Change::changed(0, common));
        }
        if new.len() > old.len() {
            push_inserted(&mut changes, old.len(), new.len() - old.len());
        } else {
            push_removed(&mut changes, new.len(), old.len() - new.len());
        }
        changes
    }
}
