#![forbid(unsafe_code)]

//! Change calculators: turn a before/after snapshot into a change list.
//!
//! Every calculator upholds one contract: applying its output to `old` with
//! [`apply_changes`](crate::change::apply_changes) yields exactly `new`.
//!
//! | Calculator             | Matching        | Moves | Cost      |
//! |------------------------|-----------------|-------|-----------|
//! | [`PositionalCalculator`] | `PartialEq`   | no    | O(n·m)    |
//! | [`DiffCalculator`]       | identity pred | opt.  | O((n+m)·D) |

pub mod diff;
pub mod positional;

pub use diff::DiffCalculator;
pub use positional::PositionalCalculator;

use crate::change::Change;

/// Computes the structural edits between two snapshots.
pub trait ChangesCalculator<T>: Send + Sync {
    fn calculate(&self, old: &[T], new: &[T]) -> Vec<Change>;
}

/// Append a non-empty `Removed`.
pub(crate) fn push_removed(changes: &mut Vec<Change>, position: usize, count: usize) {
    if count == 0 {
        return;
    }
    changes.push(Change::Removed { position, count });
}

pub(crate) fn push_inserted(changes: &mut Vec<Change>, position: usize, count: usize) {
    if count == 0 {
        return;
    }
    changes.push(Change::Inserted { position, count });
}
