#![forbid(unsafe_code)]

//! Change model: single structural edits and numbered batches of them.
//!
//! # Position semantics
//!
//! A change list is applied **in order**. Each position refers to the list
//! as it stands when that change is applied:
//!
//! - `Removed { position, count }` removes `count` items starting at
//!   `position`.
//! - `Inserted { position, count }` inserts `count` items so that the first
//!   one ends up at `position`.
//! - `Moved { from, to }` removes the item at `from`, then inserts it at `to`.
//! - `Changed { position, count, .. }` replaces `count` items in place.
//!
//! Both calculators in this crate emit `Inserted` and `Changed` positions
//! that are also final positions in the target list, so a consumer can take
//! the values from the new snapshot at the same indices.

use std::any::Any;
use std::sync::Arc;

/// Opaque partial-update payload attached to a [`Change::Changed`].
///
/// Produced by the host's payload function; compared by identity.
#[derive(Clone)]
pub struct ChangePayload(Arc<dyn Any + Send + Sync>);

impl ChangePayload {
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload as `V`, if that is its type.
    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.0.downcast_ref::<V>()
    }
}

impl PartialEq for ChangePayload {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ChangePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChangePayload").finish_non_exhaustive()
    }
}

/// One structural edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Inserted {
        position: usize,
        count: usize,
    },
    Removed {
        position: usize,
        count: usize,
    },
    Moved {
        from: usize,
        to: usize,
    },
    Changed {
        position: usize,
        count: usize,
        payload: Option<ChangePayload>,
    },
}

impl Change {
    /// A `Changed` edit without payload.
    #[must_use]
    pub fn changed(position: usize, count: usize) -> Self {
        Self::Changed {
            position,
            count,
            payload: None,
        }
    }

    /// Net effect on the list length.
    #[must_use]
    pub fn size_delta(&self) -> isize {
        match *self {
            Self::Inserted { count, .. } => count as isize,
            Self::Removed { count, .. } => -(count as isize),
            Self::Moved { .. } | Self::Changed { .. } => 0,
        }
    }
}

/// All structural edits produced by one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch<T> {
    /// Strictly increasing per collection, starting at 1.
    pub sequence_number: u64,
    /// Items added by this batch, in application order.
    pub inserted_items: Vec<T>,
    /// Items removed by this batch, in application order.
    pub removed_items: Vec<T>,
    pub changes: Vec<Change>,
}

impl<T> ChangeBatch<T> {
    /// Whether this batch directly follows the batch numbered `previous`.
    ///
    /// `false` means at least one batch was missed and the consumer must
    /// resynchronize from a full snapshot.
    #[must_use]
    pub fn follows(&self, previous: u64) -> bool {
        previous.checked_add(1) == Some(self.sequence_number)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Apply `changes` to `old`, taking inserted and changed values from `new`
/// at the change positions.
///
/// Returns `None` if a change does not fit the list it is applied to.
#[must_use]
pub fn apply_changes<T: Clone>(old: &[T], changes: &[Change], new: &[T]) -> Option<Vec<T>> {
    replay(old, changes, new).map(|r| r.items)
}

pub(crate) struct Replay<T> {
    pub items: Vec<T>,
    pub inserted: Vec<T>,
    pub removed: Vec<T>,
}

/// Walk `changes` over `old`, recording the items each edit adds and drops.
pub(crate) fn replay<T: Clone>(old: &[T], changes: &[Change], new: &[T]) -> Option<Replay<T>> {
    let mut items = old.to_vec();
    let mut inserted = Vec::new();
    let mut removed = Vec::new();
    for change in changes {
        match *change {
            Change::Inserted { position, count } => {
                if position > items.len() {
                    return None;
                }
                let values = new.get(position..position.checked_add(count)?)?;
                inserted.extend_from_slice(values);
                items.splice(position..position, values.iter().cloned());
            }
            Change::Removed { position, count } => {
                let end = position.checked_add(count)?;
                if end > items.len() {
                    return None;
                }
                removed.extend(items.drain(position..end));
            }
            Change::Moved { from, to } => {
                if from >= items.len() || to >= items.len() {
                    return None;
                }
                let item = items.remove(from);
                items.insert(to, item);
            }
            Change::Changed {
                position, count, ..
            } => {
                let end = position.checked_add(count)?;
                let values = new.get(position..end)?;
                items.get_mut(position..end)?.clone_from_slice(values);
            }
        }
    }
    Some(Replay {
        items,
        inserted,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_detects_gaps() {
        let batch: ChangeBatch<u8> = ChangeBatch {
            sequence_number: 5,
            inserted_items: vec![],
            removed_items: vec![],
            changes: vec![],
        };
        assert!(batch.follows(4));
        assert!(!batch.follows(3));
        assert!(!batch.follows(5));
        assert!(!batch.follows(u64::MAX));
    }

    #[test]
    fn payload_identity_and_downcast() {
        let a = ChangePayload::new("title");
        let b = a.clone();
        let c = ChangePayload::new("title");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<&str>(), Some(&"title"));
        assert!(a.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn size_delta_per_kind() {
        assert_eq!(Change::Inserted { position: 0, count: 3 }.size_delta(), 3);
        assert_eq!(Change::Removed { position: 0, count: 2 }.size_delta(), -2);
        assert_eq!(Change::Moved { from: 1, to: 0 }.size_delta(), 0);
        assert_eq!(Change::changed(0, 4).size_delta(), 0);
    }

    #[test]
    fn apply_each_kind_in_isolation() {
        let old = ['a', 'b', 'c'];

        let new = ['a', 'x', 'y', 'b', 'c'];
        let ins = [Change::Inserted { position: 1, count: 2 }];
        assert_eq!(apply_changes(&old, &ins, &new), Some(new.to_vec()));

        let new = ['a'];
        let rem = [Change::Removed { position: 1, count: 2 }];
        assert_eq!(apply_changes(&old, &rem, &new), Some(new.to_vec()));

        let new = ['c', 'a', 'b'];
        let mv = [Change::Moved { from: 2, to: 0 }];
        assert_eq!(apply_changes(&old, &mv, &new), Some(new.to_vec()));

        let new = ['a', 'B', 'C'];
        let ch = [Change::changed(1, 2)];
        assert_eq!(apply_changes(&old, &ch, &new), Some(new.to_vec()));
    }

    #[test]
    fn apply_combined_sequence() {
        let old = ['a', 'b', 'c', 'd'];
        let new = ['d', 'x', 'c'];
        let changes = [
            Change::Removed { position: 0, count: 1 },
            Change::Moved { from: 2, to: 0 },
            Change::changed(1, 1),
        ];
        // [b c d] -> [d b c] -> [d x c]
        assert_eq!(apply_changes(&old, &changes, &new), Some(new.to_vec()));
    }

    #[test]
    fn replay_records_inserted_and_removed() {
        let old = [1, 2, 3];
        let new = [2, 3, 4];
        let changes = [
            Change::Removed { position: 0, count: 1 },
            Change::Inserted { position: 2, count: 1 },
        ];
        let r = replay(&old, &changes, &new).unwrap();
        assert_eq!(r.items, vec![2, 3, 4]);
        assert_eq!(r.inserted, vec![4]);
        assert_eq!(r.removed, vec![1]);
    }

    #[test]
    fn out_of_range_change_is_rejected() {
        let old = [1, 2];
        assert!(apply_changes(&old, &[Change::Removed { position: 1, count: 5 }], &[]).is_none());
        assert!(apply_changes(&old, &[Change::Moved { from: 0, to: 2 }], &old).is_none());
        assert!(apply_changes(&old, &[Change::Inserted { position: 3, count: 1 }], &[0, 0, 0, 0]).is_none());
    }
}
