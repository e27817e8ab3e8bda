#![forbid(unsafe_code)]

//! Shared base of every observable collection.
//!
//! # Design
//!
//! [`CollectionCore`] owns the pieces every collection has in common:
//!
//! - the change counter (the last issued sequence number),
//! - the `changes` broadcast, which replays nothing,
//! - the `items` broadcast, which replays the latest snapshot,
//! - the emission lock that keeps deliveries in sequence order.
//!
//! A mutation first takes the emission lock ([`CollectionCore::begin_emit`]),
//! then the owner's state lock. It applies the edit, issues a sequence
//! number with [`CollectionCore::next_sequence`], releases the state lock,
//! and publishes. Batches therefore reach subscribers in sequence order even
//! when mutations race on several threads, and subscribers may read the
//! collection while it publishes.
//!
//! # Invariants
//!
//! 1. Sequence numbers start at 1 and grow by exactly 1 per non-empty
//!    mutation, whether or not anyone is subscribed.
//! 2. A batch is only built and delivered while `changes` has a live
//!    subscriber. History is never buffered.
//! 3. `observe_items` subscribers get the current snapshot first, then one
//!    snapshot per later mutation, with no gap in between.
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: mutating a collection from inside one of its
//!   own subscriber callbacks would deadlock on the emission lock. The core
//!   tracks the emitting thread and [`CollectionCore::check_reentrancy`]
//!   turns that case into [`Error::ReentrantMutation`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use fbind_core::lock_unpoisoned;
use fbind_runtime::{Broadcast, Subscription};

use crate::change::{Change, ChangeBatch};
use crate::error::{Error, Result};

/// Read side shared by all observable collections.
///
/// Observation goes through [`core`](Self::core) so the trait stays usable
/// as `dyn ObservableCollection<T>`.
pub trait ObservableCollection<T>: Send + Sync {
    fn core(&self) -> &CollectionCore<T>;

    /// Current number of items.
    fn size(&self) -> usize;

    /// Consistent snapshot of the current items.
    fn get_items(&self) -> Arc<Vec<T>>;

    /// Last issued sequence number.
    fn changes_count(&self) -> u64 {
        self.core().changes_count()
    }
}

/// Counter, broadcasts, and emission ordering for one collection.
pub struct CollectionCore<T> {
    changes_count: AtomicU64,
    changes: Broadcast<Arc<ChangeBatch<T>>>,
    items: Broadcast<Arc<Vec<T>>>,
    emit_lock: Mutex<()>,
    emitting: Mutex<Option<ThreadId>>,
}

impl<T> std::fmt::Debug for CollectionCore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCore")
            .field("changes_count", &self.changes_count.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T> CollectionCore<T> {
    /// Last issued sequence number.
    #[must_use]
    pub fn changes_count(&self) -> u64 {
        self.changes_count.load(Ordering::Acquire)
    }

    /// Whether the calling thread is publishing a mutation of this
    /// collection right now.
    #[must_use]
    pub fn is_emitting_here(&self) -> bool {
        *lock_unpoisoned(&self.emitting) == Some(std::thread::current().id())
    }
}

impl<T: Clone + Send + Sync + 'static> CollectionCore<T> {
    /// Core whose `items` stream starts at `initial`.
    pub fn new(initial: Arc<Vec<T>>) -> Self {
        Self {
            changes_count: AtomicU64::new(0),
            changes: Broadcast::new(),
            items: Broadcast::replaying_with(initial),
            emit_lock: Mutex::new(()),
            emitting: Mutex::new(None),
        }
    }

    /// Subscribe to future change batches. Nothing is replayed.
    pub fn observe_changes(
        &self,
        f: impl Fn(&Arc<ChangeBatch<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.changes.subscribe(f)
    }

    /// Subscribe to snapshots, starting with the current one.
    pub fn observe_items(&self, f: impl Fn(&Arc<Vec<T>>) + Send + Sync + 'static) -> Subscription {
        if self.is_emitting_here() {
            // Already holding the emission lock on this thread.
            return self.items.subscribe(f);
        }
        let _order = lock_unpoisoned(&self.emit_lock);
        self.items.subscribe(f)
    }

    /// Whether anyone currently listens for change batches.
    #[must_use]
    pub fn has_change_subscribers(&self) -> bool {
        self.changes.has_subscribers()
    }

    /// Reject a mutation attempted from inside this collection's own
    /// subscriber callback.
    pub fn check_reentrancy(&self) -> Result<()> {
        if self.is_emitting_here() {
            tracing::warn!("collection mutated from inside its own subscriber");
            return Err(Error::ReentrantMutation);
        }
        Ok(())
    }

    /// Issue the next sequence number. Call while holding an [`Emission`].
    pub fn next_sequence(&self) -> u64 {
        self.changes_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Take the emission lock. Mutations acquire it before their state lock
    /// and publish through the returned guard; dropping the guard without
    /// publishing is fine for edits that changed nothing.
    pub fn begin_emit(&self) -> Emission<'_, T> {
        let order = lock_unpoisoned(&self.emit_lock);
        Emission {
            core: self,
            _order: order,
        }
    }
}

/// Exclusive right to publish one mutation's notifications.
pub struct Emission<'a, T> {
    core: &'a CollectionCore<T>,
    _order: MutexGuard<'a, ()>,
}

impl<T> std::fmt::Debug for Emission<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emission").finish_non_exhaustive()
    }
}

/// Clears the emitting-thread marker even if a subscriber panics.
struct EmittingMarker<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for EmittingMarker<'_> {
    fn drop(&mut self) {
        *lock_unpoisoned(self.0) = None;
    }
}

impl<T: Clone + Send + Sync + 'static> Emission<'_, T> {
    /// Deliver one mutation: the batch (only if `changes` has subscribers)
    /// and the new snapshot. `batch` is only invoked when it is delivered.
    pub fn publish(
        self,
        sequence_number: u64,
        snapshot: Arc<Vec<T>>,
        batch: impl FnOnce() -> (Vec<T>, Vec<T>, Vec<Change>),
    ) {
        *lock_unpoisoned(&self.core.emitting) = Some(std::thread::current().id());
        let _marker = EmittingMarker(&self.core.emitting);

        if self.core.changes.has_subscribers() {
            let (inserted_items, removed_items, changes) = batch();
            tracing::debug!(
                sequence = sequence_number,
                changes = changes.len(),
                "emitting change batch"
            );
            self.core.changes.emit(Arc::new(ChangeBatch {
                sequence_number,
                inserted_items,
                removed_items,
                changes,
            }));
        } else {
            tracing::trace!(sequence = sequence_number, "no change subscribers; batch dropped");
        }
        self.core.items.emit(snapshot);
    }
}
