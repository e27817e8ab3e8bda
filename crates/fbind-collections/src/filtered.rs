#![forbid(unsafe_code)]

//! Filtered view over another observable collection.
//!
//! # Design
//!
//! The view subscribes to its source's snapshot stream. Each snapshot bumps
//! a generation counter and queues a re-filter job on the view's private
//! [`SerialWorker`]. A job reads the source's items when it runs, filters
//! them, diffs the result against the previous filtered snapshot with the
//! positional calculator (filtering never reorders), and publishes one
//! batch.
//!
//! # Invariants
//!
//! 1. Re-filters run one at a time, in submission order.
//! 2. A job whose generation is older than the latest submitted one is
//!    skipped; a newer job is already queued behind it.
//! 3. The newest job reads the source after every mutation that queued a
//!    job, so the view settles on `filter(source)`.
//! 4. Swapping the source drops the old subscription before the new one is
//!    taken.
//!
//! # Failure Modes
//!
//! - **Panicking predicate**: the item is treated as filtered out and the
//!   panic is logged.
//! - **Source emits from inside a view subscriber**: only a job is queued,
//!   so nothing re-enters the view.

use std::sync::{Arc, Mutex, Weak};

use fbind_core::{SerialWorker, guarded, lock_unpoisoned};
use fbind_runtime::Subscription;

use crate::calculator::{ChangesCalculator, PositionalCalculator};
use crate::change::{ChangeBatch, replay};
use crate::collection::{CollectionCore, ObservableCollection};
use crate::error::{Error, Result};

type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct FilteredState<T> {
    items: Arc<Vec<T>>,
    filter: FilterFn<T>,
    source: Arc<dyn ObservableCollection<T>>,
    generation: u64,
}

struct FilteredShared<T> {
    state: Mutex<FilteredState<T>>,
    core: CollectionCore<T>,
    worker: SerialWorker,
}

/// A collection holding the items of a source that pass a predicate.
pub struct ObservableFilteredList<T> {
    // Declared first so the source stops feeding jobs before teardown.
    source_sub: Mutex<Subscription>,
    shared: Arc<FilteredShared<T>>,
}

impl<T> std::fmt::Debug for ObservableFilteredList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.shared.state);
        f.debug_struct("ObservableFilteredList")
            .field("size", &state.items.len())
            .field("generation", &state.generation)
            .field("worker", &self.shared.worker.name())
            .finish()
    }
}

fn apply_filter<T: Clone>(filter: &FilterFn<T>, snapshot: &[T]) -> Vec<T> {
    snapshot
        .iter()
        .filter(|item| guarded("filter", false, || filter(*item)))
        .cloned()
        .collect()
}

impl<T> FilteredShared<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Queue a re-filter of the current source as the newest generation.
    fn schedule(self: &Arc<Self>) {
        let generation = {
            let mut state = lock_unpoisoned(&self.state);
            state.generation += 1;
            state.generation
        };
        let weak = Arc::downgrade(self);
        let submitted = self.worker.submit(move || {
            if let Some(shared) = weak.upgrade() {
                shared.refilter(generation);
            }
        });
        if submitted.is_err() {
            tracing::warn!(generation, "filter worker stopped; re-filter dropped");
        }
    }

    fn refilter(&self, generation: u64) {
        let (filter, source) = {
            let state = lock_unpoisoned(&self.state);
            if state.generation != generation {
                tracing::debug!(generation, latest = state.generation, "stale re-filter skipped");
                return;
            }
            (Arc::clone(&state.filter), Arc::clone(&state.source))
        };
        let filtered = Arc::new(apply_filter(&filter, &source.get_items()));

        let emission = self.core.begin_emit();
        let mut state = lock_unpoisoned(&self.state);
        if state.generation != generation {
            tracing::debug!(generation, latest = state.generation, "stale re-filter skipped");
            return;
        }
        let old = std::mem::replace(&mut state.items, Arc::clone(&filtered));
        let changes = PositionalCalculator::new().calculate(old.as_slice(), filtered.as_slice());
        if changes.is_empty() {
            return;
        }
        let sequence = self.core.next_sequence();
        drop(state);
        let snapshot = Arc::clone(&filtered);
        emission.publish(sequence, snapshot, move || {
            let (inserted, removed) = replay(old.as_slice(), &changes, filtered.as_slice())
                .map(|r| (r.inserted, r.removed))
                .unwrap_or_default();
            (inserted, removed, changes)
        });
    }
}

fn subscribe_source<T>(
    shared: &Arc<FilteredShared<T>>,
    source: &Arc<dyn ObservableCollection<T>>,
) -> Subscription
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let weak: Weak<FilteredShared<T>> = Arc::downgrade(shared);
    source.core().observe_items(move |_| {
        if let Some(shared) = weak.upgrade() {
            shared.schedule();
        }
    })
}

impl<T> ObservableFilteredList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Filtered view of `source`. The initial content is computed on the
    /// calling thread; later updates arrive through the worker.
    pub fn new(
        source: Arc<dyn ObservableCollection<T>>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::with_worker_name(source, filter, "fbind-filter")
    }

    /// Like [`new`](Self::new), naming the worker thread.
    pub fn with_worker_name(
        source: Arc<dyn ObservableCollection<T>>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
        worker_name: &str,
    ) -> Result<Self> {
        let filter: FilterFn<T> = Arc::new(filter);
        let initial = Arc::new(apply_filter(&filter, &source.get_items()));
        let worker = SerialWorker::start(worker_name).map_err(Error::WorkerSpawn)?;
        let shared = Arc::new(FilteredShared {
            core: CollectionCore::new(Arc::clone(&initial)),
            state: Mutex::new(FilteredState {
                items: initial,
                filter,
                source: Arc::clone(&source),
                generation: 0,
            }),
            worker,
        });
        let source_sub = subscribe_source(&shared, &source);
        Ok(Self {
            source_sub: Mutex::new(source_sub),
            shared,
        })
    }

    /// Replace the predicate and re-derive from the source.
    pub fn set_filter(&self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) {
        lock_unpoisoned(&self.shared.state).filter = Arc::new(filter);
        self.shared.schedule();
    }

    /// Follow a different source. The old subscription is dropped first;
    /// subscribing to the new source replays its snapshot, which queues the
    /// re-derivation.
    pub fn set_source(&self, source: Arc<dyn ObservableCollection<T>>) {
        let mut sub = lock_unpoisoned(&self.source_sub);
        *sub = Subscription::detached();
        lock_unpoisoned(&self.shared.state).source = Arc::clone(&source);
        *sub = subscribe_source(&self.shared, &source);
    }

    /// Block until every queued re-filter has run.
    pub fn flush(&self) {
        self.shared.worker.flush();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        lock_unpoisoned(&self.shared.state).items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        lock_unpoisoned(&self.shared.state).items.get(index).cloned()
    }

    #[must_use]
    pub fn get_items(&self) -> Arc<Vec<T>> {
        Arc::clone(&lock_unpoisoned(&self.shared.state).items)
    }

    #[must_use]
    pub fn changes_count(&self) -> u64 {
        self.shared.core.changes_count()
    }

    pub fn observe_changes(
        &self,
        f: impl Fn(&Arc<ChangeBatch<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.core.observe_changes(f)
    }

    pub fn observe_items(&self, f: impl Fn(&Arc<Vec<T>>) + Send + Sync + 'static) -> Subscription {
        self.shared.core.observe_items(f)
    }
}

impl<T> ObservableCollection<T> for ObservableFilteredList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn core(&self) -> &CollectionCore<T> {
        &self.shared.core
    }

    fn size(&self) -> usize {
        ObservableFilteredList::size(self)
    }

    fn get_items(&self) -> Arc<Vec<T>> {
        ObservableFilteredList::get_items(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObservableList;
    use crate::change::Change;

    fn source(items: Vec<i32>) -> Arc<ObservableList<i32>> {
        Arc::new(ObservableList::from_items(items))
    }

    #[test]
    fn initial_content_is_filtered() {
        let src = source(vec![1, 2, 3, 4]);
        let view = ObservableFilteredList::new(src, |v: &i32| v % 2 == 0).unwrap();
        assert_eq!(*view.get_items(), vec![2, 4]);
        assert_eq!(view.changes_count(), 0);
    }

    #[test]
    fn source_mutation_rederives() {
        let src = source(vec![1, 2]);
        let view = ObservableFilteredList::new(src.clone(), |v: &i32| *v > 1).unwrap();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::clone(&batches);
        let _sub = view.observe_changes(move |batch| b.lock().unwrap().push(batch.changes.clone()));

        src.add(5).unwrap();
        src.add(0).unwrap();
        view.flush();

        assert_eq!(*view.get_items(), vec![2, 5]);
        let batches = batches.lock().unwrap();
        assert_eq!(
            *batches,
            vec![vec![Change::Inserted { position: 1, count: 1 }]]
        );
    }

    #[test]
    fn set_filter_rederives() {
        let src = source(vec![1, 2, 3]);
        let view = ObservableFilteredList::new(src, |_: &i32| true).unwrap();
        view.set_filter(|v: &i32| *v != 2);
        view.flush();
        assert_eq!(*view.get_items(), vec![1, 3]);
        assert_eq!(view.changes_count(), 1);
    }

    #[test]
    fn set_source_switches_and_drops_old_subscription() {
        let first = source(vec![1]);
        let second = source(vec![10, 20]);
        let view = ObservableFilteredList::new(first.clone(), |_: &i32| true).unwrap();
        view.set_source(second.clone());
        view.flush();
        assert_eq!(*view.get_items(), vec![10, 20]);

        first.add(2).unwrap();
        view.flush();
        assert_eq!(*view.get_items(), vec![10, 20]);

        second.add(30).unwrap();
        view.flush();
        assert_eq!(*view.get_items(), vec![10, 20, 30]);
    }

    /// Wraps a list and, once armed, adds an item right after handing out
    /// a snapshot, so the snapshot is already outdated when it is used.
    struct EditsOnRead {
        list: ObservableList<i32>,
        pending: Mutex<Option<i32>>,
    }

    impl ObservableCollection<i32> for EditsOnRead {
        fn core(&self) -> &CollectionCore<i32> {
            self.list.core()
        }

        fn size(&self) -> usize {
            self.list.size()
        }

        fn get_items(&self) -> Arc<Vec<i32>> {
            let snapshot = self.list.get_items();
            let pending = self.pending.lock().unwrap().take();
            if let Some(item) = pending {
                self.list.add(item).unwrap();
            }
            snapshot
        }
    }

    #[test]
    fn set_filter_settles_on_edit_racing_the_read() {
        let src = Arc::new(EditsOnRead {
            list: ObservableList::from_items(vec![1, 2, 3]),
            pending: Mutex::new(None),
        });
        let view = ObservableFilteredList::new(src.clone(), |_: &i32| true).unwrap();

        *src.pending.lock().unwrap() = Some(4);
        view.set_filter(|v: &i32| *v != 2);
        view.flush();
        // The edit queued one more re-filter behind the barrier.
        view.flush();

        assert_eq!(*src.list.get_items(), vec![1, 2, 3, 4]);
        assert_eq!(*view.get_items(), vec![1, 3, 4]);
    }

    #[test]
    fn set_filter_racing_source_edits_converges() {
        let src = source(Vec::new());
        let view = ObservableFilteredList::new(src.clone(), |_: &i32| true).unwrap();
        let writer = {
            let src = Arc::clone(&src);
            std::thread::spawn(move || {
                for i in 0..200 {
                    src.add(i).unwrap();
                }
            })
        };
        for round in 0..50 {
            let modulus = round % 3 + 2;
            view.set_filter(move |v: &i32| v % modulus == 0);
        }
        writer.join().unwrap();
        view.flush();

        let expected: Vec<i32> = src.get_items().iter().copied().filter(|v| v % 3 == 0).collect();
        assert_eq!(*view.get_items(), expected);
    }

    #[test]
    fn panicking_predicate_filters_item_out() {
        let src = source(vec![1, 2, 3]);
        let view = ObservableFilteredList::new(src, |v: &i32| {
            if *v == 2 {
                panic!("bad filter");
            }
            true
        })
        .unwrap();
        assert_eq!(*view.get_items(), vec![1, 3]);
    }

    #[test]
    fn filtered_view_can_feed_another_view() {
        let src = source(vec![1, 2, 3, 4, 5, 6]);
        let evens: Arc<ObservableFilteredList<i32>> =
            Arc::new(ObservableFilteredList::new(src.clone(), |v: &i32| v % 2 == 0).unwrap());
        let big = ObservableFilteredList::new(evens.clone(), |v: &i32| *v > 2).unwrap();
        assert_eq!(*big.get_items(), vec![4, 6]);

        src.add(8).unwrap();
        evens.flush();
        big.flush();
        assert_eq!(*big.get_items(), vec![4, 6, 8]);
    }
}
