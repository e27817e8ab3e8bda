#![forbid(unsafe_code)]

//! Append-only paginated collection.
//!
//! # Design
//!
//! A [`LoadingMoreList`] owns a managed inner [`ObservableList`] of loaded
//! items plus the pagination cursor: the continuation reference and the
//! remaining count. Item and range loaders return lazy [`Task`]s; once
//! started they run on the list's private [`SerialWorker`], so pages are
//! requested and applied strictly in issuance order.
//!
//! # Staleness
//!
//! Every request is stamped with `{reference, next_position, epoch}` when it
//! is built. The epoch advances on every reset, so a reset is detectable
//! even when it restores the same reference and position. When the page
//! arrives the stamp is recomputed; a mismatch discards the page and the
//! whole request is rebuilt and retried, up to [`MAX_STALE_ATTEMPTS`] times,
//! after which the load fails with [`Error::StaleRequest`].
//!
//! # Invariants
//!
//! 1. Reference and remaining count change together, and only when a fresh
//!    page lands or on reset.
//! 2. `remaining == Known(0)` if and only if no further pages exist.
//! 3. The inner list is only mutated through this type; external mutation
//!    returns [`Error::ManagedList`].
//!
//! # Failure Modes
//!
//! - **Loader error**: surfaces as [`Error::Load`] to the task that needed
//!   the page. Nothing is applied.
//! - **Loader panic**: contained and reported as a load error.
//! - **Cancellation**: a cancelled task stops before its next request; a page
//!   already in flight is still applied if it is fresh.
//! - **Stalled source**: a page that adds nothing and leaves the reference
//!   unchanged ends pagination, whatever remaining count it reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use fbind_core::{Cx, SerialWorker, guarded, lock_unpoisoned};
use fbind_runtime::{Subscription, Task};

use crate::change::ChangeBatch;
use crate::collection::{CollectionCore, ObservableCollection};
use crate::error::{BoxError, Error, Result};
use crate::observable_list::ObservableList;

/// Consecutive stale results tolerated before a load fails.
pub const MAX_STALE_ATTEMPTS: usize = 5;

// ─── Pagination types ───────────────────────────────────────────────────────

/// How many items the source still has beyond the loaded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "state-persistence", derive(serde::Serialize, serde::Deserialize))]
pub enum RemainingCount {
    #[default]
    Unknown,
    Known(usize),
}

impl RemainingCount {
    #[must_use]
    pub fn is_exhausted(self) -> bool {
        self == Self::Known(0)
    }
}

/// A page request handed to the [`PageLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoreRequest<R> {
    /// Continuation reference from the previous page; `None` on the first.
    pub reference: Option<R>,
    /// Number of items loaded so far.
    pub next_position: usize,
}

/// One page returned by a [`PageLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T, R> {
    pub items: Vec<T>,
    pub more_reference: Option<R>,
    pub remaining: RemainingCount,
}

impl<T, R> Page<T, R> {
    /// A page with unknown continuation.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            more_reference: None,
            remaining: RemainingCount::Unknown,
        }
    }

    /// The final page of the source.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items).with_remaining(RemainingCount::Known(0))
    }

    #[must_use]
    pub fn with_reference(mut self, reference: R) -> Self {
        self.more_reference = Some(reference);
        self
    }

    #[must_use]
    pub fn with_remaining(mut self, remaining: RemainingCount) -> Self {
        self.remaining = remaining;
        self
    }
}

/// Fetches pages. Runs on the list's worker thread and may block.
///
/// Implementations should return early once `cx` is cancelled.
pub trait PageLoader<T, R>: Send + Sync {
    fn load(&self, request: &MoreRequest<R>, cx: &Cx) -> std::result::Result<Page<T, R>, BoxError>;
}

impl<T, R, F> PageLoader<T, R> for F
where
    F: Fn(&MoreRequest<R>, &Cx) -> std::result::Result<Page<T, R>, BoxError> + Send + Sync,
{
    fn load(&self, request: &MoreRequest<R>, cx: &Cx) -> std::result::Result<Page<T, R>, BoxError> {
        self(request, cx)
    }
}

/// Verdict for one (new item, loaded item) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Keep both.
    NoRemove,
    /// Drop the new item.
    RemoveFromNewItems,
    /// Drop the loaded item; the new one is appended.
    RemoveFromLoadedItems,
    /// Put the new item where the loaded one was.
    ReplaceLoadedItem,
}

/// Inspects each newly loaded item against every loaded item before a page
/// is merged.
pub trait LoadedItemsFilter<T>: Send + Sync {
    fn decide(&self, new_item: &T, loaded_item: &T) -> FilterAction;
}

impl<T, F> LoadedItemsFilter<T> for F
where
    F: Fn(&T, &T) -> FilterAction + Send + Sync,
{
    fn decide(&self, new_item: &T, loaded_item: &T) -> FilterAction {
        self(new_item, loaded_item)
    }
}

/// Construction options for [`LoadingMoreList`].
pub struct LoadingMoreConfig<T> {
    worker_name: String,
    items_filter: Option<Arc<dyn LoadedItemsFilter<T>>>,
}

impl<T> Default for LoadingMoreConfig<T> {
    fn default() -> Self {
        Self {
            worker_name: "fbind-loading-more".to_owned(),
            items_filter: None,
        }
    }
}

impl<T> std::fmt::Debug for LoadingMoreConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingMoreConfig")
            .field("worker_name", &self.worker_name)
            .field("items_filter", &self.items_filter.is_some())
            .finish()
    }
}

impl<T> LoadingMoreConfig<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    #[must_use]
    pub fn with_items_filter(mut self, filter: impl LoadedItemsFilter<T> + 'static) -> Self {
        self.items_filter = Some(Arc::new(filter));
        self
    }
}

/// Serializable state for reattachment across recreation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "state-persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct LoadingMoreSnapshot<T, R> {
    pub items: Vec<T>,
    pub more_reference: Option<R>,
    pub remaining: RemainingCount,
}

// ─── Shared state ───────────────────────────────────────────────────────────

struct PagingState<R> {
    more_reference: Option<R>,
    remaining: RemainingCount,
    epoch: u64,
}

/// How a fresh page lands in the inner list.
enum Merge<T> {
    Append(Vec<T>),
    Replace(Vec<T>),
}

#[derive(Debug, PartialEq)]
struct RequestStamp<R> {
    reference: Option<R>,
    next_position: usize,
    epoch: u64,
}

struct LoadingShared<T, R> {
    inner: ObservableList<T>,
    paging: Mutex<PagingState<R>>,
    /// Held while a page or a reset is applied, so a stamp check and the
    /// edit it guards are atomic.
    apply_lock: Mutex<()>,
    loader: Box<dyn PageLoader<T, R>>,
    items_filter: Option<Arc<dyn LoadedItemsFilter<T>>>,
    requests_issued: AtomicUsize,
    worker: SerialWorker,
}

impl<T, R> LoadingShared<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn is_exhausted(&self) -> bool {
        lock_unpoisoned(&self.paging).remaining.is_exhausted()
    }

    fn stamp(&self) -> RequestStamp<R> {
        let paging = lock_unpoisoned(&self.paging);
        RequestStamp {
            reference: paging.more_reference.clone(),
            next_position: self.inner.size(),
            epoch: paging.epoch,
        }
    }

    /// Answer from loaded state alone, if possible.
    fn peek(&self, position: usize) -> Option<Option<T>> {
        if let Some(item) = self.inner.get(position) {
            return Some(Some(item));
        }
        self.is_exhausted().then_some(None)
    }

    /// Load pages until `position` is loaded or the source is exhausted.
    fn ensure_loaded(&self, position: usize, cx: &Cx) -> Result<Option<T>> {
        loop {
            cx.check()?;
            if let Some(answer) = self.peek(position) {
                return Ok(answer);
            }
            self.load_next_page(cx)?;
        }
    }

    /// Request and apply the next page, retrying stale results.
    fn load_next_page(&self, cx: &Cx) -> Result<()> {
        for attempt in 1..=MAX_STALE_ATTEMPTS {
            cx.check()?;
            if self.is_exhausted() {
                return Ok(());
            }
            let stamp = self.stamp();
            let request = MoreRequest {
                reference: stamp.reference.clone(),
                next_position: stamp.next_position,
            };
            self.requests_issued.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(position = request.next_position, attempt, "requesting page");

            let page = guarded("page_loader", Err("page loader panicked".into()), || {
                self.loader.load(&request, cx)
            })
            .map_err(|err| {
                tracing::debug!(position = request.next_position, error = %err, "page load failed");
                Error::Load(err)
            })?;

            let _apply = lock_unpoisoned(&self.apply_lock);
            if self.stamp() != stamp {
                tracing::debug!(position = request.next_position, attempt, "stale page discarded");
                continue;
            }
            self.apply_page(page, stamp.reference)?;
            return Ok(());
        }
        tracing::warn!(attempts = MAX_STALE_ATTEMPTS, "page request kept going stale");
        Err(Error::StaleRequest {
            attempts: MAX_STALE_ATTEMPTS,
        })
    }

    /// Merge a fresh page. Caller holds `apply_lock`.
    ///
    /// The cursor is updated before the merge is published, so subscribers
    /// of the batch see items and cursor that belong together.
    fn apply_page(&self, page: Page<T, R>, previous_reference: Option<R>) -> Result<()> {
        let raw_len = page.items.len();
        let mut remaining = page.remaining;
        if raw_len == 0 && remaining == RemainingCount::Unknown {
            remaining = RemainingCount::Known(0);
        }

        let (merge, kept) = match &self.items_filter {
            None => (Merge::Append(page.items), raw_len),
            Some(filter) => {
                let (merged, kept) = self.merge_filtered(filter.as_ref(), page.items);
                (Merge::Replace(merged), kept)
            }
        };

        if kept == 0 && page.more_reference == previous_reference {
            // Nothing new and no cursor progress: another request would
            // return the same page.
            tracing::debug!(page = raw_len, "page made no progress; treating source as exhausted");
            remaining = RemainingCount::Known(0);
        }

        {
            let mut paging = lock_unpoisoned(&self.paging);
            paging.more_reference = page.more_reference;
            paging.remaining = remaining;
        }
        match merge {
            Merge::Append(items) => self.inner.append(items)?,
            Merge::Replace(items) => self.inner.replace_all(items)?,
        }
        tracing::debug!(
            loaded = self.inner.size(),
            page = raw_len,
            kept,
            exhausted = remaining.is_exhausted(),
            "page applied"
        );
        Ok(())
    }

    /// Apply the loaded-items filter. Returns the merged content and how
    /// many new items were kept or placed.
    fn merge_filtered(&self, filter: &dyn LoadedItemsFilter<T>, new_items: Vec<T>) -> (Vec<T>, usize) {
        let loaded = self.inner.get_items();
        let mut slots: Vec<Option<T>> = loaded.iter().cloned().map(Some).collect();
        let mut appended = Vec::new();
        let mut placed = 0;

        'new_items: for item in new_items {
            for (index, existing) in loaded.iter().enumerate() {
                let action = guarded("loaded_items_filter", FilterAction::NoRemove, || {
                    filter.decide(&item, existing)
                });
                match action {
                    FilterAction::NoRemove => {}
                    FilterAction::RemoveFromNewItems => continue 'new_items,
                    FilterAction::RemoveFromLoadedItems => slots[index] = None,
                    FilterAction::ReplaceLoadedItem => {
                        slots[index] = Some(item);
                        placed += 1;
                        continue 'new_items;
                    }
                }
            }
            appended.push(item);
        }

        placed += appended.len();
        let merged: Vec<T> = slots.into_iter().flatten().chain(appended).collect();
        (merged, placed)
    }

    fn reset_to(&self, page: Option<Page<T, R>>) -> Result<()> {
        self.inner.core().check_reentrancy()?;
        let _apply = lock_unpoisoned(&self.apply_lock);
        let (items, reference, remaining) = match page {
            Some(page) => (page.items, page.more_reference, page.remaining),
            None => (Vec::new(), None, RemainingCount::Unknown),
        };
        {
            let mut paging = lock_unpoisoned(&self.paging);
            paging.more_reference = reference;
            paging.remaining = remaining;
            paging.epoch += 1;
            tracing::debug!(epoch = paging.epoch, "pagination reset");
        }
        if items.is_empty() {
            self.inner.clear_all()
        } else {
            self.inner.replace_all(items)
        }
    }
}

// ─── LoadingMoreList ────────────────────────────────────────────────────────

/// Paginated observable collection.
pub struct LoadingMoreList<T, R> {
    shared: Arc<LoadingShared<T, R>>,
}

impl<T, R> std::fmt::Debug for LoadingMoreList<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paging = lock_unpoisoned(&self.shared.paging);
        f.debug_struct("LoadingMoreList")
            .field("remaining", &paging.remaining)
            .field("epoch", &paging.epoch)
            .field(
                "requests_issued",
                &self.shared.requests_issued.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

/// Run `work` on the worker with a weak handle, resolving the task with its
/// result.
fn spawn_on_worker<T, R, V>(
    shared: &Arc<LoadingShared<T, R>>,
    cx: Cx,
    emitter: fbind_runtime::Emitter<V, Error>,
    work: impl FnOnce(&LoadingShared<T, R>, &Cx) -> Result<V> + Send + 'static,
) where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    V: Send + 'static,
{
    let weak: Weak<LoadingShared<T, R>> = Arc::downgrade(shared);
    let job_emitter = emitter.clone();
    let submitted = shared.worker.submit(move || {
        let Some(shared) = weak.upgrade() else {
            job_emitter.error(Error::Cancelled);
            return;
        };
        match work(&shared, &cx) {
            Ok(value) => {
                job_emitter.next(value);
                job_emitter.complete();
            }
            Err(Error::Cancelled) => tracing::debug!(cx_id = cx.id(), "load cancelled"),
            Err(err) => job_emitter.error(err),
        }
    });
    if let Err(stopped) = submitted {
        emitter.error(stopped.into());
    }
}

impl<T, R> LoadingMoreList<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    /// An empty list fetching pages through `loader`.
    pub fn new(loader: impl PageLoader<T, R> + 'static) -> Result<Self> {
        Self::with_config(loader, LoadingMoreConfig::default())
    }

    pub fn with_config(
        loader: impl PageLoader<T, R> + 'static,
        config: LoadingMoreConfig<T>,
    ) -> Result<Self> {
        Self::build(
            loader,
            config,
            LoadingMoreSnapshot {
                items: Vec::new(),
                more_reference: None,
                remaining: RemainingCount::Unknown,
            },
        )
    }

    /// Restore a list captured with [`to_snapshot`](Self::to_snapshot).
    pub fn from_snapshot(
        snapshot: LoadingMoreSnapshot<T, R>,
        loader: impl PageLoader<T, R> + 'static,
        config: LoadingMoreConfig<T>,
    ) -> Result<Self> {
        Self::build(loader, config, snapshot)
    }

    fn build(
        loader: impl PageLoader<T, R> + 'static,
        config: LoadingMoreConfig<T>,
        snapshot: LoadingMoreSnapshot<T, R>,
    ) -> Result<Self> {
        let worker = SerialWorker::start(config.worker_name).map_err(Error::WorkerSpawn)?;
        Ok(Self {
            shared: Arc::new(LoadingShared {
                inner: ObservableList::managed(snapshot.items),
                paging: Mutex::new(PagingState {
                    more_reference: snapshot.more_reference,
                    remaining: snapshot.remaining,
                    epoch: 0,
                }),
                apply_lock: Mutex::new(()),
                loader: Box::new(loader),
                items_filter: config.items_filter,
                requests_issued: AtomicUsize::new(0),
                worker,
            }),
        })
    }

    /// Capture loaded items and the pagination cursor.
    ///
    /// May be called from a change subscriber. The snapshot then holds the
    /// batch being delivered.
    #[must_use]
    pub fn to_snapshot(&self) -> LoadingMoreSnapshot<T, R> {
        // A publish from this thread already holds `apply_lock`.
        let _apply = (!self.shared.inner.core().is_emitting_here())
            .then(|| lock_unpoisoned(&self.shared.apply_lock));
        let paging = lock_unpoisoned(&self.shared.paging);
        LoadingMoreSnapshot {
            items: self.shared.inner.get_items().as_ref().clone(),
            more_reference: paging.more_reference.clone(),
            remaining: paging.remaining,
        }
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Item at `position`, loading pages as needed. Resolves to `None` when
    /// the source ends before `position`.
    pub fn load_item(&self, position: usize) -> Task<Option<T>, Error> {
        let shared = Arc::clone(&self.shared);
        Task::new(move |cx, emitter| {
            if let Some(answer) = shared.peek(position) {
                emitter.next(answer);
                emitter.complete();
                return;
            }
            spawn_on_worker(&shared, cx, emitter, move |shared, cx| {
                shared.ensure_loaded(position, cx)
            });
        })
    }

    /// Items `first..=last`, loading pages as needed. Positions past the end
    /// of the source are left out.
    pub fn load_range(&self, first: usize, last: usize) -> Task<Vec<T>, Error> {
        let shared = Arc::clone(&self.shared);
        Task::new(move |cx, emitter| {
            spawn_on_worker(&shared, cx, emitter, move |shared, cx| {
                let mut items = Vec::new();
                for position in first..=last {
                    match shared.ensure_loaded(position, cx)? {
                        Some(item) => items.push(item),
                        None => break,
                    }
                }
                Ok(items)
            });
        })
    }

    /// Load the next page. Resolves to the number of loaded items afterwards.
    pub fn load_more(&self) -> Task<usize, Error> {
        let shared = Arc::clone(&self.shared);
        Task::new(move |cx, emitter| {
            spawn_on_worker(&shared, cx, emitter, |shared, cx| {
                shared.load_next_page(cx)?;
                Ok(shared.inner.size())
            });
        })
    }

    /// Drop loaded items and restart pagination from the beginning.
    ///
    /// A page in flight is discarded when it lands.
    pub fn reset(&self) -> Result<()> {
        self.shared.reset_to(None)
    }

    /// Replace loaded items and cursor with `page`.
    pub fn reset_with(&self, page: Page<T, R>) -> Result<()> {
        self.shared.reset_to(Some(page))
    }

    /// Block until queued loads have finished.
    pub fn flush(&self) {
        self.shared.worker.flush();
    }

    // ── State ────────────────────────────────────────────────────────

    #[must_use]
    pub fn more_reference(&self) -> Option<R> {
        lock_unpoisoned(&self.shared.paging).more_reference.clone()
    }

    #[must_use]
    pub fn remaining_count(&self) -> RemainingCount {
        lock_unpoisoned(&self.shared.paging).remaining
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.shared.is_exhausted()
    }

    /// The loaded items. Read and observe freely; mutation is rejected.
    #[must_use]
    pub fn inner_list(&self) -> &ObservableList<T> {
        &self.shared.inner
    }

    /// Page requests issued so far, stale ones included.
    #[must_use]
    pub fn requests_issued(&self) -> usize {
        self.shared.requests_issued.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.inner.size()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.shared.inner.get(index)
    }

    #[must_use]
    pub fn get_items(&self) -> Arc<Vec<T>> {
        self.shared.inner.get_items()
    }

    #[must_use]
    pub fn changes_count(&self) -> u64 {
        self.shared.inner.changes_count()
    }

    pub fn observe_changes(
        &self,
        f: impl Fn(&Arc<ChangeBatch<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.inner.observe_changes(f)
    }

    pub fn observe_items(&self, f: impl Fn(&Arc<Vec<T>>) + Send + Sync + 'static) -> Subscription {
        self.shared.inner.observe_items(f)
    }
}

impl<T, R> ObservableCollection<T> for LoadingMoreList<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn core(&self) -> &CollectionCore<T> {
        self.shared.inner.core()
    }

    fn size(&self) -> usize {
        LoadingMoreList::size(self)
    }

    fn get_items(&self) -> Arc<Vec<T>> {
        LoadingMoreList::get_items(self)
    }
}
