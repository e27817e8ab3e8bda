#![forbid(unsafe_code)]

//! Mutable observable list.
//!
//! Every structural method takes the instance lock, validates its
//! arguments, applies the edit, and publishes exactly one change batch. An
//! edit that touches zero items publishes nothing and does not advance the
//! sequence number. Invalid arguments are programmer errors: they are logged
//! at `warn`, returned as `Err`, and leave the list untouched.
//!
//! `set` replaces the whole content and always goes through the configured
//! [`ChangesCalculator`], so consumers get a minimal edit script instead of
//! a clear-and-insert.

use std::sync::{Arc, Mutex};

use fbind_core::lock_unpoisoned;
use fbind_runtime::Subscription;

use crate::calculator::{ChangesCalculator, PositionalCalculator};
use crate::change::{Change, ChangeBatch, replay};
use crate::collection::{CollectionCore, ObservableCollection};
use crate::error::{Error, Result};

struct ListState<T> {
    items: Arc<Vec<T>>,
    calculator: Arc<dyn ChangesCalculator<T>>,
}

/// Outcome of a validated edit.
struct Edit<T> {
    inserted: Vec<T>,
    removed: Vec<T>,
    changes: Vec<Change>,
}

impl<T> Edit<T> {
    fn new(inserted: Vec<T>, removed: Vec<T>, change: Change) -> Self {
        Self {
            inserted,
            removed,
            changes: vec![change],
        }
    }
}

/// An observable, mutation-driven list.
pub struct ObservableList<T> {
    state: Mutex<ListState<T>>,
    core: CollectionCore<T>,
    managed: bool,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.state);
        f.debug_struct("ObservableList")
            .field("items", &state.items)
            .field("managed", &self.managed)
            .field("core", &self.core)
            .finish()
    }
}

impl<T> Default for ObservableList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObservableList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// An empty list using the positional calculator.
    #[must_use]
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    #[must_use]
    pub fn from_items(items: Vec<T>) -> Self {
        Self::build(items, false)
    }

    /// A list that only its owning collection may mutate.
    pub(crate) fn managed(items: Vec<T>) -> Self {
        Self::build(items, true)
    }

    fn build(items: Vec<T>, managed: bool) -> Self {
        let items = Arc::new(items);
        Self {
            core: CollectionCore::new(Arc::clone(&items)),
            state: Mutex::new(ListState {
                items,
                calculator: Arc::new(PositionalCalculator::new()),
            }),
            managed,
        }
    }

    /// Use `calculator` for [`set`](Self::set).
    #[must_use]
    pub fn with_calculator(self, calculator: impl ChangesCalculator<T> + 'static) -> Self {
        self.set_calculator(calculator);
        self
    }

    /// Switch the calculator used by later [`set`](Self::set) calls.
    pub fn set_calculator(&self, calculator: impl ChangesCalculator<T> + 'static) {
        lock_unpoisoned(&self.state).calculator = Arc::new(calculator);
    }

    /// Whether external mutation is rejected.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    // ── Reads ────────────────────────────────────────────────────────

    #[must_use]
    pub fn size(&self) -> usize {
        lock_unpoisoned(&self.state).items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        lock_unpoisoned(&self.state).items.get(index).cloned()
    }

    /// Snapshot of the current items.
    #[must_use]
    pub fn get_items(&self) -> Arc<Vec<T>> {
        Arc::clone(&lock_unpoisoned(&self.state).items)
    }

    #[must_use]
    pub fn changes_count(&self) -> u64 {
        self.core.changes_count()
    }

    pub fn observe_changes(
        &self,
        f: impl Fn(&Arc<ChangeBatch<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.core.observe_changes(f)
    }

    pub fn observe_items(&self, f: impl Fn(&Arc<Vec<T>>) + Send + Sync + 'static) -> Subscription {
        self.core.observe_items(f)
    }

    // ── Public mutations ─────────────────────────────────────────────

    pub fn add(&self, item: T) -> Result<()> {
        self.external("add")?;
        self.append(vec![item])
    }

    pub fn add_at(&self, position: usize, item: T) -> Result<()> {
        self.external("add_at")?;
        self.insert_all(position, vec![item])
    }

    pub fn add_all(&self, items: Vec<T>) -> Result<()> {
        self.external("add_all")?;
        self.append(items)
    }

    pub fn add_all_at(&self, position: usize, items: Vec<T>) -> Result<()> {
        self.external("add_all_at")?;
        self.insert_all(position, items)
    }

    /// Remove and return the item at `position`.
    pub fn remove(&self, position: usize) -> Result<T> {
        self.external("remove")?;
        self.remove_at(position)
    }

    /// Remove the first item equal to `item`.
    pub fn remove_item(&self, item: &T) -> Result<()> {
        self.external("remove_item")?;
        self.mutate("remove_item", |items| {
            let Some(position) = items.iter().position(|i| i == item) else {
                return Err(Error::ItemNotFound);
            };
            let old = items.remove(position);
            Ok(Some(Edit::new(
                Vec::new(),
                vec![old],
                Change::Removed { position, count: 1 },
            )))
        })
    }

    /// Remove `count` items starting at `position`. `count == 0` is a no-op.
    pub fn remove_range(&self, position: usize, count: usize) -> Result<()> {
        self.external("remove_range")?;
        self.remove_span(position, count)
    }

    pub fn clear(&self) -> Result<()> {
        self.external("clear")?;
        self.clear_all()
    }

    /// Replace the item at `position`, returning the previous one.
    pub fn update(&self, position: usize, item: T) -> Result<T> {
        self.external("update")?;
        self.replace_at(position, item)
    }

    /// Replace the whole content, publishing the calculated difference.
    pub fn set(&self, items: Vec<T>) -> Result<()> {
        self.external("set")?;
        self.replace_all(items)
    }

    // ── Owner mutations (no managed check) ───────────────────────────

    pub(crate) fn append(&self, new_items: Vec<T>) -> Result<()> {
        self.mutate("append", |items| {
            let position = items.len();
            Ok(Self::insert_edit(items, position, new_items))
        })
    }

    pub(crate) fn insert_all(&self, position: usize, new_items: Vec<T>) -> Result<()> {
        self.mutate("insert", |items| {
            if position > items.len() {
                return Err(Error::IndexOutOfBounds {
                    index: position,
                    size: items.len(),
                });
            }
            Ok(Self::insert_edit(items, position, new_items))
        })
    }

    pub(crate) fn remove_at(&self, position: usize) -> Result<T> {
        let mut out = None;
        self.mutate("remove", |items| {
            if position >= items.len() {
                return Err(Error::IndexOutOfBounds {
                    index: position,
                    size: items.len(),
                });
            }
            let old = items.remove(position);
            out = Some(old.clone());
            Ok(Some(Edit::new(
                Vec::new(),
                vec![old],
                Change::Removed { position, count: 1 },
            )))
        })?;
        out.ok_or_else(|| Error::IndexOutOfBounds {
            index: position,
            size: self.size(),
        })
    }

    pub(crate) fn remove_span(&self, position: usize, count: usize) -> Result<()> {
        self.mutate("remove_range", |items| {
            let end = position.saturating_add(count);
            if position > items.len() || end > items.len() {
                return Err(Error::IndexOutOfBounds {
                    index: end.max(position),
                    size: items.len(),
                });
            }
            if count == 0 {
                return Ok(None);
            }
            let removed: Vec<T> = items.drain(position..end).collect();
            Ok(Some(Edit::new(
                Vec::new(),
                removed,
                Change::Removed { position, count },
            )))
        })
    }

    pub(crate) fn clear_all(&self) -> Result<()> {
        self.mutate("clear", |items| {
            if items.is_empty() {
                return Ok(None);
            }
            let count = items.len();
            let removed = std::mem::take(items);
            Ok(Some(Edit::new(
                Vec::new(),
                removed,
                Change::Removed { position: 0, count },
            )))
        })
    }

    pub(crate) fn replace_at(&self, position: usize, item: T) -> Result<T> {
        let mut out = None;
        self.mutate("update", |items| {
            let Some(slot) = items.get_mut(position) else {
                return Err(Error::IndexOutOfBounds {
                    index: position,
                    size: items.len(),
                });
            };
            let old = std::mem::replace(slot, item.clone());
            out = Some(old.clone());
            if old == item {
                return Ok(None);
            }
            Ok(Some(Edit::new(
                vec![item],
                vec![old],
                Change::changed(position, 1),
            )))
        })?;
        out.ok_or_else(|| Error::IndexOutOfBounds {
            index: position,
            size: self.size(),
        })
    }

    pub(crate) fn replace_all(&self, new_items: Vec<T>) -> Result<()> {
        self.core.check_reentrancy()?;
        let emission = self.core.begin_emit();
        let mut state = lock_unpoisoned(&self.state);
        let old = Arc::clone(&state.items);
        let new = Arc::new(new_items);
        let changes = state.calculator.calculate(old.as_slice(), new.as_slice());
        state.items = Arc::clone(&new);
        if changes.is_empty() {
            return Ok(());
        }
        let sequence = self.core.next_sequence();
        drop(state);
        let snapshot = Arc::clone(&new);
        emission.publish(sequence, snapshot, move || {
            let (inserted, removed) = replay(old.as_slice(), &changes, new.as_slice())
                .map(|r| (r.inserted, r.removed))
                .unwrap_or_default();
            (inserted, removed, changes)
        });
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn insert_edit(items: &mut Vec<T>, position: usize, new_items: Vec<T>) -> Option<Edit<T>> {
        if new_items.is_empty() {
            return None;
        }
        let count = new_items.len();
        items.splice(position..position, new_items.iter().cloned());
        Some(Edit::new(
            new_items,
            Vec::new(),
            Change::Inserted { position, count },
        ))
    }

    fn external(&self, op: &'static str) -> Result<()> {
        if self.managed {
            tracing::warn!(op, "external mutation of a managed list rejected");
            return Err(Error::ManagedList);
        }
        Ok(())
    }

    /// Validate and apply an edit under the emission and instance locks,
    /// then publish it.
    ///
    /// `f` must return `Err` before touching `items` when the edit is
    /// invalid, and `Ok(None)` when it changes nothing.
    fn mutate(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Vec<T>) -> Result<Option<Edit<T>>>,
    ) -> Result<()> {
        self.core.check_reentrancy()?;
        let emission = self.core.begin_emit();
        let mut state = lock_unpoisoned(&self.state);
        let edit = match f(Arc::make_mut(&mut state.items)) {
            Ok(Some(edit)) => edit,
            Ok(None) => return Ok(()),
            Err(err) => {
                tracing::warn!(op, error = %err, "list mutation rejected");
                return Err(err);
            }
        };
        let sequence = self.core.next_sequence();
        let snapshot = Arc::clone(&state.items);
        drop(state);
        emission.publish(sequence, snapshot, move || {
            (edit.inserted, edit.removed, edit.changes)
        });
        Ok(())
    }
}

impl<T> ObservableCollection<T> for ObservableList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn core(&self) -> &CollectionCore<T> {
        &self.core
    }

    fn size(&self) -> usize {
        ObservableList::size(self)
    }

    fn get_items(&self) -> Arc<Vec<T>> {
        ObservableList::get_items(self)
    }
}
