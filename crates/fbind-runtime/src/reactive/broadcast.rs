#![forbid(unsafe_code)]

//! Hot multicast stream with an optional replay-latest slot.
//!
//! # Design
//!
//! [`Broadcast<T>`] keeps a subscriber list and, when built with
//! [`Broadcast::replaying`], a single retained last value. Every
//! [`emit`](Broadcast::emit) goes to all live subscribers in registration
//! order. A replaying broadcast additionally hands its latest value to each
//! new subscriber at subscribe time; a plain broadcast never does, so late
//! subscribers only see future values.
//!
//! Subscribers are stored as `Weak` callbacks. The strong side lives in the
//! [`Subscription`] guard returned by `subscribe()`: dropping it makes the
//! callback unreachable before the next emission.
//!
//! # Performance
//!
//! | Operation     | Complexity                 |
//! |---------------|----------------------------|
//! | `emit()`      | O(S) where S = subscribers |
//! | `subscribe()` | O(1) amortized             |
//! | `latest()`    | O(1) + clone               |
//!
//! # Failure Modes
//!
//! - **Concurrent subscribe and emit**: callbacks run outside the internal
//!   lock, so a replayed value and a concurrent emission may reach a new
//!   subscriber in either order. Owners that need strict ordering serialize
//!   `subscribe` and `emit` themselves (collections do, with their emission
//!   lock).
//! - **Subscriber leak**: guards stored indefinitely keep callbacks alive.
//!   Dead weak references are pruned lazily during `emit()`.

use std::sync::{Arc, Mutex, Weak};

use fbind_core::lock_unpoisoned;

type CallbackArc<T> = Arc<dyn Fn(&T) + Send + Sync>;
type CallbackWeak<T> = Weak<dyn Fn(&T) + Send + Sync>;

struct BroadcastInner<T> {
    /// Retained value; only populated when `replay` is set.
    latest: Option<T>,
    replay: bool,
    subscribers: Vec<CallbackWeak<T>>,
}

/// A hot, multicast stream of values.
///
/// Cloning a `Broadcast` creates a new handle to the **same** stream.
pub struct Broadcast<T> {
    inner: Arc<Mutex<BroadcastInner<T>>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock_unpoisoned(&self.inner);
        f.debug_struct("Broadcast")
            .field("latest", &inner.latest)
            .field("replay", &inner.replay)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Broadcast<T> {
    /// A broadcast that replays nothing to late subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_replay(false, None)
    }

    /// A broadcast that replays its latest value to new subscribers.
    #[must_use]
    pub fn replaying() -> Self {
        Self::with_replay(true, None)
    }

    /// A replaying broadcast seeded with an initial value.
    #[must_use]
    pub fn replaying_with(initial: T) -> Self {
        Self::with_replay(true, Some(initial))
    }

    fn with_replay(replay: bool, latest: Option<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BroadcastInner {
                latest,
                replay,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Deliver `value` to every live subscriber.
    pub fn emit(&self, value: T) {
        let callbacks: Vec<CallbackArc<T>> = {
            let mut inner = lock_unpoisoned(&self.inner);
            if inner.replay {
                inner.latest = Some(value.clone());
            }
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in &callbacks {
            cb(&value);
        }
    }

    /// Subscribe to future values (and the latest one, when replaying).
    ///
    /// Returns a [`Subscription`] guard. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let strong: CallbackArc<T> = Arc::new(callback);
        let replayed = {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.subscribers.push(Arc::downgrade(&strong));
            if inner.replay {
                inner.latest.clone()
            } else {
                None
            }
        };
        if let Some(value) = replayed {
            strong(&value);
        }
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Latest retained value. Always `None` for non-replaying broadcasts.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        lock_unpoisoned(&self.inner).latest.clone()
    }

    /// Whether at least one subscription guard is still alive.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        lock_unpoisoned(&self.inner)
            .subscribers
            .iter()
            .any(|w| w.strong_count() > 0)
    }

    /// Number of registered subscribers (including dead ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock_unpoisoned(&self.inner).subscribers.len()
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` drops the strong callback reference, so the
/// `Weak` held by the broadcast fails to upgrade on the next emission.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn std::any::Any + Send + Sync>,
}

impl Subscription {
    /// A subscription that is not attached to anything.
    pub fn detached() -> Self {
        Self {
            _guard: Box::new(()),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
