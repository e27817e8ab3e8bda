//! Capability context (`Cx`) for cooperative, lifecycle-driven cancellation.
//!
//! `Cx` is a lightweight handle threaded through every background job, page
//! load, and lifecycle-bound subscription in FrankenBind. It enables:
//!
//! - **Cooperative cancellation**: Any holder can check `cx.is_cancelled()` and
//!   bail out early.
//! - **Cancellation hooks**: [`Cx::on_cancel`] registers a one-shot callback that
//!   runs synchronously on the cancelling thread, exactly once.
//! - **Scoping**: [`Cx::child`] derives a context that is cancelled whenever its
//!   parent is. Lifecycle scopes use this to nest stop-scoped work inside
//!   destroy-scoped work.
//!
//! There are no deadlines: cancellation is always an explicit transition.
//!
//! # Design
//!
//! `Cx` is cheaply cloneable (`Arc` inside) and immutable from the outside.
//! To cancel, hold the companion [`CxController`].
//!
//! # Example
//!
//! ```
//! use fbind_core::cx::Cx;
//!
//! let (parent, parent_ctrl) = Cx::background();
//! let (child, _child_ctrl) = parent.child();
//! assert!(!child.is_cancelled());
//!
//! parent_ctrl.cancel();
//! assert!(child.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lock_unpoisoned;

// ─── Cx ID generation ────────────────────────────────────────────────────────

static NEXT_CX_ID: AtomicU64 = AtomicU64::new(1);

fn next_cx_id() -> u64 {
    NEXT_CX_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Metrics counters ────────────────────────────────────────────────────────

/// Total number of Cx cancellations observed.
static CX_CANCELLATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total cancellation count (for diagnostics/telemetry).
#[must_use]
pub fn cx_cancellations_total() -> u64 {
    CX_CANCELLATIONS_TOTAL.load(Ordering::Relaxed)
}

// ─── Inner shared state ──────────────────────────────────────────────────────

type CancelHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Attached {
    hooks: Vec<CancelHook>,
    children: Vec<Weak<CxInner>>,
}

struct CxInner {
    id: u64,
    cancelled: AtomicBool,
    /// Hooks and children registered before cancellation. Drained exactly once.
    attached: Mutex<Attached>,
}

impl CxInner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_cx_id(),
            cancelled: AtomicBool::new(false),
            attached: Mutex::new(Attached::default()),
        })
    }

    fn cancel(&self) {
        // Flip under the lock so `on_cancel`/`child` either observe the flag
        // or get drained below.
        let attached = {
            let mut attached = lock_unpoisoned(&self.attached);
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *attached)
        };

        CX_CANCELLATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cx_id = self.id, "cx cancelled");

        for hook in attached.hooks {
            hook();
        }
        for child in attached.children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl std::fmt::Debug for CxInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CxInner")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

// ─── Cx ──────────────────────────────────────────────────────────────────────

/// Capability context handle.
///
/// Cheaply cloneable. Check `is_cancelled()` at natural yield points
/// (loop iterations, before I/O, before delivering a result).
#[derive(Clone, Debug)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Create a root context.
    #[must_use]
    pub fn background() -> (Self, CxController) {
        let inner = CxInner::new();
        (
            Self {
                inner: Arc::clone(&inner),
            },
            CxController { inner },
        )
    }

    /// Derive a child context.
    ///
    /// Cancelling the parent cancels the child (and its hooks run). A child
    /// derived from an already-cancelled parent starts cancelled.
    #[must_use]
    pub fn child(&self) -> (Self, CxController) {
        let (child, ctrl) = Self::background();
        let parent_cancelled = {
            let mut attached = lock_unpoisoned(&self.inner.attached);
            if self.inner.cancelled.load(Ordering::Acquire) {
                true
            } else {
                attached.children.retain(|c| c.strong_count() > 0);
                attached.children.push(Arc::downgrade(&child.inner));
                false
            }
        };
        if parent_cancelled {
            ctrl.cancel();
        }
        (child, ctrl)
    }

    /// Unique identifier for this context (for tracing/logging).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Check if this context (or any ancestor) has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register a hook to run when this context is cancelled.
    ///
    /// The hook runs exactly once, on the thread that performs the
    /// cancellation. If the context is already cancelled it runs immediately
    /// on the calling thread.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut attached = lock_unpoisoned(&self.inner.attached);
            if !self.inner.cancelled.load(Ordering::Acquire) {
                attached.hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Check if the context is still live; return `Err` if cancelled.
    ///
    /// Intended for use at yield points:
    /// ```ignore
    /// cx.check()?;
    /// // ... continue work ...
    /// ```
    pub fn check(&self) -> Result<(), CxError> {
        if self.is_cancelled() {
            return Err(CxError::Cancelled);
        }
        Ok(())
    }
}

// ─── CxController ────────────────────────────────────────────────────────────

/// Control handle for a [`Cx`].
///
/// Held by the owner of the context to trigger cancellation.
/// Dropping the controller does **not** cancel the context; cancellation
/// is always explicit.
#[derive(Debug)]
pub struct CxController {
    inner: Arc<CxInner>,
}

impl CxController {
    /// Cancel the associated context and every live descendant.
    ///
    /// Idempotent: hooks run and the cancellation counter advances only on the
    /// first call.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether this context has already been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A fresh handle to the controlled context.
    #[must_use]
    pub fn cx(&self) -> Cx {
        Cx {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ─── CxError ─────────────────────────────────────────────────────────────────

/// Error returned when an operation observes a cancelled `Cx`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CxError {
    /// The context was explicitly cancelled.
    #[error("context cancelled")]
    Cancelled,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn background_cx_is_not_cancelled() {
        let (cx, _ctrl) = Cx::background();
        assert!(!cx.is_cancelled());
        assert!(cx.check().is_ok());
    }

    #[test]
    fn cancel_propagates() {
        let (cx, ctrl) = Cx::background();
        ctrl.cancel();
        assert!(cx.is_cancelled());
        assert_eq!(cx.check(), Err(CxError::Cancelled));
    }

    #[test]
    fn clone_shares_cancellation() {
        let (cx, ctrl) = Cx::background();
        let cx2 = cx.clone();
        ctrl.cancel();
        assert!(cx.is_cancelled());
        assert!(cx2.is_cancelled());
    }

    #[test]
    fn child_inherits_cancellation() {
        let (parent, parent_ctrl) = Cx::background();
        let (child, _child_ctrl) = parent.child();
        let (grandchild, _gc_ctrl) = child.child();
        parent_ctrl.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_cancel_leaves_parent_live() {
        let (parent, _parent_ctrl) = Cx::background();
        let (child, child_ctrl) = parent.child();
        child_ctrl.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let (parent, parent_ctrl) = Cx::background();
        parent_ctrl.cancel();
        let (child, _) = parent.child();
        assert!(child.is_cancelled());
    }

    #[test]
    fn hooks_run_exactly_once() {
        let (cx, ctrl) = Cx::background();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        cx.on_cancel(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        ctrl.cancel();
        ctrl.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_after_cancel_runs_immediately() {
        let (cx, ctrl) = Cx::background();
        ctrl.cancel();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        cx.on_cancel(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_cancel_runs_child_hooks() {
        let (parent, parent_ctrl) = Cx::background();
        let (child, _child_ctrl) = parent.child();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        child.on_cancel(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        parent_ctrl.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cx_id_is_unique() {
        let (cx1, _) = Cx::background();
        let (cx2, _) = Cx::background();
        assert_ne!(cx1.id(), cx2.id());
    }

    #[test]
    fn controller_cx_shares_state() {
        let (cx, ctrl) = Cx::background();
        assert_eq!(ctrl.cx().id(), cx.id());
        ctrl.cancel();
        assert!(ctrl.is_cancelled());
        assert!(ctrl.cx().is_cancelled());
    }

    #[test]
    fn cancellation_counter_increments() {
        let before = cx_cancellations_total();
        let (_cx, ctrl) = Cx::background();
        ctrl.cancel();
        assert!(cx_cancellations_total() > before);
    }

    #[test]
    fn cx_error_display() {
        assert_eq!(CxError::Cancelled.to_string(), "context cancelled");
    }
}
