#![forbid(unsafe_code)]

//! Lifecycle scope: created/started/saving-state signals and the
//! cancellation wiring behind `until_stop` / `until_destroy`.
//!
//! # State machine
//!
//! ```text
//!            on_create        on_start          on_stop
//!   Initial ──────────▶ Created ──────▶ Started ──────▶ Created ...
//!                          │                               │
//!                          └────────── on_destroy ─────────┴──▶ Destroyed
//! ```
//!
//! Two cancellation contexts hang off the scope. The destroy context lives
//! from `on_create` to `on_destroy`. The stop context is a child of it,
//! created on `on_start` and cancelled once the owner is stopped *and* not
//! saving state. While `saving_state` is set the stop cancellation is
//! deferred; `on_resume` and `finish_saving_state` re-evaluate it, and a new
//! `on_start` inside the window keeps the existing stop context alive.
//!
//! Destroy cancels both contexts, because the stop context is a child.
//!
//! A cancelling transition returns only after any callback of an affected
//! binding that is running on another thread has finished. No callback
//! starts afterwards.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use fbind_core::{Cx, CxController, lock_unpoisoned};

use super::dispatch::{Dispatcher, Immediate};
use super::producer::{Emitter, Producer, Sink, report_unhandled};
use crate::reactive::{Broadcast, Subscription};

type NextFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn<E> = Arc<dyn Fn(E) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Callbacks for a lifecycle-bound subscription.
///
/// All three are optional. A binding with no callbacks still runs its
/// producer but delivers nothing; errors without an `on_error` handler are
/// reported to the diagnostic log.
pub struct Callbacks<T, E> {
    on_next: Option<NextFn<T>>,
    on_error: Option<ErrorFn<E>>,
    on_complete: Option<CompleteFn>,
}

impl<T, E> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self {
            on_next: None,
            on_error: None,
            on_complete: None,
        }
    }
}

impl<T, E> std::fmt::Debug for Callbacks<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_next", &self.on_next.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl<T, E> Callbacks<T, E> {
    /// No callbacks: run the producer for its side effects only.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_next = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Whether no callback is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_next.is_none() && self.on_error.is_none() && self.on_complete.is_none()
    }
}

/// Sink for bindings without callbacks: nothing is scheduled.
struct SilentSink {
    cx: Cx,
}

impl<T: Send, E: Display + Send> Sink<T, E> for SilentSink {
    fn next(&self, _value: T) {}

    fn error(&self, error: E) {
        report_unhandled(&self.cx, &error);
    }

    fn complete(&self) {}
}

/// Serializes one binding's callbacks against its cancellation.
///
/// A callback runs with `running` held and only after re-checking the
/// context. The cancel hook takes the same lock, so cancelling returns only
/// once an in-flight callback has finished, and nothing starts afterwards.
#[derive(Default)]
struct DeliveryGate {
    running: Mutex<()>,
    delivering: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn deliver(&self, cx: &Cx, callback: impl FnOnce()) {
        let _running = lock_unpoisoned(&self.running);
        if cx.is_cancelled() {
            return;
        }
        let _marker = DeliveringMarker::enter(&self.delivering);
        callback();
    }

    /// Wait for an in-flight callback on another thread. A callback that
    /// cancels its own binding does not wait on itself.
    fn wait_idle(&self) {
        if *lock_unpoisoned(&self.delivering) == Some(thread::current().id()) {
            return;
        }
        drop(lock_unpoisoned(&self.running));
    }
}

struct DeliveringMarker<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> DeliveringMarker<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock_unpoisoned(slot) = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for DeliveringMarker<'_> {
    fn drop(&mut self) {
        *lock_unpoisoned(self.0) = None;
    }
}

/// Sink that marshals callbacks through the scope's dispatcher.
///
/// Every dispatched job re-checks cancellation under the binding's
/// [`DeliveryGate`] when it runs, so a job queued before the cancelling
/// transition is dropped if it runs after it.
struct DispatchSink<T, E> {
    cx: Cx,
    gate: Arc<DeliveryGate>,
    callbacks: Callbacks<T, E>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<T, E> DispatchSink<T, E> {
    fn new(cx: Cx, callbacks: Callbacks<T, E>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let gate = Arc::new(DeliveryGate::default());
        let hook_gate = Arc::clone(&gate);
        cx.on_cancel(move || hook_gate.wait_idle());
        Self {
            cx,
            gate,
            callbacks,
            dispatcher,
        }
    }

    fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let (cx, gate) = (self.cx.clone(), Arc::clone(&self.gate));
        self.dispatcher
            .dispatch(Box::new(move || gate.deliver(&cx, job)));
    }
}

impl<T, E> Sink<T, E> for DispatchSink<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    fn next(&self, value: T) {
        let Some(cb) = self.callbacks.on_next.clone() else {
            return;
        };
        self.dispatch(move || cb(value));
    }

    fn error(&self, error: E) {
        let Some(cb) = self.callbacks.on_error.clone() else {
            report_unhandled(&self.cx, &error);
            return;
        };
        self.dispatch(move || cb(error));
    }

    fn complete(&self) {
        let Some(cb) = self.callbacks.on_complete.clone() else {
            return;
        };
        self.dispatch(move || cb());
    }
}

/// Which lifecycle transition ends a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Cancelled when the owner stops (deferred while saving state).
    Stop,
    /// Cancelled when the owner is destroyed.
    Destroy,
}

/// Handle to a lifecycle-bound subscription.
///
/// Dropping the handle does **not** cancel: the lifecycle does.
#[derive(Debug)]
pub struct Binding {
    ctrl: Option<CxController>,
    kind: ScopeKind,
}

impl Binding {
    fn refused(kind: ScopeKind) -> Self {
        Self { ctrl: None, kind }
    }

    /// Cancel this binding early. Waits for a callback running on another
    /// thread to finish.
    pub fn cancel(&self) {
        if let Some(ctrl) = &self.ctrl {
            ctrl.cancel();
        }
    }

    /// Whether delivery has been severed (or never started).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.ctrl.as_ref().is_none_or(CxController::is_cancelled)
    }

    /// Whether the producer was started at all.
    #[must_use]
    pub fn was_started(&self) -> bool {
        self.ctrl.is_some()
    }

    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }
}

#[derive(Default)]
struct ScopeState {
    created: bool,
    started: bool,
    saving_state: bool,
    destroyed: bool,
    destroy: Option<(Cx, CxController)>,
    stop: Option<(Cx, CxController)>,
}

impl ScopeState {
    /// Take the stop controller if stop cancellation is now due.
    fn due_stop(&mut self) -> Option<CxController> {
        if self.started || self.saving_state {
            return None;
        }
        self.stop.take().map(|(_, ctrl)| ctrl)
    }
}

/// Reusable lifecycle holder implementing [`LifecycleBindable`].
///
/// The owning screen drives the transitions in platform callback order:
/// `on_create`, `on_start`, `on_resume`, `on_save_state`, `on_stop`,
/// `on_destroy`. Out-of-order transitions are logged and ignored.
pub struct LifecycleScope {
    state: Mutex<ScopeState>,
    created: Broadcast<bool>,
    started: Broadcast<bool>,
    saving_state: Broadcast<bool>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl std::fmt::Debug for LifecycleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.state);
        f.debug_struct("LifecycleScope")
            .field("created", &state.created)
            .field("started", &state.started)
            .field("saving_state", &state.saving_state)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl Default for LifecycleScope {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleScope {
    /// A scope delivering callbacks inline on the emitting thread.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dispatcher(Arc::new(Immediate))
    }

    /// A scope delivering callbacks through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            state: Mutex::new(ScopeState::default()),
            created: Broadcast::replaying_with(false),
            started: Broadcast::replaying_with(false),
            saving_state: Broadcast::replaying_with(false),
            dispatcher,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    pub fn on_create(&self) {
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.created || state.destroyed {
                tracing::warn!(destroyed = state.destroyed, "on_create ignored: scope already created");
                return;
            }
            state.created = true;
            state.destroy = Some(Cx::background());
        }
        self.created.emit(true);
    }

    pub fn on_start(&self) {
        {
            let mut state = lock_unpoisoned(&self.state);
            if !state.created || state.started {
                tracing::warn!(
                    created = state.created,
                    started = state.started,
                    "on_start ignored: invalid lifecycle order"
                );
                return;
            }
            state.started = true;
            let stop_live = state.stop.as_ref().is_some_and(|(cx, _)| !cx.is_cancelled());
            if !stop_live {
                let child = state.destroy.as_ref().map(|(cx, _)| cx.child());
                state.stop = child;
            }
        }
        self.started.emit(true);
    }

    /// The owner is interactive again; any save window is over.
    pub fn on_resume(&self) {
        self.finish_saving_state();
    }

    /// The owner is persisting state; stop cancellation is deferred.
    pub fn on_save_state(&self) {
        {
            let mut state = lock_unpoisoned(&self.state);
            if !state.created || state.saving_state {
                return;
            }
            state.saving_state = true;
        }
        self.saving_state.emit(true);
    }

    /// The save window is over; apply any deferred stop.
    pub fn finish_saving_state(&self) {
        let due = {
            let mut state = lock_unpoisoned(&self.state);
            if !state.saving_state {
                return;
            }
            state.saving_state = false;
            state.due_stop()
        };
        self.saving_state.emit(false);
        if let Some(ctrl) = due {
            tracing::debug!("deferred stop applied after save window");
            ctrl.cancel();
        }
    }

    pub fn on_stop(&self) {
        let (due, deferred) = {
            let mut state = lock_unpoisoned(&self.state);
            if !state.started {
                tracing::warn!("on_stop ignored: scope not started");
                return;
            }
            state.started = false;
            (state.due_stop(), state.saving_state)
        };
        self.started.emit(false);
        if deferred {
            tracing::debug!("stop cancellation deferred while saving state");
        }
        if let Some(ctrl) = due {
            ctrl.cancel();
        }
    }

    /// Terminal transition. Cancels stop- and destroy-scoped work.
    pub fn on_destroy(&self) {
        let (destroy, stop, was_started, was_saving) = {
            let mut state = lock_unpoisoned(&self.state);
            if !state.created {
                tracing::warn!(destroyed = state.destroyed, "on_destroy ignored: scope not created");
                return;
            }
            let was_started = std::mem::replace(&mut state.started, false);
            let was_saving = std::mem::replace(&mut state.saving_state, false);
            state.created = false;
            state.destroyed = true;
            (
                state.destroy.take(),
                state.stop.take(),
                was_started,
                was_saving,
            )
        };
        if was_saving {
            self.saving_state.emit(false);
        }
        if was_started {
            self.started.emit(false);
        }
        self.created.emit(false);
        // The stop context is a child of the destroy context; cancelling the
        // parent covers both, the explicit call keeps the order stop-first.
        if let Some((_, ctrl)) = stop {
            ctrl.cancel();
        }
        if let Some((_, ctrl)) = destroy {
            ctrl.cancel();
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[must_use]
    pub fn is_created(&self) -> bool {
        lock_unpoisoned(&self.state).created
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        lock_unpoisoned(&self.state).started
    }

    #[must_use]
    pub fn is_saving_state(&self) -> bool {
        lock_unpoisoned(&self.state).saving_state
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        lock_unpoisoned(&self.state).destroyed
    }

    /// Observe the `created` signal (replays the current value).
    pub fn observe_created(&self, f: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.created.subscribe(f)
    }

    /// Observe the `started` signal (replays the current value).
    pub fn observe_started(&self, f: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.started.subscribe(f)
    }

    /// Observe the `saving_state` signal (replays the current value).
    pub fn observe_saving_state(&self, f: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.saving_state.subscribe(f)
    }

    // ── Binding ──────────────────────────────────────────────────────

    /// Start `producer` under the given scope.
    ///
    /// The producer is not started at all when the scope is already over:
    /// destroyed (or never created) for [`ScopeKind::Destroy`], not started
    /// for [`ScopeKind::Stop`].
    pub fn bind<T, E, P>(&self, kind: ScopeKind, producer: P, callbacks: Callbacks<T, E>) -> Binding
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        P: Producer<T, E>,
    {
        let parent = {
            let state = lock_unpoisoned(&self.state);
            match kind {
                ScopeKind::Destroy => state.destroy.as_ref().map(|(cx, _)| cx.clone()),
                ScopeKind::Stop if state.started => state.stop.as_ref().map(|(cx, _)| cx.clone()),
                ScopeKind::Stop => None,
            }
        };
        let Some(parent) = parent.filter(|cx| !cx.is_cancelled()) else {
            if self.is_destroyed() {
                tracing::debug!(?kind, "producer not started: scope destroyed");
            } else {
                tracing::warn!(?kind, "producer not started: scope not active");
            }
            return Binding::refused(kind);
        };

        let (cx, ctrl) = parent.child();
        let sink: Arc<dyn Sink<T, E>> = if callbacks.is_empty() {
            Arc::new(SilentSink { cx: cx.clone() })
        } else {
            Arc::new(DispatchSink::new(
                cx.clone(),
                callbacks,
                Arc::clone(&self.dispatcher),
            ))
        };
        let emitter = Emitter::new(cx.clone(), sink);
        Box::new(producer).start(cx, emitter);
        Binding {
            ctrl: Some(ctrl),
            kind,
        }
    }
}

/// Capability of any lifecycle-bearing object: run asynchronous producers
/// that are cancelled automatically when the object stops or is destroyed.
///
/// Implementors only provide [`lifecycle_scope`](Self::lifecycle_scope); the
/// binding methods come for free.
pub trait LifecycleBindable {
    fn lifecycle_scope(&self) -> &LifecycleScope;

    /// Run `producer` until the owner stops, delivering values to `on_next`.
    fn until_stop<T, E, P>(&self, producer: P, on_next: impl Fn(T) + Send + Sync + 'static) -> Binding
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        P: Producer<T, E>,
    {
        self.until_stop_with(producer, Callbacks::none().on_next(on_next))
    }

    /// Run `producer` until the owner stops, with full callbacks.
    fn until_stop_with<T, E, P>(&self, producer: P, callbacks: Callbacks<T, E>) -> Binding
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        P: Producer<T, E>,
    {
        self.lifecycle_scope()
            .bind(ScopeKind::Stop, producer, callbacks)
    }

    /// Run `producer` until the owner is destroyed, delivering values to `on_next`.
    fn until_destroy<T, E, P>(
        &self,
        producer: P,
        on_next: impl Fn(T) + Send + Sync + 'static,
    ) -> Binding
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        P: Producer<T, E>,
    {
        self.until_destroy_with(producer, Callbacks::none().on_next(on_next))
    }

    /// Run `producer` until the owner is destroyed, with full callbacks.
    fn until_destroy_with<T, E, P>(&self, producer: P, callbacks: Callbacks<T, E>) -> Binding
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        P: Producer<T, E>,
    {
        self.lifecycle_scope()
            .bind(ScopeKind::Destroy, producer, callbacks)
    }
}

impl LifecycleBindable for LifecycleScope {
    fn lifecycle_scope(&self) -> &LifecycleScope {
        self
    }
}
