#![forbid(unsafe_code)]

//! Asynchronous producers and the emitters they deliver through.
//!
//! A [`Producer`] is started once with a [`Cx`] and an [`Emitter`]. It may
//! emit any number of values, then at most one terminal event (error or
//! completion), from any thread. The emitter enforces the delivery rules:
//!
//! 1. Nothing is delivered after the `Cx` is cancelled.
//! 2. Nothing is delivered after the first terminal event.
//!
//! [`Task`] is the single-value producer used by collection loaders.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use fbind_core::{Cx, lock_unpoisoned};

/// Something that can be started to produce values asynchronously.
pub trait Producer<T, E>: Send + 'static {
    /// Start producing. Implementations must not block the caller for long;
    /// long-running work belongs on a worker thread.
    fn start(self: Box<Self>, cx: Cx, emitter: Emitter<T, E>);
}

impl<T, E, F> Producer<T, E> for F
where
    F: FnOnce(Cx, Emitter<T, E>) + Send + 'static,
{
    fn start(self: Box<Self>, cx: Cx, emitter: Emitter<T, E>) {
        (*self)(cx, emitter);
    }
}

/// Receiving end of an [`Emitter`].
pub trait Sink<T, E>: Send + Sync {
    fn next(&self, value: T);
    fn error(&self, error: E);
    fn complete(&self);
}

struct EmitterShared<T, E> {
    cx: Cx,
    terminated: AtomicBool,
    sink: Arc<dyn Sink<T, E>>,
}

/// Handle a producer emits through. Cheap to clone and `Send`.
pub struct Emitter<T, E> {
    shared: Arc<EmitterShared<T, E>>,
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> std::fmt::Debug for Emitter<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("cx_id", &self.shared.cx.id())
            .field("terminated", &self.shared.terminated.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> Emitter<T, E> {
    /// Build an emitter delivering into `sink` while `cx` is live.
    pub fn new(cx: Cx, sink: Arc<dyn Sink<T, E>>) -> Self {
        Self {
            shared: Arc::new(EmitterShared {
                cx,
                terminated: AtomicBool::new(false),
                sink,
            }),
        }
    }

    fn live(&self) -> bool {
        !self.shared.cx.is_cancelled() && !self.shared.terminated.load(Ordering::Acquire)
    }

    /// Deliver a value.
    pub fn next(&self, value: T) {
        if self.live() {
            self.shared.sink.next(value);
        }
    }

    /// Deliver a terminal error. Ignored after any terminal event.
    pub fn error(&self, error: E) {
        if self.shared.cx.is_cancelled() || self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.sink.error(error);
    }

    /// Deliver completion. Ignored after any terminal event.
    pub fn complete(&self) {
        if self.shared.cx.is_cancelled() || self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.sink.complete();
    }

    /// Whether deliveries would be dropped (cancelled or terminated).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.live()
    }

    /// The context this emitter is bound to.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.shared.cx
    }
}

// ─── Task ────────────────────────────────────────────────────────────────────

/// Failure of a [`Task`] observed through [`Task::wait`].
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The producer reported an error.
    #[error("task failed: {0}")]
    Failed(E),
    /// The producer finished, or was dropped, without emitting a value.
    #[error("task finished without producing a value")]
    Abandoned,
}

type TaskFn<T, E> = Box<dyn FnOnce(Cx, Emitter<T, E>) + Send>;

/// A lazy, single-value asynchronous computation.
///
/// Nothing runs until the task is started, either through a lifecycle
/// binding or [`Task::wait`].
pub struct Task<T, E> {
    run: TaskFn<T, E>,
}

impl<T, E> std::fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

impl<T: Send + 'static, E: Send + 'static> Task<T, E> {
    /// Wrap a start function. It must eventually call `next` then `complete`,
    /// or `error`, on the emitter (from any thread).
    pub fn new(run: impl FnOnce(Cx, Emitter<T, E>) + Send + 'static) -> Self {
        Self { run: Box::new(run) }
    }

    /// A task that resolves immediately with `value`.
    pub fn ready(value: T) -> Self {
        Self::new(move |_cx, emitter| {
            emitter.next(value);
            emitter.complete();
        })
    }

    /// A task that fails immediately with `error`.
    pub fn failed(error: E) -> Self {
        Self::new(move |_cx, emitter| emitter.error(error))
    }

    /// Transform the produced value.
    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Task<U, E> {
        Task::new(move |cx, outer: Emitter<U, E>| {
            let sink = Arc::new(MapSink {
                f: Mutex::new(Some(f)),
                outer,
                _input: PhantomData,
            });
            (self.run)(cx.clone(), Emitter::new(cx, sink));
        })
    }

    /// Start with a fresh background context and block until the task
    /// resolves. Meant for worker threads and tests, never for UI threads.
    pub fn wait(self) -> Result<T, TaskError<E>> {
        let (cx, _ctrl) = Cx::background();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink {
            tx: Mutex::new(Some(tx)),
        });
        (self.run)(cx.clone(), Emitter::new(cx, sink));
        rx.recv().unwrap_or(Err(TaskError::Abandoned))
    }
}

impl<T: Send + 'static, E: Send + 'static> Producer<T, E> for Task<T, E> {
    fn start(self: Box<Self>, cx: Cx, emitter: Emitter<T, E>) {
        (self.run)(cx, emitter);
    }
}

struct MapSink<T, U, E, F> {
    f: Mutex<Option<F>>,
    outer: Emitter<U, E>,
    _input: PhantomData<fn(T)>,
}

impl<T, U, E, F> Sink<T, E> for MapSink<T, U, E, F>
where
    F: FnOnce(T) -> U + Send,
    U: Send,
    E: Send,
{
    fn next(&self, value: T) {
        if let Some(f) = lock_unpoisoned(&self.f).take() {
            self.outer.next(f(value));
        }
    }

    fn error(&self, error: E) {
        self.outer.error(error);
    }

    fn complete(&self) {
        self.outer.complete();
    }
}

struct ChannelSink<T, E> {
    tx: Mutex<Option<mpsc::Sender<Result<T, TaskError<E>>>>>,
}

impl<T: Send, E: Send> Sink<T, E> for ChannelSink<T, E> {
    fn next(&self, value: T) {
        if let Some(tx) = lock_unpoisoned(&self.tx).take() {
            let _ = tx.send(Ok(value));
        }
    }

    fn error(&self, error: E) {
        if let Some(tx) = lock_unpoisoned(&self.tx).take() {
            let _ = tx.send(Err(TaskError::Failed(error)));
        }
    }

    fn complete(&self) {
        // Dropping the sender wakes `wait` with `Abandoned` if no value came.
        lock_unpoisoned(&self.tx).take();
    }
}

/// Log an error nobody handles. This is the diagnostic sink for
/// subscriptions without an error callback.
pub(crate) fn report_unhandled<E: Display>(cx: &Cx, error: &E) {
    tracing::error!(cx_id = cx.id(), error = %error, "unhandled error in lifecycle-bound subscription");
}
