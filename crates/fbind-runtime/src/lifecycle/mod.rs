#![forbid(unsafe_code)]

//! Lifecycle-scoped subscriptions.
//!
//! A screen (or any lifecycle-bearing object) implements
//! [`LifecycleBindable`] by exposing a [`LifecycleScope`]. Asynchronous
//! [`Producer`]s bound through `until_stop` / `until_destroy` are cancelled
//! automatically by the matching lifecycle transition.
//!
//! # Contract
//!
//! 1. A producer is never started if its scope is already over.
//! 2. Once the scope's cancellation fires, no next/error/completion callback
//!    runs, including deliveries already queued on the dispatcher.
//! 3. A binding without callbacks runs its producer for side effects and
//!    schedules nothing.
//! 4. An error with no `on_error` handler is logged at `error` level as a
//!    programmer error.
//! 5. Stop-scoped cancellation is deferred while the owner is saving state.

pub mod dispatch;
pub mod producer;
pub mod scope;

pub use dispatch::{DispatchJob, Dispatcher, Immediate, MainQueue};
pub use producer::{Emitter, Producer, Sink, Task, TaskError};
pub use scope::{Binding, Callbacks, LifecycleBindable, LifecycleScope, ScopeKind};
