#![forbid(unsafe_code)]

//! Runtime: broadcast streams and the lifecycle-scoped subscription contract.

pub mod lifecycle;
pub mod reactive;

pub use lifecycle::{
    Binding, Callbacks, Dispatcher, Emitter, Immediate, LifecycleBindable, LifecycleScope,
    MainQueue, Producer, ScopeKind, Sink, Task, TaskError,
};
pub use reactive::{Broadcast, Subscription};
