#![forbid(unsafe_code)]

//! Core: cancellation contexts, single-worker queues, and containment of
//! host-supplied closures.

pub mod cx;
pub mod guard;
pub mod worker;

pub use cx::{Cx, CxController, CxError};
pub use guard::guarded;
pub use worker::{SerialWorker, WorkerStopped};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub fn lock_unpoisoned<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
