#![forbid(unsafe_code)]

//! Delivery scheduling for lifecycle-bound callbacks.
//!
//! Producers emit from whatever thread they run on. Callbacks supplied by a
//! screen usually have to run on its UI thread, so every non-empty binding
//! hands its deliveries to a [`Dispatcher`]. Bindings without callbacks skip
//! the dispatcher entirely.

use std::collections::VecDeque;
use std::sync::Mutex;

use fbind_core::lock_unpoisoned;

/// A deferred callback invocation.
pub type DispatchJob = Box<dyn FnOnce() + Send>;

/// Schedules callback invocations.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: DispatchJob);
}

/// Runs every job inline on the emitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, job: DispatchJob) {
        job();
    }
}

/// FIFO queue drained by the host's UI loop.
///
/// Emitting threads only enqueue; the owner calls [`MainQueue::run_pending`]
/// from its UI thread each frame.
#[derive(Default)]
pub struct MainQueue {
    jobs: Mutex<VecDeque<DispatchJob>>,
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl MainQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock_unpoisoned(&self.jobs).len()
    }

    /// Run queued jobs in order, including ones enqueued while draining.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = lock_unpoisoned(&self.jobs).pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Dispatcher for MainQueue {
    fn dispatch(&self, job: DispatchJob) {
        lock_unpoisoned(&self.jobs).push_back(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn immediate_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        Immediate.dispatch(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn main_queue_defers_until_drained() {
        let queue = MainQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            queue.dispatch(Box::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(queue.pending(), 3);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn main_queue_accepts_jobs_from_other_threads() {
        let queue = Arc::new(MainQueue::new());
        let q = Arc::clone(&queue);
        std::thread::spawn(move || q.dispatch(Box::new(|| {})))
            .join()
            .unwrap();
        assert_eq!(queue.run_pending(), 1);
    }
}
