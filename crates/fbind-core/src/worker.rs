#![forbid(unsafe_code)]

//! Dedicated single-worker job queue.
//!
//! A [`SerialWorker`] owns one named thread that drains a FIFO channel of
//! jobs. Collections use one worker per instance for their background work
//! (page loads, filter re-derivation), which gives in-order processing of
//! successive async results without any global serialization.
//!
//! # Ordering
//!
//! Jobs run strictly in submission order, one at a time. A job submitted
//! from inside another job runs after every job already queued.
//!
//! # Failure Modes
//!
//! - **Panicking job**: caught, logged at `error`, and the worker keeps
//!   serving the queue.
//! - **Dropped from the worker thread**: the last handle may be released by a
//!   job running on the worker itself. The thread is then detached instead of
//!   joined and exits once the queue drains.
//!
//! # Example
//!
//! ```
//! use fbind_core::worker::SerialWorker;
//! use std::sync::{Arc, Mutex};
//!
//! let worker = SerialWorker::start("example").unwrap();
//! let log = Arc::new(Mutex::new(Vec::new()));
//! for i in 0..3 {
//!     let log = Arc::clone(&log);
//!     worker.submit(move || log.lock().unwrap().push(i)).unwrap();
//! }
//! worker.flush();
//! assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
//! ```

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send>;

/// Messages sent to the worker thread.
enum WorkerMsg {
    /// Run a job.
    Run(Job),
    /// Finish the queued jobs, then exit.
    Shutdown,
}

/// Returned by [`SerialWorker::submit`] once the worker thread has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serial worker has stopped")]
pub struct WorkerStopped;

/// Handle to a running single-worker queue.
pub struct SerialWorker {
    name: String,
    sender: mpsc::Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl std::fmt::Debug for SerialWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialWorker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialWorker {
    /// Spawn the worker thread.
    pub fn start(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, rx))?;
        let thread_id = handle.thread().id();
        Ok(Self {
            name,
            sender: tx,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Worker name (also the thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), WorkerStopped> {
        self.sender
            .send(WorkerMsg::Run(Box::new(job)))
            .map_err(|_| WorkerStopped)
    }

    /// Whether the calling thread is this worker's thread.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Block until every job submitted before this call has run.
    ///
    /// Returns immediately when called from the worker thread itself (the
    /// barrier would wait on its own caller) or after the worker stopped.
    pub fn flush(&self) {
        if self.is_worker_thread() {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel::<()>();
        if self
            .submit(move || {
                let _ = done_tx.send(());
            })
            .is_ok()
        {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take()
            && !self.is_worker_thread()
        {
            let _ = handle.join();
        }
    }
}

fn worker_loop(name: &str, rx: mpsc::Receiver<WorkerMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMsg::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(worker = name, "serial worker job panicked");
                }
            }
            WorkerMsg::Shutdown => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = SerialWorker::start("test-order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = Arc::clone(&log);
            worker.submit(move || log.lock().unwrap().push(i)).unwrap();
        }
        worker.flush();
        assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn jobs_run_off_the_calling_thread() {
        let worker = SerialWorker::start("test-thread").unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        worker
            .submit(move || {
                *seen_clone.lock().unwrap() = thread::current().name().map(str::to_owned);
            })
            .unwrap();
        worker.flush();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("test-thread"));
        assert!(!worker.is_worker_thread());
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let worker = SerialWorker::start("test-panic").unwrap();
        worker.submit(|| panic!("boom")).unwrap();
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = Arc::clone(&ran);
        worker.submit(move || *ran_clone.lock().unwrap() = true).unwrap();
        worker.flush();
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn nested_submit_runs_after_queued_jobs() {
        let worker = Arc::new(SerialWorker::start("test-nested").unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let worker_inner = Arc::clone(&worker);
            let log = Arc::clone(&log);
            worker
                .submit(move || {
                    log.lock().unwrap().push("outer");
                    let log2 = Arc::clone(&log);
                    worker_inner
                        .submit(move || log2.lock().unwrap().push("nested"))
                        .unwrap();
                })
                .unwrap();
        }
        {
            let log = Arc::clone(&log);
            worker
                .submit(move || log.lock().unwrap().push("second"))
                .unwrap();
        }
        worker.flush();
        worker.flush();
        assert_eq!(*log.lock().unwrap(), vec!["outer", "second", "nested"]);
    }

    #[test]
    fn drop_joins_after_draining() {
        let log = Arc::new(Mutex::new(0));
        {
            let worker = SerialWorker::start("test-drop").unwrap();
            for _ in 0..10 {
                let log = Arc::clone(&log);
                worker.submit(move || *log.lock().unwrap() += 1).unwrap();
            }
        }
        assert_eq!(*log.lock().unwrap(), 10);
    }
}
