//! Worker pool: a small set of threads for I/O-bound and off-loop-safe
//! work.
//!
//! Jobs are boxed closures pulled from a crossbeam channel. Results travel
//! back through a [`Promise`], a one-shot handle backed by a bounded(1)
//! channel. Completions that need to touch panel state do not resolve here;
//! they re-enter the control loop as posted messages.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One-shot result handle for work running off the calling thread.
#[derive(Debug)]
pub struct Promise<T> {
    rx: Receiver<T>,
}

impl<T: Send + 'static> Promise<T> {
    /// A promise that is already resolved.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(value);
        Self { rx }
    }

    /// Create an unresolved promise and its completer.
    pub fn pending() -> (Completer<T>, Self) {
        let (tx, rx) = bounded(1);
        (Completer { tx }, Self { rx })
    }

    /// Take the value if it has resolved. Non-blocking.
    pub fn try_take(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block until resolution. `None` if the completer was dropped
    /// unresolved.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Resolves a [`Promise`]. Dropping it unresolved wakes waiters with
/// nothing.
#[derive(Debug)]
pub struct Completer<T> {
    tx: Sender<T>,
}

impl<T: Send + 'static> Completer<T> {
    /// Resolve the promise. A second resolution is silently ignored.
    pub fn complete(&self, value: T) {
        let _ = self.tx.try_send(value);
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool with `threads` workers (at least one).
    ///
    /// # Panics
    ///
    /// Panics if the OS fails to spawn a worker thread.
    #[allow(clippy::missing_panics_doc)]
    pub fn new(threads: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let handles = (0..threads.max(1))
            .map(|index| {
                let rx = job_rx.clone();
                thread::Builder::new()
                    .name(format!("panelforge-worker-{index}"))
                    .spawn(move || Self::run_loop(&rx))
                    .expect("Failed to spawn worker thread")
            })
            .collect();

        Self {
            job_tx: Some(job_tx),
            handles,
        }
    }

    /// Run a job with no result channel.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(Box::new(job));
        }
    }

    /// Run a job and hand back a promise for its result.
    pub fn submit<T, F>(&self, job: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (completer, promise) = Promise::pending();
        self.execute(move || completer.complete(job()));
        promise
    }

    /// Drain outstanding jobs and join the workers.
    pub fn shutdown(mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn run_loop(rx: &Receiver<Job>) {
        while let Ok(job) = rx.recv() {
            // A panicking job must not take the worker down with it.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!("worker job panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
