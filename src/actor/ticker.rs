//! Ticker: dedicated thread generating the engine's timing signal.
//!
//! The control loop drains this channel with `select!` alongside its
//! message channel. The buffer is tiny on purpose: if the loop falls
//! behind, ticks are skipped rather than queued.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default time between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// A tick event sent at regular intervals.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Tick number, monotonically increasing.
    pub number: u64,
    /// Time elapsed since the ticker was started.
    pub elapsed: Duration,
}

/// Ticker thread handle.
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    tick_rx: Receiver<Tick>,
}

impl Ticker {
    /// Spawn a ticker emitting every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if the OS fails to spawn the ticker thread.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn(interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        // Bounded with a small buffer: ticks must not queue up behind a
        // slow loop.
        let (tick_tx, tick_rx) = bounded(2);

        let handle = thread::Builder::new()
            .name("panelforge-ticker".to_string())
            .spawn(move || {
                Self::run_loop(&tick_tx, &shutdown_clone, interval);
            })
            .expect("Failed to spawn ticker thread");

        Self {
            handle: Some(handle),
            shutdown,
            tick_rx,
        }
    }

    /// The tick receiver, for `select!` in the control loop.
    #[inline]
    pub const fn receiver(&self) -> &Receiver<Tick> {
        &self.tick_rx
    }

    /// Signal the ticker to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stop and join the ticker thread.
    pub fn join(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn run_loop(tick_tx: &Sender<Tick>, shutdown: &Arc<AtomicBool>, interval: Duration) {
        let start = Instant::now();
        let mut number = 0u64;
        let mut next_tick = start + interval;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            let now = Instant::now();
            if now >= next_tick {
                let tick = Tick {
                    number,
                    elapsed: now - start,
                };

                // Non-blocking: a full buffer means the loop is behind, so
                // this tick is dropped instead of queued.
                let _ = tick_tx.try_send(tick);

                number += 1;
                next_tick += interval;

                // Catch up without bursting if we fell behind.
                if next_tick < now {
                    next_tick = now + interval;
                }
            } else {
                let sleep_duration = next_tick - now;
                thread::sleep(sleep_duration.min(Duration::from_millis(1)));
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
