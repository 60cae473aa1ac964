//! # Asynchronous Disposal Queue
//!
//! Teardown happens off the critical path. The frame thread unbinds a node
//! and hands the remains over; a dedicated worker thread performs the
//! actual teardown.
//!
//! ```text
//!   Frame thread ──> [bounded channel] ──> [Disposal Worker] ──> drop
//! ```
//!
//! The hand-off is fire and forget. If the queue is full the item is torn
//! down inline on the calling thread instead of blocking the frame; the
//! event is logged and counted so an undersized queue is visible in stats.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// Something the disposal worker can tear down.
///
/// The default implementation just drops the value on the worker thread,
/// which is all most nodes need; types holding OS resources can override
/// [`Disposable::dispose`] for explicit teardown.
pub trait Disposable: Send {
    /// Diagnostic label for logs and stats.
    fn label(&self) -> &'static str {
        "node"
    }

    /// Performs the teardown. Consumes the value.
    fn dispose(self: Box<Self>) {}
}

/// Tunables for the disposal queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisposalConfig {
    /// Maximum items waiting for the worker before enqueues fall back to
    /// inline teardown.
    pub queue_capacity: usize,
}

impl Default for DisposalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl DisposalConfig {
    /// Production config: headroom for teardown bursts during scene swaps.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            queue_capacity: 8192,
        }
    }
}

/// Counters exposed by [`DisposalQueue::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisposalStats {
    /// Items accepted onto the queue.
    pub enqueued: u64,
    /// Items the worker finished tearing down.
    pub completed: u64,
    /// Items torn down inline because the queue was full.
    pub inline_disposals: u64,
}

#[derive(Default)]
struct StatsInner {
    enqueued: AtomicU64,
    completed: AtomicU64,
    inline_disposals: AtomicU64,
}

type Feed = Sender<Box<dyn Disposable>>;

/// Background disposal worker with a bounded feed.
pub struct DisposalQueue {
    tx: Mutex<Option<Feed>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatsInner>,
}

impl DisposalQueue {
    /// Spawns the worker thread and returns the queue handle.
    #[must_use]
    pub fn new(config: &DisposalConfig) -> Self {
        let (tx, rx) = bounded::<Box<dyn Disposable>>(config.queue_capacity.max(1));
        let stats = Arc::new(StatsInner::default());

        let worker_stats = Arc::clone(&stats);
        let worker = thread::Builder::new()
            .name("canopy-disposal".to_string())
            .spawn(move || {
                while let Ok(item) = rx.recv() {
                    item.dispose();
                    worker_stats.completed.fetch_add(1, Ordering::Release);
                }
            })
            .expect("failed to spawn disposal worker");

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Hands an item to the worker.
    ///
    /// A full queue never blocks the caller: the item is torn down inline
    /// and the fallback is counted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueueClosed`] after `shutdown`.
    pub fn enqueue(&self, item: Box<dyn Disposable>) -> CoreResult<()> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(CoreError::QueueClosed);
        };

        match tx.try_send(item) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                tracing::warn!(
                    "disposal queue full, tearing down '{}' inline",
                    item.label()
                );
                item.dispose();
                self.stats.inline_disposals.fetch_add(1, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CoreError::QueueClosed),
        }
    }

    /// Snapshot of the queue counters.
    #[must_use]
    pub fn stats(&self) -> DisposalStats {
        DisposalStats {
            enqueued: self.stats.enqueued.load(Ordering::Acquire),
            completed: self.stats.completed.load(Ordering::Acquire),
            inline_disposals: self.stats.inline_disposals.load(Ordering::Acquire),
        }
    }

    /// Items accepted but not yet torn down by the worker.
    #[must_use]
    pub fn backlog(&self) -> u64 {
        let stats = self.stats();
        stats.enqueued.saturating_sub(stats.completed)
    }

    /// Waits until the worker has caught up, or the timeout expires.
    ///
    /// Returns true if the backlog reached zero. Intended for tests and
    /// orderly shutdown paths, never for the frame loop.
    #[must_use]
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.backlog() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(200));
        }
        true
    }

    /// Stops accepting work, drains the backlog, and joins the worker.
    ///
    /// Idempotent; also invoked on drop.
    pub fn shutdown(&self) {
        // Dropping the sender ends the worker's recv loop after it drains
        // everything already queued.
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DisposalQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tracked(Arc<AtomicU64>);

    impl Disposable for Tracked {
        fn label(&self) -> &'static str {
            "tracked"
        }

        fn dispose(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_worker_disposes_off_thread() {
        let queue = DisposalQueue::new(&DisposalConfig::default());
        let disposed = Arc::new(AtomicU64::new(0));

        for _ in 0..10 {
            queue
                .enqueue(Box::new(Tracked(Arc::clone(&disposed))))
                .unwrap();
        }

        assert!(queue.flush(Duration::from_secs(2)));
        assert_eq!(disposed.load(Ordering::SeqCst), 10);
        assert_eq!(queue.stats().completed, 10);
    }

    #[test]
    fn test_full_queue_falls_back_inline() {
        // Capacity 1 and no worker progress guarantee: we can at least
        // force the fallback by racing more items than capacity.
        let queue = DisposalQueue::new(&DisposalConfig { queue_capacity: 1 });
        let disposed = Arc::new(AtomicU64::new(0));

        for _ in 0..64 {
            queue
                .enqueue(Box::new(Tracked(Arc::clone(&disposed))))
                .unwrap();
        }

        assert!(queue.flush(Duration::from_secs(2)));
        let stats = queue.stats();
        assert_eq!(stats.enqueued + stats.inline_disposals, 64);
        assert_eq!(disposed.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let queue = DisposalQueue::new(&DisposalConfig::default());
        queue.shutdown();

        let disposed = Arc::new(AtomicU64::new(0));
        let result = queue.enqueue(Box::new(Tracked(disposed)));
        assert_eq!(result, Err(CoreError::QueueClosed));
    }
}
