//! # Deferred-Action Scheduler
//!
//! Each node carries a queue of zero-argument actions that any thread may
//! enqueue but only the frame thread drains. This is how load-context code
//! hands work back to the single-threaded update phase.
//!
//! ```text
//!   Loader A ──┐
//!   Loader B ──┼──> [channel] ──> drain() on the update thread, once per frame
//!   Any code ──┘
//! ```
//!
//! The drain gate is a caller-supplied predicate so the owner of the queue
//! decides what "the right thread" means. Actions enqueued while a drain is
//! running are deferred to the next drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{CoreError, CoreResult};

/// A deferred, single-shot action.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Predicate deciding whether the current thread may drain a scheduler.
pub type DrainGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Cross-thread enqueue, single-thread drain action queue.
pub struct Scheduler {
    tx: Sender<Action>,
    rx: Receiver<Action>,
    gate: DrainGate,
    executed_total: AtomicU64,
}

impl Scheduler {
    /// Creates a scheduler with the given drain gate.
    #[must_use]
    pub fn new(gate: DrainGate) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            gate,
            executed_total: AtomicU64::new(0),
        }
    }

    /// Creates a scheduler whose gate accepts every thread.
    ///
    /// Used by tests and by detached nodes before a frame thread exists.
    #[must_use]
    pub fn ungated() -> Self {
        Self::new(Arc::new(|| true))
    }

    /// Queues an action for the next drain. Callable from any thread.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        // The receiver lives as long as `self`, so the send cannot fail.
        let _ = self.tx.send(Box::new(action));
    }

    /// Number of actions currently waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Total actions executed over this scheduler's lifetime.
    #[must_use]
    pub fn executed_total(&self) -> u64 {
        self.executed_total.load(Ordering::Relaxed)
    }

    /// Runs every action queued before this call, in enqueue order.
    ///
    /// Actions enqueued by the drained actions themselves run on the next
    /// drain, so one frame's drain always terminates.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WrongDrainThread`] if the gate rejects the
    /// calling thread. Nothing is executed in that case.
    pub fn drain(&self) -> CoreResult<usize> {
        if !(self.gate)() {
            return Err(CoreError::WrongDrainThread);
        }

        let batch = self.rx.len();
        let mut executed = 0;
        for _ in 0..batch {
            match self.rx.try_recv() {
                Ok(action) => {
                    action();
                    executed += 1;
                }
                Err(_) => break,
            }
        }

        self.executed_total
            .fetch_add(executed as u64, Ordering::Relaxed);
        Ok(executed as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_drain_runs_in_enqueue_order() {
        let scheduler = Scheduler::ungated();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = Arc::clone(&log);
            scheduler.enqueue(move || log.lock().push(i));
        }

        assert_eq!(scheduler.drain().unwrap(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_actions_enqueued_during_drain_wait_for_next_drain() {
        let scheduler = Arc::new(Scheduler::ungated());
        let ran = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::clone(&scheduler);
        let inner_ran = Arc::clone(&ran);
        scheduler.enqueue(move || {
            let ran = Arc::clone(&inner_ran);
            inner_scheduler.enqueue(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(scheduler.drain().unwrap(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.drain().unwrap(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gate_rejects_foreign_thread() {
        let home = thread::current().id();
        let scheduler = Arc::new(Scheduler::new(Arc::new(move || {
            thread::current().id() == home
        })));
        scheduler.enqueue(|| {});

        let remote = Arc::clone(&scheduler);
        thread::spawn(move || {
            assert_eq!(remote.drain(), Err(CoreError::WrongDrainThread));
        })
        .join()
        .unwrap();

        // The rejected drain executed nothing.
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.drain().unwrap(), 1);
    }

    #[test]
    fn test_cross_thread_enqueue() {
        let scheduler = Arc::new(Scheduler::ungated());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let counter = Arc::clone(&counter);
                        scheduler.enqueue(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(scheduler.drain().unwrap(), 100);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(scheduler.executed_total(), 100);
    }
}
