//! # Frame Clocks
//!
//! Time sources handed top-down from container to child at load time.
//! The update traversal advances a node's clock once per frame unless the
//! node opted into an externally-driven clock.
//!
//! Time is a millisecond count in the owning clock's domain. It is stored
//! as raw `f64` bits in an atomic so reads never take a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonic time source in milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in this clock's domain, in milliseconds.
    fn now_ms(&self) -> f64;

    /// Advances the clock by one frame.
    ///
    /// Clocks that are driven externally (wall time, a recorded timeline)
    /// implement this as a no-op.
    fn advance_frame(&self);
}

/// Shared handle to a clock, cloned from container to child at load time.
pub type SharedClock = Arc<dyn Clock>;

/// A fixed-step clock advanced once per update traversal.
///
/// This is the default clock for a scene root: every frame moves time
/// forward by the configured step, so a tree updated at 60 Hz with the
/// default step tracks real time without ever consulting the OS.
pub struct FrameClock {
    /// Current time, stored as `f64` bits.
    now_bits: AtomicU64,
    /// Milliseconds added per frame.
    step_ms: f64,
}

impl FrameClock {
    /// Step matching a 60 Hz frame cadence.
    pub const STEP_60HZ_MS: f64 = 1000.0 / 60.0;

    /// Creates a clock at time zero with the given per-frame step.
    #[must_use]
    pub fn new(step_ms: f64) -> Self {
        Self::with_start(0.0, step_ms)
    }

    /// Creates a clock at an arbitrary start time.
    #[must_use]
    pub fn with_start(start_ms: f64, step_ms: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(start_ms.to_bits()),
            step_ms,
        }
    }

    /// The per-frame step in milliseconds.
    #[inline]
    #[must_use]
    pub const fn step_ms(&self) -> f64 {
        self.step_ms
    }
}

impl Clock for FrameClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }

    fn advance_frame(&self) {
        // Single-writer in practice (the update thread), but a CAS loop
        // keeps the type safe to share regardless.
        let mut current = self.now_bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + self.step_ms).to_bits();
            match self.now_bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// A clock set explicitly by the caller. Never advances on its own.
///
/// Used by tests and by hosts that drive scene time from an external
/// timeline (audio position, replay cursor).
#[derive(Default)]
pub struct ManualClock {
    now_bits: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manual clock at the given time.
    #[must_use]
    pub fn at(now_ms: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(now_ms.to_bits()),
        }
    }

    /// Moves the clock to an absolute time.
    pub fn set_ms(&self, now_ms: f64) {
        self.now_bits.store(now_ms.to_bits(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }

    fn advance_frame(&self) {
        // Externally driven.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_steps() {
        let clock = FrameClock::new(16.0);
        assert_eq!(clock.now_ms(), 0.0);

        clock.advance_frame();
        clock.advance_frame();
        assert_eq!(clock.now_ms(), 32.0);
    }

    #[test]
    fn test_frame_clock_start_offset() {
        let clock = FrameClock::with_start(100.0, 10.0);
        clock.advance_frame();
        assert_eq!(clock.now_ms(), 110.0);
    }

    #[test]
    fn test_manual_clock_ignores_frames() {
        let clock = ManualClock::at(50.0);
        clock.advance_frame();
        assert_eq!(clock.now_ms(), 50.0);

        clock.set_ms(150.0);
        assert_eq!(clock.now_ms(), 150.0);
    }

    #[test]
    fn test_shared_clock_is_one_timeline() {
        let clock: SharedClock = Arc::new(FrameClock::new(8.0));
        let child_view = Arc::clone(&clock);

        clock.advance_frame();
        assert_eq!(child_view.now_ms(), 8.0);
    }
}
