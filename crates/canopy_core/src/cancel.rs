//! # Cooperative Cancellation
//!
//! Load work observes cancellation at explicit checkpoints instead of being
//! unwound from the outside. A cancelled load is an outcome, not an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// A cheaply cloneable cancellation flag shared between the requester and
/// the worker performing a load.
///
/// # Example
///
/// ```rust,ignore
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // Worker checks between units of work:
/// worker_token.checkpoint()?;
///
/// // Requester gives up:
/// token.cancel();
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once `cancel` has been called.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Observation point for cooperative workers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] once cancellation was requested.
    #[inline]
    pub fn checkpoint(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_cancel_is_shared_and_sticky() {
        let token = CancellationToken::new();
        let clone = token.clone();

        token.cancel();
        token.cancel();

        assert!(clone.is_cancelled());
        assert_eq!(clone.checkpoint(), Err(CoreError::Cancelled));
    }
}
