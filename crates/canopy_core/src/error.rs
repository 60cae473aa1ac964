//! # Core Runtime Error Types
//!
//! All errors that can occur in the runtime-service layer.

use thiserror::Error;

/// Errors that can occur in the runtime-service layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A cooperative cancellation signal was observed.
    ///
    /// This is not a failure: callers translate it into "the work did not
    /// run this round" and move on.
    #[error("operation cancelled")]
    Cancelled,

    /// A bindable member refused to release its subscriptions.
    #[error("unbind failed for '{name}': {reason}")]
    UnbindFailed {
        /// Diagnostic name of the bindable member.
        name: &'static str,
        /// Why the unbind did not complete.
        reason: String,
    },

    /// A scheduler drain was attempted from a thread its gate rejects.
    #[error("scheduler drained from a thread its gate rejects")]
    WrongDrainThread,

    /// The disposal queue has been shut down and accepts no more work.
    #[error("disposal queue is closed")]
    QueueClosed,
}

/// Result type for runtime-service operations.
pub type CoreResult<T> = Result<T, CoreError>;
