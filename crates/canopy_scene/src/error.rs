//! # Scene-Graph Error Types
//!
//! All errors that can occur in the lifecycle engine, and the load-outcome
//! type that keeps cancellation out of the error path.

use thiserror::Error;

use canopy_core::CoreError;

use crate::lifecycle::LoadState;

/// Errors that can occur in the scene graph.
///
/// The caller-input class (`InvalidState`, `AlreadyParented`, `NotFound`)
/// is returned synchronously and is recoverable by the caller. The
/// contract class (`WrongThreadForMutation`, `ConsistencyViolation`)
/// indicates the surrounding application broke the threading or ownership
/// contract; it is logged loudly and should not be caught and retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Operation attempted on a disposed node or container.
    #[error("operation '{op}' on a disposed node")]
    InvalidState {
        /// The operation that was attempted.
        op: &'static str,
    },

    /// Attach attempted on a node already owned elsewhere.
    #[error("node already has a parent (child id {id})")]
    AlreadyParented {
        /// The child id the node currently holds.
        id: u64,
    },

    /// Detach or lookup on a node absent from the child set.
    #[error("node not found")]
    NotFound,

    /// Structural mutation attempted outside the permitted execution
    /// context for the node's load state.
    #[error("wrong thread for '{op}' while {state:?}")]
    WrongThreadForMutation {
        /// The node's load state at the time of the attempt.
        state: LoadState,
        /// The operation that was attempted.
        op: &'static str,
    },

    /// Internal invariant broken. Always unexpected in correct usage.
    #[error("scene consistency violation: {detail}")]
    ConsistencyViolation {
        /// What was found to be inconsistent.
        detail: String,
    },

    /// A node hook reported a failure during load.
    #[error("node hook failed: {0}")]
    Hook(String),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A runtime-service error surfaced through the scene layer.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for scene-graph operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// How a load attempt ended.
///
/// Cancellation is an outcome, not an error: the node simply did not load
/// this round and is neither disposed nor alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The load routine ran to completion (or had already completed).
    Completed,
    /// A cooperative cancellation signal was observed, or the node is
    /// parked from an earlier unfinished attempt.
    Cancelled,
    /// The load routine failed; the node stays parked in `Loading`.
    Failed(SceneError),
}

impl LoadOutcome {
    /// True for [`LoadOutcome::Completed`].
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// True for [`LoadOutcome::Cancelled`].
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_operation() {
        let error = SceneError::WrongThreadForMutation {
            state: LoadState::Loaded,
            op: "attach",
        };
        let rendered = error.to_string();
        assert!(rendered.contains("attach"));
        assert!(rendered.contains("Loaded"));
    }

    #[test]
    fn test_core_errors_convert() {
        let error: SceneError = CoreError::Cancelled.into();
        assert_eq!(error, SceneError::Core(CoreError::Cancelled));
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(LoadOutcome::Completed.is_completed());
        assert!(LoadOutcome::Cancelled.is_cancelled());
        assert!(!LoadOutcome::Failed(SceneError::NotFound).is_completed());
    }
}
