//! # Load-State Machine
//!
//! Every node climbs the same ladder exactly once:
//!
//! ```text
//! NotLoaded -> Loading -> Ready -> Loaded
//! ```
//!
//! The ladder never goes backwards. `Loading -> Ready` happens on whatever
//! thread ran the load routine; `Ready -> Loaded` happens only on the
//! update thread, during traversal. Which threads may mutate a node's
//! structure depends on where it stands:
//!
//! | state     | permitted mutator context                  |
//! |-----------|--------------------------------------------|
//! | NotLoaded | any thread                                 |
//! | Loading   | the thread that initiated the load         |
//! | Ready     | the load thread OR the update thread       |
//! | Loaded    | only the update thread                     |

use std::thread::ThreadId;

/// Position of a node on the load ladder.
///
/// Ordered: a comparison like `state >= LoadState::Ready` asks "has the
/// load routine finished".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LoadState {
    /// Constructed, no load requested yet.
    NotLoaded = 0,
    /// A load routine has started (or failed; states never regress).
    Loading = 1,
    /// Load work finished, not yet joined to the frame timeline.
    Ready = 2,
    /// Joined to the frame timeline by the update thread.
    Loaded = 3,
}

impl LoadState {
    /// Reconstructs a state from its atomic storage byte.
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Loaded,
            _ => Self::NotLoaded,
        }
    }

    /// The state's atomic storage byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Applies the thread-affinity table for structural mutation.
    ///
    /// `load_thread` is the thread that initiated this node's load, if any;
    /// `update_thread` is the designated frame thread, if one has been
    /// established. An unestablished update thread rejects nothing: the
    /// first traversal is what establishes it.
    #[must_use]
    pub fn permits_mutation(
        self,
        load_thread: Option<ThreadId>,
        update_thread: Option<ThreadId>,
        current: ThreadId,
    ) -> bool {
        let is_load_thread = load_thread == Some(current);
        let is_update_thread = match update_thread {
            Some(designated) => designated == current,
            None => true,
        };
        match self {
            Self::NotLoaded => true,
            Self::Loading => is_load_thread,
            Self::Ready => is_load_thread || is_update_thread,
            Self::Loaded => is_update_thread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ladder_is_ordered() {
        assert!(LoadState::NotLoaded < LoadState::Loading);
        assert!(LoadState::Loading < LoadState::Ready);
        assert!(LoadState::Ready < LoadState::Loaded);
    }

    #[test]
    fn test_storage_roundtrip() {
        for state in [
            LoadState::NotLoaded,
            LoadState::Loading,
            LoadState::Ready,
            LoadState::Loaded,
        ] {
            assert_eq!(LoadState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_affinity_table() {
        let here = thread::current().id();
        let elsewhere = thread::spawn(thread::current).join().unwrap().id();

        // NotLoaded: anyone.
        assert!(LoadState::NotLoaded.permits_mutation(None, Some(elsewhere), here));

        // Loading: only the loader.
        assert!(LoadState::Loading.permits_mutation(Some(here), Some(elsewhere), here));
        assert!(!LoadState::Loading.permits_mutation(Some(elsewhere), Some(here), here));
        assert!(!LoadState::Loading.permits_mutation(None, None, here));

        // Ready: loader or update thread.
        assert!(LoadState::Ready.permits_mutation(Some(here), Some(elsewhere), here));
        assert!(LoadState::Ready.permits_mutation(Some(elsewhere), Some(here), here));
        assert!(!LoadState::Ready.permits_mutation(Some(elsewhere), Some(elsewhere), here));

        // Loaded: update thread only.
        assert!(LoadState::Loaded.permits_mutation(Some(here), Some(here), here));
        assert!(!LoadState::Loaded.permits_mutation(Some(here), Some(elsewhere), here));
    }

    #[test]
    fn test_unestablished_update_thread_rejects_nothing() {
        let here = thread::current().id();
        assert!(LoadState::Loaded.permits_mutation(None, None, here));
        assert!(LoadState::Ready.permits_mutation(None, None, here));
    }
}
