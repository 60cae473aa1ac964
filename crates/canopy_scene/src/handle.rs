//! # Node Handles
//!
//! Nodes live in the scene arena and are addressed by handle:
//! - An index into the arena's slot array
//! - A generation counter so a recycled slot invalidates old handles
//!
//! Handles are the only way to reach a node. Ownership stays with the
//! arena, so a detached or disposed node can never leave a dangling
//! back-reference behind.

/// Unique identifier for a node slot in the scene arena.
///
/// The handle is split into two parts:
/// - Lower 32 bits: index into the slot array
/// - Upper 32 bits: generation counter for detecting stale handles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the slot index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid handle.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this handle is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for NodeHandle {
    fn default() -> Self {
        Self::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        let handle = NodeHandle::new(12345, 67890);
        assert_eq!(handle.index(), 12345);
        assert_eq!(handle.generation(), 67890);
    }

    #[test]
    fn test_null_handle() {
        let handle = NodeHandle::NULL;
        assert!(handle.is_null());
        assert!(!NodeHandle::new(0, 0).is_null());
        assert_eq!(NodeHandle::default(), NodeHandle::NULL);
    }

    #[test]
    fn test_generation_distinguishes_recycled_slots() {
        let first = NodeHandle::new(7, 0);
        let recycled = NodeHandle::new(7, 1);
        assert_ne!(first, recycled);
        assert_eq!(first.index(), recycled.index());
    }
}
