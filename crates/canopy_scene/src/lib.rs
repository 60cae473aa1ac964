//! # CANOPY Scene-Graph Lifecycle Engine
//!
//! Tree-structured nodes, attached to containers, loaded off the frame
//! thread, promoted into an alive working set, updated once per frame,
//! and torn down through an asynchronous disposal queue.
//!
//! ## Lifecycle
//!
//! ```text
//! insert (detached, id 0, NotLoaded)
//!   -> attach (fresh id; load dispatched if the parent is loading/loaded)
//!   -> Loading -> Ready            (load context, any thread)
//!   -> Loaded, possibly Alive      (update thread, next traversal)
//!   -> updated every frame while its lifetime window holds
//!   -> demoted, evicted, disposed  (update thread; teardown off-thread)
//! ```
//!
//! ## Contracts
//!
//! 1. **Ids are forever** - attach ids are graph-scoped, monotonic, and
//!    never reused, even for the same physical node
//! 2. **Alive is a subsequence** - the alive set is the child set
//!    filtered, never reordered
//! 3. **The frame never waits** - children that are not `Ready` are
//!    skipped and retried next frame
//! 4. **Mutation is gated by load state** - see [`lifecycle`] for the
//!    thread-affinity table
//!
//! ## Example
//!
//! ```rust,ignore
//! use canopy_core::{FrameClock, Services, SharedClock};
//! use canopy_scene::{NodeBehavior, SceneGraph};
//! use std::sync::Arc;
//!
//! struct Sprite;
//! impl NodeBehavior for Sprite {}
//!
//! let graph = SceneGraph::with_defaults();
//! let root = graph.insert(Sprite);
//! let clock: SharedClock = Arc::new(FrameClock::new(FrameClock::STEP_60HZ_MS));
//!
//! graph.load(root, clock, &Services::new(), None);
//! graph.update_subtree(root)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod children;
pub mod config;
pub mod error;
pub mod graph;
pub mod handle;
pub mod lifecycle;
pub mod node;

pub use children::{ChildEntry, ChildId, ChildSet};
pub use config::SceneConfig;
pub use error::{LoadOutcome, SceneError, SceneResult};
pub use graph::{SceneGraph, SceneStats};
pub use handle::NodeHandle;
pub use lifecycle::LoadState;
pub use node::{
    EvictionPolicy, FrameInfo, LifetimeWindow, LoadEnv, NodeBehavior, SceneEvent,
};
