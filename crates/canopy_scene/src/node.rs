//! # Nodes
//!
//! A node is identity plus lifecycle: an arena slot, a load state, a
//! lifetime window, and a behavior. Behaviors supply the per-variant hooks
//! (load, per-frame work, child notifications) through an explicit
//! capability trait; the engine owns everything else.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use canopy_core::{AnyBindable, CancellationToken, Scheduler, Services, SharedClock};

use crate::children::{ChildId, ChildSet};
use crate::error::SceneResult;
use crate::handle::NodeHandle;
use crate::lifecycle::LoadState;

/// Half-open `[start, end)` interval, in the owning clock's milliseconds,
/// during which a node is eligible to be alive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LifetimeWindow {
    /// First instant at which the node may be alive.
    pub start_ms: f64,
    /// First instant at which the node is no longer alive.
    pub end_ms: f64,
}

impl LifetimeWindow {
    /// The default window: alive from attach until removal.
    pub const ALWAYS: Self = Self {
        start_ms: f64::NEG_INFINITY,
        end_ms: f64::INFINITY,
    };

    /// A bounded window.
    #[must_use]
    pub const fn new(start_ms: f64, end_ms: f64) -> Self {
        Self { start_ms, end_ms }
    }

    /// A window open from `start_ms` onwards.
    #[must_use]
    pub const fn from_start(start_ms: f64) -> Self {
        Self {
            start_ms,
            end_ms: f64::INFINITY,
        }
    }

    /// A window open until `end_ms`.
    #[must_use]
    pub const fn until(end_ms: f64) -> Self {
        Self {
            start_ms: f64::NEG_INFINITY,
            end_ms,
        }
    }

    /// Whether `now_ms` falls inside the window.
    #[inline]
    #[must_use]
    pub fn contains(&self, now_ms: f64) -> bool {
        now_ms >= self.start_ms && now_ms < self.end_ms
    }

    /// Whether time has reached the start of the window.
    ///
    /// Lifetimes are one-shot forward-only windows: a started window that
    /// no longer contains the current time is exhausted.
    #[inline]
    #[must_use]
    pub fn has_started(&self, now_ms: f64) -> bool {
        now_ms >= self.start_ms
    }

    /// Whether both bounds are unset.
    #[inline]
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.start_ms == f64::NEG_INFINITY && self.end_ms == f64::INFINITY
    }
}

impl Default for LifetimeWindow {
    fn default() -> Self {
        Self::ALWAYS
    }
}

/// What the liveness pass does with a child that should not be alive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Remove once the lifetime window has been exhausted (time has
    /// advanced past `start_ms` and the window no longer applies). The
    /// default: windows are one-shot, so an expired child has no future.
    #[default]
    WindowExhausted,
    /// Never remove; the child stays attached, merely not alive.
    Retain,
    /// Remove on the first pass that finds the child not alive.
    Immediate,
}

/// Per-frame context handed to update hooks.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    /// Handle of the node being updated.
    pub handle: NodeHandle,
    /// Current time on the node's clock, in milliseconds.
    pub now_ms: f64,
}

/// Load-time context handed to [`NodeBehavior::post_load`].
pub struct LoadEnv<'a> {
    /// Handle of the node being loaded.
    pub handle: NodeHandle,
    /// The services resolved for this node's subtree.
    pub services: &'a Services,
    /// The clock the node was just bound to, if any.
    pub clock: Option<&'a SharedClock>,
    /// Cancellation signal for this load attempt, if any.
    pub cancel: Option<&'a CancellationToken>,
}

/// Lifecycle notifications observable per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneEvent {
    /// The node entered its parent's alive set.
    BecameAlive,
    /// The node left its parent's alive set.
    Died,
    /// The node's one-shot load-complete hook fired.
    LoadComplete,
    /// The node's per-frame update ran.
    Updated,
}

/// The capability set a node variant implements.
///
/// Every hook has a default so simple nodes implement nothing. All hooks
/// run with the engine's locks released; a hook may call back into the
/// graph (attach a child, enqueue an action) for its own node.
#[allow(unused_variables)]
pub trait NodeBehavior: Send + 'static {
    /// Resolves the service scope for this node's subtree.
    ///
    /// Runs once, during load, on the load thread. The returned set is
    /// what this node's children will see; returning `parent` unchanged
    /// (the default) inherits the ancestors' scope.
    ///
    /// # Errors
    ///
    /// A failure aborts the load attempt.
    fn inject_services(&mut self, parent: &Services) -> SceneResult<Services> {
        Ok(parent.clone())
    }

    /// Extension hook run at the end of the load routine, still on the
    /// load thread, immediately before the node becomes `Ready`.
    ///
    /// # Errors
    ///
    /// A failure aborts the load attempt and propagates to the load
    /// caller; the node stays parked in `Loading`.
    fn post_load(&mut self, env: &LoadEnv<'_>) -> SceneResult<()> {
        Ok(())
    }

    /// One-shot hook fired by the update thread when the node joins the
    /// frame timeline (`Ready -> Loaded`). Fires exactly once, ever.
    fn load_complete(&mut self) {}

    /// Per-frame work hook.
    fn update(&mut self, frame: &FrameInfo) {}

    /// Runs after this node's alive children were updated.
    fn after_children(&mut self, frame: &FrameInfo) {}

    /// A child of this node entered the alive set.
    fn child_became_alive(&mut self, child: NodeHandle) {}

    /// A child of this node left the alive set.
    fn child_died(&mut self, child: NodeHandle) {}

    /// Presence gate: a non-present container skips child updates.
    fn is_present(&self) -> bool {
        true
    }

    /// Whether this node wants its alive children traversed each frame.
    fn requires_child_updates(&self) -> bool {
        true
    }

    /// Enumerates this node's reactive members for teardown.
    ///
    /// Include every bindable field, inherited ones too; members not
    /// listed here keep their subscriptions when the node is disposed.
    fn bindables(&mut self) -> Vec<&mut dyn AnyBindable> {
        Vec::new()
    }
}

/// Event listener attached to a node.
pub(crate) type Listener = Box<dyn FnMut(&SceneEvent) + Send>;

/// Mutable node state guarded by one short-lived lock.
pub(crate) struct NodeState {
    pub parent: Option<NodeHandle>,
    pub lifetime: LifetimeWindow,
    pub eviction: EvictionPolicy,
    pub dispose_on_removal: bool,
    pub order_key: i64,
    pub clock: Option<SharedClock>,
    pub services: Services,
    pub load_thread: Option<ThreadId>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            parent: None,
            lifetime: LifetimeWindow::ALWAYS,
            eviction: EvictionPolicy::default(),
            dispose_on_removal: true,
            order_key: 0,
            clock: None,
            services: Services::new(),
            load_thread: None,
        }
    }
}

/// One node in the arena. Hot flags are atomics so any thread can read
/// them without a lock; everything else sits behind short-lived mutexes.
pub(crate) struct NodeCell {
    pub handle: NodeHandle,
    child_id: AtomicU64,
    load_state: AtomicU8,
    pub alive: AtomicBool,
    pub disposed: AtomicBool,
    pub load_complete_pending: AtomicBool,
    pub owns_clock: AtomicBool,
    pub state: Mutex<NodeState>,
    pub children: Mutex<ChildSet>,
    pub load_lock: Mutex<()>,
    pub behavior: Mutex<Box<dyn NodeBehavior>>,
    pub scheduler: Scheduler,
    pub after_children_scheduler: Scheduler,
    pub listeners: Mutex<Vec<Listener>>,
}

impl NodeCell {
    pub fn new(
        handle: NodeHandle,
        behavior: Box<dyn NodeBehavior>,
        scheduler: Scheduler,
        after_children_scheduler: Scheduler,
    ) -> Self {
        Self {
            handle,
            child_id: AtomicU64::new(ChildId::DETACHED.raw()),
            load_state: AtomicU8::new(LoadState::NotLoaded.as_u8()),
            alive: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            load_complete_pending: AtomicBool::new(false),
            owns_clock: AtomicBool::new(false),
            state: Mutex::new(NodeState::default()),
            children: Mutex::new(ChildSet::new()),
            load_lock: Mutex::new(()),
            behavior: Mutex::new(behavior),
            scheduler,
            after_children_scheduler,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn load_state(&self) -> LoadState {
        LoadState::from_u8(self.load_state.load(Ordering::Acquire))
    }

    /// Advances the ladder. States never regress; a stale store is a bug,
    /// so this asserts forward motion in debug builds.
    pub fn set_load_state(&self, next: LoadState) {
        debug_assert!(
            next >= self.load_state(),
            "load state must not regress: {:?} -> {next:?}",
            self.load_state()
        );
        self.load_state.store(next.as_u8(), Ordering::Release);
    }

    pub fn child_id(&self) -> ChildId {
        ChildId::from_raw(self.child_id.load(Ordering::Acquire))
    }

    pub fn set_child_id(&self, id: ChildId) {
        self.child_id.store(id.raw(), Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Notifies this node's listeners.
    pub fn emit(&self, event: &SceneEvent) {
        let mut listeners = self.listeners.lock();
        for listener in listeners.iter_mut() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_contains_is_half_open() {
        let window = LifetimeWindow::new(100.0, 200.0);
        assert!(!window.contains(99.9));
        assert!(window.contains(100.0));
        assert!(window.contains(199.9));
        assert!(!window.contains(200.0));
    }

    #[test]
    fn test_default_window_is_always() {
        let window = LifetimeWindow::default();
        assert!(window.is_unbounded());
        assert!(window.contains(f64::MIN));
        assert!(window.contains(1e300));
    }

    #[test]
    fn test_window_start_tracking() {
        let window = LifetimeWindow::from_start(50.0);
        assert!(!window.has_started(49.0));
        assert!(window.has_started(50.0));
        assert!(window.contains(1e12));
    }

    struct Inert;
    impl NodeBehavior for Inert {}

    #[test]
    fn test_cell_defaults() {
        let cell = NodeCell::new(
            NodeHandle::new(0, 0),
            Box::new(Inert),
            Scheduler::ungated(),
            Scheduler::ungated(),
        );

        assert_eq!(cell.load_state(), LoadState::NotLoaded);
        assert_eq!(cell.child_id(), ChildId::DETACHED);
        assert!(!cell.is_alive());
        assert!(!cell.is_disposed());
    }

    #[test]
    fn test_cell_state_ladder() {
        let cell = NodeCell::new(
            NodeHandle::new(0, 0),
            Box::new(Inert),
            Scheduler::ungated(),
            Scheduler::ungated(),
        );

        cell.set_load_state(LoadState::Loading);
        cell.set_load_state(LoadState::Ready);
        cell.set_load_state(LoadState::Loaded);
        assert_eq!(cell.load_state(), LoadState::Loaded);
    }
}
