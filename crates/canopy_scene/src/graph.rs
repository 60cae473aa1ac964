//! # The Scene Graph
//!
//! An arena of nodes addressed by generation-checked handles. The arena
//! owns every node; containment is expressed through handles, so detach
//! and dispose can never leave a dangling back-reference.
//!
//! ## Frame Order
//!
//! ```text
//! update_subtree(root), once per frame, on the update thread:
//!   1. advance the node's own clock (unless externally driven)
//!   2. short-circuit below Ready; promote Ready -> Loaded (one-shot hook)
//!   3. liveness pass over the full child set, in order
//!   4. recurse over alive children, in order
//!   5. drain after-children actions, run the after-children hook
//!   6. drain own actions, run the per-frame hook, emit Updated
//! ```
//!
//! ## Threading Rules
//!
//! Loads may run on any thread; each node's load serializes behind a
//! per-node lock. Structural mutation is gated by the affinity table in
//! [`LoadState::permits_mutation`]. The frame loop never blocks on a
//! loader: a child that is not `Ready` yet is skipped and retried next
//! frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use canopy_core::{
    unbind_members, CancellationToken, CoreError, Disposable, DisposalQueue, DisposalStats,
    Scheduler, Services, SharedClock,
};

use crate::children::{ChildEntry, ChildId};
use crate::config::SceneConfig;
use crate::error::{LoadOutcome, SceneError, SceneResult};
use crate::handle::NodeHandle;
use crate::lifecycle::LoadState;
use crate::node::{
    EvictionPolicy, FrameInfo, LifetimeWindow, LoadEnv, NodeBehavior, NodeCell, SceneEvent,
};

/// Counters exposed by [`SceneGraph::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Nodes inserted into the arena.
    pub nodes_created: u64,
    /// Nodes disposed (and their slots recycled).
    pub nodes_disposed: u64,
    /// Successful attaches.
    pub attaches: u64,
    /// Detaches, including evictions and clears.
    pub detaches: u64,
    /// Load routines that ran to completion.
    pub loads_completed: u64,
    /// Load attempts that observed cancellation.
    pub loads_cancelled: u64,
    /// Load attempts that failed.
    pub loads_failed: u64,
    /// Frames driven through `update_subtree`.
    pub frames: u64,
    /// Liveness passes that changed at least one child's alive status.
    pub liveness_changes: u64,
    /// Deferred actions executed by node schedulers during traversal.
    pub actions_drained: u64,
}

#[derive(Default)]
struct StatsInner {
    nodes_created: AtomicU64,
    nodes_disposed: AtomicU64,
    attaches: AtomicU64,
    detaches: AtomicU64,
    loads_completed: AtomicU64,
    loads_cancelled: AtomicU64,
    loads_failed: AtomicU64,
    frames: AtomicU64,
    liveness_changes: AtomicU64,
    actions_drained: AtomicU64,
}

impl StatsInner {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Slot {
    generation: u32,
    cell: Option<Arc<NodeCell>>,
}

/// What is left of a node after unbinding: handed to the disposal worker
/// so the actual teardown (dropping behavior and state) happens off the
/// frame path.
struct NodeRemains {
    cell: Arc<NodeCell>,
}

impl Disposable for NodeRemains {
    fn label(&self) -> &'static str {
        "scene-node"
    }

    fn dispose(self: Box<Self>) {
        drop(self.cell);
    }
}

/// The arena-backed scene graph.
///
/// All structural operations go through this type; nodes are reached only
/// by [`NodeHandle`]. The graph is `Sync`: loads may run on worker
/// threads while the update thread drives frames, under the affinity
/// rules described in [`crate::lifecycle`].
///
/// # Example
///
/// ```rust,ignore
/// let graph = SceneGraph::with_defaults();
/// let root = graph.insert(WorldRoot::new());
/// let clock: SharedClock = Arc::new(FrameClock::new(FrameClock::STEP_60HZ_MS));
///
/// graph.load(root, clock, &Services::new(), None);
/// loop {
///     graph.update_subtree(root)?;
/// }
/// ```
pub struct SceneGraph {
    slots: RwLock<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
    /// Source of child ids. Graph-scoped, monotonic, never rewound.
    next_child_id: AtomicU64,
    update_thread: Arc<Mutex<Option<ThreadId>>>,
    disposal: DisposalQueue,
    config: SceneConfig,
    stats: StatsInner,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SceneGraph {
    /// Creates a graph with the given configuration.
    #[must_use]
    pub fn new(config: SceneConfig) -> Self {
        let disposal = DisposalQueue::new(&config.disposal);
        Self {
            slots: RwLock::new(Vec::with_capacity(config.initial_capacity)),
            free: Mutex::new(Vec::new()),
            next_child_id: AtomicU64::new(0),
            update_thread: Arc::new(Mutex::new(None)),
            disposal,
            config,
            stats: StatsInner::default(),
        }
    }

    /// Creates a graph with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SceneConfig::default())
    }

    /// The configuration this graph was built with.
    #[must_use]
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Snapshot of the graph counters.
    #[must_use]
    pub fn stats(&self) -> SceneStats {
        SceneStats {
            nodes_created: self.stats.nodes_created.load(Ordering::Relaxed),
            nodes_disposed: self.stats.nodes_disposed.load(Ordering::Relaxed),
            attaches: self.stats.attaches.load(Ordering::Relaxed),
            detaches: self.stats.detaches.load(Ordering::Relaxed),
            loads_completed: self.stats.loads_completed.load(Ordering::Relaxed),
            loads_cancelled: self.stats.loads_cancelled.load(Ordering::Relaxed),
            loads_failed: self.stats.loads_failed.load(Ordering::Relaxed),
            frames: self.stats.frames.load(Ordering::Relaxed),
            liveness_changes: self.stats.liveness_changes.load(Ordering::Relaxed),
            actions_drained: self.stats.actions_drained.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the disposal worker's counters.
    #[must_use]
    pub fn disposal_stats(&self) -> DisposalStats {
        self.disposal.stats()
    }

    /// Waits for the disposal worker to catch up. Test and shutdown aid.
    #[must_use]
    pub fn flush_disposals(&self, timeout: Duration) -> bool {
        self.disposal.flush(timeout)
    }

    // =========================================================================
    // Arena
    // =========================================================================

    /// Adds a detached node to the arena and returns its handle.
    ///
    /// The node starts `NotLoaded` with id 0 (no parent) and participates
    /// in nothing until attached or loaded.
    pub fn insert(&self, behavior: impl NodeBehavior) -> NodeHandle {
        let scheduler = Scheduler::new(self.update_gate());
        let after_children = Scheduler::new(self.update_gate());

        let mut slots = self.slots.write();
        let index = match self.free.lock().pop() {
            Some(index) => index,
            None => {
                slots.push(Slot {
                    generation: 0,
                    cell: None,
                });
                u32::try_from(slots.len() - 1).expect("scene arena exceeded u32 slots")
            }
        };
        let generation = slots[index as usize].generation;
        let handle = NodeHandle::new(index, generation);
        slots[index as usize].cell = Some(Arc::new(NodeCell::new(
            handle,
            Box::new(behavior),
            scheduler,
            after_children,
        )));
        drop(slots);

        StatsInner::bump(&self.stats.nodes_created);
        handle
    }

    /// Whether a handle still addresses a live slot.
    #[must_use]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Number of nodes currently in the arena.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|slot| slot.cell.is_some())
            .count()
    }

    fn resolve(&self, handle: NodeHandle) -> SceneResult<Arc<NodeCell>> {
        if handle.is_null() {
            return Err(SceneError::NotFound);
        }
        let slots = self.slots.read();
        let slot = slots
            .get(handle.index() as usize)
            .ok_or(SceneError::NotFound)?;
        if slot.generation != handle.generation() {
            return Err(SceneError::NotFound);
        }
        slot.cell.as_ref().map(Arc::clone).ok_or(SceneError::NotFound)
    }

    fn free_slot(&self, handle: NodeHandle) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(handle.index() as usize) {
            if slot.generation == handle.generation() && slot.cell.is_some() {
                slot.cell = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.lock().push(handle.index());
            }
        }
    }

    // =========================================================================
    // Threading
    // =========================================================================

    /// Declares the calling thread the update thread.
    ///
    /// Returns true if the calling thread is (now) the designated one.
    /// The first `update_subtree` call designates implicitly; this exists
    /// for hosts that want the gate armed before any frame runs.
    pub fn designate_update_thread(&self) -> bool {
        let mut guard = self.update_thread.lock();
        let current = thread::current().id();
        match *guard {
            None => {
                *guard = Some(current);
                true
            }
            Some(designated) => designated == current,
        }
    }

    fn update_gate(&self) -> canopy_core::DrainGate {
        let update_thread = Arc::clone(&self.update_thread);
        Arc::new(move || match *update_thread.lock() {
            Some(designated) => designated == thread::current().id(),
            None => true,
        })
    }

    fn check_mutation(&self, cell: &NodeCell, op: &'static str) -> SceneResult<()> {
        let state = cell.load_state();
        let load_thread = cell.state.lock().load_thread;
        let update_thread = *self.update_thread.lock();
        let current = thread::current().id();
        if state.permits_mutation(load_thread, update_thread, current) {
            Ok(())
        } else {
            tracing::error!(
                "threading contract violated: '{op}' while {state:?} from a non-permitted thread"
            );
            Err(SceneError::WrongThreadForMutation { state, op })
        }
    }

    // =========================================================================
    // Node accessors
    // =========================================================================

    /// The node's position on the load ladder.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn load_state(&self, node: NodeHandle) -> SceneResult<LoadState> {
        Ok(self.resolve(node)?.load_state())
    }

    /// Whether the node is in its parent's alive set.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn is_alive(&self, node: NodeHandle) -> SceneResult<bool> {
        Ok(self.resolve(node)?.is_alive())
    }

    /// The id issued at attach time; `ChildId::DETACHED` if unparented.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn child_id(&self, node: NodeHandle) -> SceneResult<ChildId> {
        Ok(self.resolve(node)?.child_id())
    }

    /// The node's parent, if attached.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn parent_of(&self, node: NodeHandle) -> SceneResult<Option<NodeHandle>> {
        Ok(self.resolve(node)?.state.lock().parent)
    }

    /// All children of a container, in sort order.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn children_of(&self, node: NodeHandle) -> SceneResult<Vec<NodeHandle>> {
        let cell = self.resolve(node)?;
        let children = cell.children.lock();
        Ok(children.entries().iter().map(|entry| entry.handle).collect())
    }

    /// The alive children of a container, in sort order.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn alive_children_of(&self, node: NodeHandle) -> SceneResult<Vec<NodeHandle>> {
        let cell = self.resolve(node)?;
        let children = cell.children.lock();
        Ok(children.alive().iter().map(|entry| entry.handle).collect())
    }

    // =========================================================================
    // Node mutators
    // =========================================================================

    /// Sets the node's lifetime window.
    ///
    /// # Errors
    ///
    /// Dead handle, disposed node, or a thread the affinity table rejects.
    pub fn set_lifetime(&self, node: NodeHandle, window: LifetimeWindow) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "set_lifetime" });
        }
        self.check_mutation(&cell, "set_lifetime")?;
        cell.state.lock().lifetime = window;
        Ok(())
    }

    /// Sets what the liveness pass does once the node should not be alive.
    ///
    /// # Errors
    ///
    /// Dead handle, disposed node, or a thread the affinity table rejects.
    pub fn set_eviction_policy(&self, node: NodeHandle, policy: EvictionPolicy) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "set_eviction_policy" });
        }
        self.check_mutation(&cell, "set_eviction_policy")?;
        cell.state.lock().eviction = policy;
        Ok(())
    }

    /// Whether eviction also queues the node for asynchronous disposal.
    ///
    /// # Errors
    ///
    /// Dead handle, disposed node, or a thread the affinity table rejects.
    pub fn set_dispose_on_removal(&self, node: NodeHandle, dispose: bool) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState {
                op: "set_dispose_on_removal",
            });
        }
        self.check_mutation(&cell, "set_dispose_on_removal")?;
        cell.state.lock().dispose_on_removal = dispose;
        Ok(())
    }

    /// Changes the node's ordering bias and stably resorts its parent's
    /// child sets. Ties still break on id, so equal keys keep attach order.
    ///
    /// # Errors
    ///
    /// Dead handle, disposed node, or a thread the affinity table rejects
    /// (the gate applies to the parent whose sets are resorted).
    pub fn set_order_key(&self, node: NodeHandle, order_key: i64) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "set_order_key" });
        }

        let parent = cell.state.lock().parent;
        if let Some(parent_handle) = parent {
            let parent_cell = self.resolve(parent_handle)?;
            self.check_mutation(&parent_cell, "set_order_key")?;
            cell.state.lock().order_key = order_key;
            let found = parent_cell
                .children
                .lock()
                .update_order_key(node, cell.child_id(), order_key);
            if !found {
                return Err(SceneError::ConsistencyViolation {
                    detail: format!(
                        "node {} records a parent that does not list it",
                        cell.child_id().raw()
                    ),
                });
            }
        } else {
            self.check_mutation(&cell, "set_order_key")?;
            cell.state.lock().order_key = order_key;
        }
        Ok(())
    }

    /// Gives the node an externally-driven clock.
    ///
    /// The update traversal will not advance this clock; the host owns
    /// its timeline. Must be called before the node loads; the load
    /// routine keeps a custom clock instead of binding the parent's.
    ///
    /// # Errors
    ///
    /// Dead handle or disposed node.
    pub fn set_external_clock(&self, node: NodeHandle, clock: SharedClock) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState {
                op: "set_external_clock",
            });
        }
        cell.owns_clock.store(false, Ordering::Release);
        cell.state.lock().clock = Some(clock);
        Ok(())
    }

    /// Subscribes to the node's lifecycle notifications.
    ///
    /// Listeners run on whichever thread produced the event and must not
    /// re-enter the graph for the same node.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn subscribe(
        &self,
        node: NodeHandle,
        listener: impl FnMut(&SceneEvent) + Send + 'static,
    ) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        cell.listeners.lock().push(Box::new(listener));
        Ok(())
    }

    /// Queues an action on the node's scheduler for the next frame.
    ///
    /// Callable from any thread; this is how load-context code hands work
    /// back to the update phase.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn enqueue_action(
        &self,
        node: NodeHandle,
        action: impl FnOnce() + Send + 'static,
    ) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        cell.scheduler.enqueue(action);
        Ok(())
    }

    /// Queues an action to run after the node's children update next frame.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] for dead handles.
    pub fn enqueue_after_children(
        &self,
        node: NodeHandle,
        action: impl FnOnce() + Send + 'static,
    ) -> SceneResult<()> {
        let cell = self.resolve(node)?;
        cell.after_children_scheduler.enqueue(action);
        Ok(())
    }

    // =========================================================================
    // Attach / detach / clear
    // =========================================================================

    /// Attaches `child` under `parent`, issuing a fresh child id.
    ///
    /// If the parent has begun loading, the child is loaded here too, on
    /// the calling thread, with the parent's clock and services; a child
    /// already `Ready` is adopted as-is. Cancellation during that load is
    /// swallowed (the child attaches, merely not loaded this round); any
    /// other load failure rolls the child back to detached and is
    /// re-raised.
    ///
    /// # Errors
    ///
    /// [`SceneError::InvalidState`] if either node is disposed,
    /// [`SceneError::AlreadyParented`] if the child has a parent,
    /// [`SceneError::WrongThreadForMutation`] per the affinity table, or
    /// a re-raised load failure.
    pub fn attach(&self, parent: NodeHandle, child: NodeHandle) -> SceneResult<ChildId> {
        let parent_cell = self.resolve(parent)?;
        let child_cell = self.resolve(child)?;

        if parent_cell.is_disposed() || child_cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "attach" });
        }
        if parent == child {
            return Err(SceneError::ConsistencyViolation {
                detail: "a node cannot be its own parent".to_string(),
            });
        }
        self.check_mutation(&parent_cell, "attach")?;

        let current_id = child_cell.child_id();
        if current_id.is_attached() {
            return Err(SceneError::AlreadyParented {
                id: current_id.raw(),
            });
        }

        // Strictly after any id this graph ever issued.
        let id = ChildId::from_raw(self.next_child_id.fetch_add(1, Ordering::AcqRel) + 1);
        child_cell.set_child_id(id);
        let order_key = {
            let mut child_state = child_cell.state.lock();
            child_state.parent = Some(parent);
            child_state.order_key
        };

        if parent_cell.load_state() >= LoadState::Loading
            && child_cell.load_state() < LoadState::Ready
        {
            let (clock, services) = {
                let parent_state = parent_cell.state.lock();
                (parent_state.clock.clone(), parent_state.services.clone())
            };
            match self.load_cell(&child_cell, clock, false, services, None) {
                LoadOutcome::Completed => {}
                LoadOutcome::Cancelled => {
                    tracing::debug!("child {} did not load this round", id.raw());
                }
                LoadOutcome::Failed(error) => {
                    // Roll the child back to fully detached; the issued id
                    // is abandoned, never reused.
                    child_cell.state.lock().parent = None;
                    child_cell.set_child_id(ChildId::DETACHED);
                    return Err(error);
                }
            }
        }

        let inserted = parent_cell.children.lock().insert(ChildEntry {
            handle: child,
            id,
            order_key,
        });
        if !inserted {
            return Err(SceneError::ConsistencyViolation {
                detail: format!("duplicate child id {} in one container", id.raw()),
            });
        }

        StatsInner::bump(&self.stats.attaches);
        tracing::debug!("attached child {} under node {}", id.raw(), parent.index());
        Ok(id)
    }

    /// Detaches `child` from `parent`.
    ///
    /// Membership requires identity and the child's current id to match,
    /// so stale handles from an earlier tenure never detach anything. The
    /// child stays in the arena, reset to detached, and may be attached
    /// again (receiving a fresh id).
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] if the child is not present,
    /// [`SceneError::WrongThreadForMutation`] per the affinity table, or
    /// [`SceneError::ConsistencyViolation`] if a loaded child's recorded
    /// parent does not match (a disposal-ordering bug; fatal class).
    pub fn detach(&self, parent: NodeHandle, child: NodeHandle) -> SceneResult<()> {
        let parent_cell = self.resolve(parent)?;
        let child_cell = self.resolve(child)?;
        self.check_mutation(&parent_cell, "detach")?;

        let id = child_cell.child_id();
        if !id.is_attached() {
            return Err(SceneError::NotFound);
        }

        let was_alive;
        {
            let mut children = parent_cell.children.lock();
            if !children.contains(child, id) {
                return Err(SceneError::NotFound);
            }
            let recorded = child_cell.state.lock().parent;
            if child_cell.load_state() >= LoadState::Ready && recorded != Some(parent) {
                let detail = format!(
                    "child {} is listed by a container its parent link does not match",
                    id.raw()
                );
                tracing::error!("{detail}");
                return Err(SceneError::ConsistencyViolation { detail });
            }
            was_alive = children.is_alive(child, id);
            let _ = children.remove(child, id);
        }

        child_cell.alive.store(false, Ordering::Release);
        child_cell.state.lock().parent = None;
        child_cell.set_child_id(ChildId::DETACHED);

        if was_alive {
            parent_cell.behavior.lock().child_died(child);
            child_cell.emit(&SceneEvent::Died);
        }

        StatsInner::bump(&self.stats.detaches);
        Ok(())
    }

    /// Removes every child, in ascending id order, firing "child died"
    /// for each alive one; with `dispose_children`, each is also queued
    /// for asynchronous disposal. Returns how many children were removed.
    ///
    /// # Errors
    ///
    /// [`SceneError::InvalidState`] if the container is disposed, or
    /// [`SceneError::WrongThreadForMutation`] per the affinity table.
    pub fn clear(&self, parent: NodeHandle, dispose_children: bool) -> SceneResult<usize> {
        let parent_cell = self.resolve(parent)?;
        if parent_cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "clear" });
        }
        self.check_mutation(&parent_cell, "clear")?;

        let drained = parent_cell.children.lock().drain_all();
        let mut removed = 0;
        for entry in drained {
            let Ok(child_cell) = self.resolve(entry.handle) else {
                continue;
            };
            let was_alive = child_cell.alive.swap(false, Ordering::AcqRel);
            child_cell.state.lock().parent = None;
            child_cell.set_child_id(ChildId::DETACHED);
            if was_alive {
                parent_cell.behavior.lock().child_died(entry.handle);
                child_cell.emit(&SceneEvent::Died);
            }
            if dispose_children {
                self.dispose_subtree(&child_cell);
            }
            removed += 1;
            StatsInner::bump(&self.stats.detaches);
        }
        Ok(removed)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Runs the load routine for a node on the calling thread, which
    /// becomes the node's load context.
    ///
    /// Loads of independent subtrees may run on as many threads as the
    /// host likes; duplicate attempts on one node serialize behind its
    /// load lock, and the loser observes the winner's result without
    /// re-running any load work.
    ///
    /// The routine binds `clock` (unless the node already has a custom
    /// one), resolves services through the behavior's
    /// [`NodeBehavior::inject_services`], and runs
    /// [`NodeBehavior::post_load`], then parks the node at `Ready` for
    /// the next frame to pick up.
    pub fn load(
        &self,
        node: NodeHandle,
        clock: SharedClock,
        services: &Services,
        cancel: Option<&CancellationToken>,
    ) -> LoadOutcome {
        match self.resolve(node) {
            Ok(cell) => self.load_cell(&cell, Some(clock), true, services.clone(), cancel),
            Err(error) => LoadOutcome::Failed(error),
        }
    }

    fn load_cell(
        &self,
        cell: &Arc<NodeCell>,
        clock: Option<SharedClock>,
        owns_clock: bool,
        parent_services: Services,
        cancel: Option<&CancellationToken>,
    ) -> LoadOutcome {
        if cell.is_disposed() {
            return LoadOutcome::Failed(SceneError::InvalidState { op: "load" });
        }

        // Serializes duplicate attempts; the loser blocks here briefly,
        // then observes the winner's state.
        let _load_guard = cell.load_lock.lock();

        let state = cell.load_state();
        if state >= LoadState::Ready {
            return LoadOutcome::Completed;
        }
        if state == LoadState::Loading {
            // Parked by an earlier failed or cancelled attempt. States
            // never regress, so this node will not load again.
            return LoadOutcome::Cancelled;
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            StatsInner::bump(&self.stats.loads_cancelled);
            return LoadOutcome::Cancelled;
        }

        cell.set_load_state(LoadState::Loading);

        // (a) bind the time source.
        {
            let mut state = cell.state.lock();
            state.load_thread = Some(thread::current().id());
            if state.clock.is_none() {
                if let Some(clock) = clock {
                    state.clock = Some(clock);
                    cell.owns_clock.store(owns_clock, Ordering::Release);
                }
            }
        }

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!("load cancelled after clock bind");
            StatsInner::bump(&self.stats.loads_cancelled);
            return LoadOutcome::Cancelled;
        }

        // (b) resolve and inject services.
        let services = match cell.behavior.lock().inject_services(&parent_services) {
            Ok(services) => services,
            Err(error) => {
                StatsInner::bump(&self.stats.loads_failed);
                return LoadOutcome::Failed(error);
            }
        };
        cell.state.lock().services = services.clone();

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!("load cancelled after service injection");
            StatsInner::bump(&self.stats.loads_cancelled);
            return LoadOutcome::Cancelled;
        }

        // (c) the post-load extension hook.
        let bound_clock = cell.state.lock().clock.clone();
        let env = LoadEnv {
            handle: cell.handle,
            services: &services,
            clock: bound_clock.as_ref(),
            cancel,
        };
        match cell.behavior.lock().post_load(&env) {
            Ok(()) => {}
            Err(SceneError::Core(CoreError::Cancelled)) => {
                tracing::debug!("load cancelled during post_load");
                StatsInner::bump(&self.stats.loads_cancelled);
                return LoadOutcome::Cancelled;
            }
            Err(error) => {
                StatsInner::bump(&self.stats.loads_failed);
                return LoadOutcome::Failed(error);
            }
        }

        cell.set_load_state(LoadState::Ready);
        cell.load_complete_pending.store(true, Ordering::Release);
        StatsInner::bump(&self.stats.loads_completed);
        tracing::debug!("node slot {} is ready", cell.handle.index());
        LoadOutcome::Completed
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Re-evaluates every child of `container` against its lifetime
    /// window, promoting and demoting as needed. Returns whether any
    /// child's alive status changed, so callers can skip dependent
    /// layout-style recomputation on quiet frames.
    ///
    /// # Errors
    ///
    /// [`SceneError::InvalidState`] if the container is disposed, or
    /// [`SceneError::WrongThreadForMutation`] per the affinity table.
    pub fn evaluate_liveness(&self, container: NodeHandle) -> SceneResult<bool> {
        let cell = self.resolve(container)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState {
                op: "evaluate_liveness",
            });
        }
        self.check_mutation(&cell, "evaluate_liveness")?;
        Ok(self.liveness_pass(&cell))
    }

    fn liveness_pass(&self, cell: &Arc<NodeCell>) -> bool {
        let (container_clock, container_services) = {
            let state = cell.state.lock();
            (state.clock.clone(), state.services.clone())
        };
        let entries: Vec<ChildEntry> = cell.children.lock().entries().to_vec();

        let mut changed = false;
        for entry in entries {
            let Ok(child) = self.resolve(entry.handle) else {
                continue;
            };
            // A hook run earlier in this pass may have restructured the
            // set; act only on children still listed under this id.
            if !cell.children.lock().contains(entry.handle, entry.id) {
                continue;
            }

            let clock = child
                .state
                .lock()
                .clock
                .clone()
                .or_else(|| container_clock.clone());
            let now = clock.as_ref().map_or(f64::NEG_INFINITY, |c| c.now_ms());
            let (window, eviction, dispose_on_removal) = {
                let state = child.state.lock();
                (state.lifetime, state.eviction, state.dispose_on_removal)
            };

            let should_be_alive = !child.is_disposed() && window.contains(now);
            let is_alive = child.is_alive();

            if should_be_alive && !is_alive {
                if child.load_state() < LoadState::Ready {
                    if child.load_state() == LoadState::NotLoaded {
                        // Eager inline load. An in-flight or parked load is
                        // left alone; the frame never blocks on a loader.
                        let outcome = self.load_cell(
                            &child,
                            container_clock.clone(),
                            false,
                            container_services.clone(),
                            None,
                        );
                        if !outcome.is_completed() {
                            continue;
                        }
                    } else {
                        continue;
                    }
                    if child.load_state() < LoadState::Ready {
                        continue;
                    }
                }

                let order_key = child.state.lock().order_key;
                let promoted = cell.children.lock().mark_alive(ChildEntry {
                    handle: entry.handle,
                    id: entry.id,
                    order_key,
                });
                if promoted {
                    child.alive.store(true, Ordering::Release);
                    changed = true;
                    cell.behavior.lock().child_became_alive(entry.handle);
                    child.emit(&SceneEvent::BecameAlive);
                }
            } else if !should_be_alive {
                if is_alive {
                    let demoted = cell.children.lock().mark_dead(entry.handle, entry.id);
                    child.alive.store(false, Ordering::Release);
                    if demoted {
                        changed = true;
                        cell.behavior.lock().child_died(entry.handle);
                        child.emit(&SceneEvent::Died);
                    }
                }

                let evict = child.is_disposed()
                    || match eviction {
                        EvictionPolicy::Immediate => true,
                        EvictionPolicy::Retain => false,
                        EvictionPolicy::WindowExhausted => window.has_started(now),
                    };
                if evict {
                    let _ = cell.children.lock().remove(entry.handle, entry.id);
                    child.state.lock().parent = None;
                    child.set_child_id(ChildId::DETACHED);
                    StatsInner::bump(&self.stats.detaches);
                    if dispose_on_removal && !child.is_disposed() {
                        self.dispose_subtree(&child);
                    }
                }
            }
        }

        if changed {
            StatsInner::bump(&self.stats.liveness_changes);
        }
        changed
    }

    // =========================================================================
    // Update traversal
    // =========================================================================

    /// Drives one frame through the subtree rooted at `root`.
    ///
    /// The first caller's thread becomes the designated update thread;
    /// later calls from any other thread are rejected. Returns whether
    /// the root actually updated (false while it has not reached
    /// `Ready`).
    ///
    /// # Errors
    ///
    /// [`SceneError::InvalidState`] if the root is disposed,
    /// [`SceneError::NotFound`] for dead handles, or
    /// [`SceneError::WrongThreadForMutation`] from a non-designated
    /// thread.
    pub fn update_subtree(&self, root: NodeHandle) -> SceneResult<bool> {
        {
            let mut guard = self.update_thread.lock();
            let current = thread::current().id();
            match *guard {
                None => *guard = Some(current),
                Some(designated) if designated != current => {
                    let state = self
                        .resolve(root)
                        .map_or(LoadState::NotLoaded, |cell| cell.load_state());
                    return Err(SceneError::WrongThreadForMutation {
                        state,
                        op: "update_subtree",
                    });
                }
                Some(_) => {}
            }
        }

        let updated = self.update_node(root)?;
        StatsInner::bump(&self.stats.frames);
        Ok(updated)
    }

    fn update_node(&self, handle: NodeHandle) -> SceneResult<bool> {
        let cell = self.resolve(handle)?;
        if cell.is_disposed() {
            return Err(SceneError::InvalidState { op: "update" });
        }

        // Advance the node's own clock; externally-driven clocks are the
        // host's business.
        let clock = cell.state.lock().clock.clone();
        if cell.owns_clock.load(Ordering::Acquire) {
            if let Some(clock) = clock.as_ref() {
                clock.advance_frame();
            }
        }

        let state = cell.load_state();
        if state < LoadState::Ready {
            return Ok(false);
        }
        if state == LoadState::Ready {
            // Joining the frame timeline is an update-thread privilege.
            cell.set_load_state(LoadState::Loaded);
            if cell.load_complete_pending.swap(false, Ordering::AcqRel) {
                cell.behavior.lock().load_complete();
                cell.emit(&SceneEvent::LoadComplete);
            }
        }

        let now = clock.as_ref().map_or(f64::NEG_INFINITY, |c| c.now_ms());
        let frame = FrameInfo {
            handle,
            now_ms: now,
        };

        self.liveness_pass(&cell);

        let (present, wants_child_updates) = {
            let behavior = cell.behavior.lock();
            (behavior.is_present(), behavior.requires_child_updates())
        };
        if present && wants_child_updates {
            let alive: Vec<NodeHandle> = cell
                .children
                .lock()
                .alive()
                .iter()
                .map(|entry| entry.handle)
                .collect();
            for child in alive {
                // An earlier sibling's hook may have disposed this child.
                if self.resolve(child).is_err() {
                    continue;
                }
                self.update_node(child)?;
            }

            let drained = cell.after_children_scheduler.drain()?;
            self.stats
                .actions_drained
                .fetch_add(drained as u64, Ordering::Relaxed);
            cell.behavior.lock().after_children(&frame);
        }

        let drained = cell.scheduler.drain()?;
        self.stats
            .actions_drained
            .fetch_add(drained as u64, Ordering::Relaxed);
        cell.behavior.lock().update(&frame);
        cell.emit(&SceneEvent::Updated);

        Ok(true)
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Disposes a node and its whole subtree.
    ///
    /// An attached node is detached first (firing "child died" if it was
    /// alive). Bindables are unbound synchronously, children before
    /// parents; the unbound remains are handed to the disposal worker.
    /// Disposing an already-disposed or dead handle is a no-op.
    ///
    /// # Errors
    ///
    /// [`SceneError::WrongThreadForMutation`] if the implied detach is
    /// issued from a thread the affinity table rejects.
    pub fn dispose(&self, node: NodeHandle) -> SceneResult<()> {
        let Ok(cell) = self.resolve(node) else {
            return Ok(());
        };
        if cell.is_disposed() {
            return Ok(());
        }

        let parent = cell.state.lock().parent;
        if let Some(parent_handle) = parent {
            self.detach(parent_handle, node)?;
        }
        self.dispose_subtree(&cell);
        Ok(())
    }

    /// Tears down `cell` and everything under it. Children are unbound
    /// and freed before their parent, depth-first in ascending id order.
    fn dispose_subtree(&self, cell: &Arc<NodeCell>) {
        if cell.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries = cell.children.lock().drain_all();
        for entry in entries {
            let Ok(child) = self.resolve(entry.handle) else {
                continue;
            };
            let was_alive = child.alive.swap(false, Ordering::AcqRel);
            child.state.lock().parent = None;
            child.set_child_id(ChildId::DETACHED);
            if was_alive {
                cell.behavior.lock().child_died(entry.handle);
                child.emit(&SceneEvent::Died);
            }
            self.dispose_subtree(&child);
        }

        // Best-effort unbind: every member is attempted, failures are
        // logged by `unbind_members` and never abort the teardown.
        {
            let mut behavior = cell.behavior.lock();
            let mut members = behavior.bindables();
            let _failures = unbind_members(&mut members);
        }

        self.free_slot(cell.handle);

        let remains: Box<dyn Disposable> = Box::new(NodeRemains {
            cell: Arc::clone(cell),
        });
        if let Err(error) = self.disposal.enqueue(remains) {
            tracing::warn!("disposal queue rejected a node, dropping inline: {error}");
        }

        StatsInner::bump(&self.stats.nodes_disposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;
    impl NodeBehavior for Inert {}

    #[test]
    fn test_insert_and_resolve() {
        let graph = SceneGraph::with_defaults();
        let node = graph.insert(Inert);

        assert!(graph.contains(node));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.load_state(node).unwrap(), LoadState::NotLoaded);
        assert_eq!(graph.child_id(node).unwrap(), ChildId::DETACHED);
    }

    #[test]
    fn test_slot_recycling_invalidates_old_handles() {
        let graph = SceneGraph::with_defaults();
        let first = graph.insert(Inert);
        graph.dispose(first).unwrap();

        let second = graph.insert(Inert);
        // Same slot, new generation.
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(!graph.contains(first));
        assert!(graph.contains(second));
        assert_eq!(graph.load_state(first), Err(SceneError::NotFound));
    }

    #[test]
    fn test_double_dispose_is_noop() {
        let graph = SceneGraph::with_defaults();
        let node = graph.insert(Inert);
        graph.dispose(node).unwrap();
        graph.dispose(node).unwrap();
        assert_eq!(graph.stats().nodes_disposed, 1);
    }

    #[test]
    fn test_attach_rejects_self_parenting() {
        let graph = SceneGraph::with_defaults();
        let node = graph.insert(Inert);
        assert!(matches!(
            graph.attach(node, node),
            Err(SceneError::ConsistencyViolation { .. })
        ));
    }

    #[test]
    fn test_detach_of_stranger_is_not_found() {
        let graph = SceneGraph::with_defaults();
        let parent = graph.insert(Inert);
        let stranger = graph.insert(Inert);
        assert_eq!(graph.detach(parent, stranger), Err(SceneError::NotFound));
    }
}
