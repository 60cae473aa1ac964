//! # Concurrency Integration Test
//!
//! Proves the load-context / update-context split: parallel loads
//! serialize per node, the frame thread owns promotion, and the affinity
//! gates reject structural mutation from foreign threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use canopy_core::{ManualClock, Services, SharedClock};
use canopy_scene::{LoadEnv, LoadState, NodeBehavior, SceneError, SceneGraph, SceneResult};

struct Inert;
impl NodeBehavior for Inert {}

fn manual_clock(start_ms: f64) -> SharedClock {
    Arc::new(ManualClock::at(start_ms))
}

/// Scenario: two concurrent load attempts on one node run the load
/// routine exactly once; the loser observes the winner's result.
#[test]
fn test_concurrent_duplicate_loads_run_once() {
    struct SlowLoader {
        loads: Arc<AtomicUsize>,
    }
    impl NodeBehavior for SlowLoader {
        fn post_load(&mut self, _env: &LoadEnv<'_>) -> SceneResult<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(25));
            Ok(())
        }
    }

    let graph = SceneGraph::with_defaults();
    let loads = Arc::new(AtomicUsize::new(0));
    let node = graph.insert(SlowLoader {
        loads: Arc::clone(&loads),
    });
    let services = Services::new();

    thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let graph = &graph;
                let services = &services;
                scope.spawn(move || graph.load(node, manual_clock(0.0), services, None))
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_completed());
        }
    });

    assert_eq!(loads.load(Ordering::SeqCst), 1, "load routine ran twice");
    assert_eq!(graph.load_state(node).unwrap(), LoadState::Ready);
}

/// Loading happens on a worker thread; joining the frame timeline stays
/// an update-thread privilege.
#[test]
fn test_worker_load_then_frame_promotion() {
    let graph = SceneGraph::with_defaults();
    let root = graph.insert(Inert);
    let services = Services::new();

    thread::scope(|scope| {
        let graph = &graph;
        let services = &services;
        scope
            .spawn(move || {
                assert!(graph
                    .load(root, manual_clock(0.0), services, None)
                    .is_completed());
            })
            .join()
            .unwrap();
    });

    assert_eq!(graph.load_state(root).unwrap(), LoadState::Ready);
    assert!(graph.update_subtree(root).unwrap());
    assert_eq!(graph.load_state(root).unwrap(), LoadState::Loaded);
}

/// A structural mutation from a foreign thread fails loudly and leaves
/// the child set untouched.
#[test]
fn test_thread_gate_blocks_foreign_mutation() {
    let graph = SceneGraph::with_defaults();
    let root = graph.insert(Inert);
    assert!(graph
        .load(root, manual_clock(0.0), &Services::new(), None)
        .is_completed());
    // Designate this thread as the update thread.
    graph.update_subtree(root).unwrap();

    let child = graph.insert(Inert);
    thread::scope(|scope| {
        let graph = &graph;
        scope
            .spawn(move || {
                let error = graph.attach(root, child).unwrap_err();
                assert!(matches!(
                    error,
                    SceneError::WrongThreadForMutation { state: LoadState::Loaded, op: "attach" }
                ));
            })
            .join()
            .unwrap();
    });

    // Nothing changed; the same attach is fine from the update thread.
    assert!(graph.children_of(root).unwrap().is_empty());
    assert_eq!(graph.child_id(child).unwrap().raw(), 0);
    graph.attach(root, child).unwrap();
    assert_eq!(graph.children_of(root).unwrap(), vec![child]);
}

/// `update_subtree` itself is rejected off the designated thread.
#[test]
fn test_update_from_foreign_thread_is_rejected() {
    let graph = SceneGraph::with_defaults();
    let root = graph.insert(Inert);
    assert!(graph
        .load(root, manual_clock(0.0), &Services::new(), None)
        .is_completed());
    graph.update_subtree(root).unwrap();

    thread::scope(|scope| {
        let graph = &graph;
        scope
            .spawn(move || {
                let error = graph.update_subtree(root).unwrap_err();
                assert!(matches!(
                    error,
                    SceneError::WrongThreadForMutation {
                        op: "update_subtree",
                        ..
                    }
                ));
            })
            .join()
            .unwrap();
    });
}

/// Actions enqueued from a worker thread run on the next frame, on the
/// update thread.
#[test]
fn test_deferred_actions_cross_threads() {
    let graph = SceneGraph::with_defaults();
    let root = graph.insert(Inert);
    assert!(graph
        .load(root, manual_clock(0.0), &Services::new(), None)
        .is_completed());
    graph.update_subtree(root).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    thread::scope(|scope| {
        let graph = &graph;
        let ran = Arc::clone(&ran);
        scope
            .spawn(move || {
                graph
                    .enqueue_action(root, move || {
                        ran.store(true, Ordering::SeqCst);
                    })
                    .unwrap();
            })
            .join()
            .unwrap();
    });

    assert!(!ran.load(Ordering::SeqCst));
    graph.update_subtree(root).unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert!(graph.stats().actions_drained >= 1);
}

/// Attaching during a parent's load, from the load thread, is permitted
/// by the affinity table (Loading allows the loader itself).
#[test]
fn test_load_thread_may_attach_during_load() {
    struct BuildsChildren {
        graph: Arc<SceneGraph>,
        built: Arc<AtomicUsize>,
    }
    impl NodeBehavior for BuildsChildren {
        fn post_load(&mut self, env: &LoadEnv<'_>) -> SceneResult<()> {
            for _ in 0..3 {
                let child = self.graph.insert(Inert);
                self.graph.attach(env.handle, child)?;
                self.built.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    let graph = Arc::new(SceneGraph::with_defaults());
    let built = Arc::new(AtomicUsize::new(0));
    let root = graph.insert(BuildsChildren {
        graph: Arc::clone(&graph),
        built: Arc::clone(&built),
    });

    let loader_graph = Arc::clone(&graph);
    thread::spawn(move || {
        assert!(loader_graph
            .load(root, manual_clock(0.0), &Services::new(), None)
            .is_completed());
    })
    .join()
    .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 3);
    assert_eq!(graph.children_of(root).unwrap().len(), 3);

    graph.update_subtree(root).unwrap();
    assert_eq!(graph.alive_children_of(root).unwrap().len(), 3);
}
