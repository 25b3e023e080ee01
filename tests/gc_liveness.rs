use mcts::mcts::{NodeArena, NodeGarbageCollector, NodeId, NodeTree};
use mcts::soko::SokoBoard;
use mcts::Action;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(gc: &NodeGarbageCollector, freed: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if gc.freed() >= freed {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// A root with `width` children, each carrying `width` grandchildren.
fn bushy_arena(width: usize) -> (Arc<RwLock<NodeArena>>, NodeId, usize) {
    let mut arena = NodeArena::new();
    let root = arena.alloc_root();
    arena.expand(root, &vec![Action::Up; width]);
    for i in 0..width {
        let child = arena.get_or_spawn_child(root, i);
        arena.expand(child, &vec![Action::Down; width]);
        for j in 0..width {
            arena.get_or_spawn_child(child, j);
        }
    }
    let live = arena.live();
    (Arc::new(RwLock::new(arena)), root, live)
}

#[test]
fn test_detached_subtree_is_freed_while_tree_stays_usable() {
    let gc = NodeGarbageCollector::new();
    let (arena, root, live) = bushy_arena(60);
    let chain = arena.write().take_children(root).unwrap();
    gc.enqueue_subtree(Arc::clone(&arena), chain);

    assert_eq!(arena.read().get(root).num_edges(), 60);
    {
        let mut guard = arena.write();
        guard.get_mut(root).try_start_visit();
        guard.get_mut(root).finalize_visit(0.5, 1);
    }

    assert!(wait_for(&gc, live - 1));
    let guard = arena.read();
    assert_eq!(guard.live(), 1);
    assert_eq!(guard.get(root).n(), 1);
    assert_eq!(gc.pending(), 0);
}

#[test]
fn test_dropped_tree_is_collected() {
    let gc = Arc::new(NodeGarbageCollector::new());
    {
        let mut tree = NodeTree::new(SokoBoard::startpos(), Arc::clone(&gc));
        tree.advance(Action::Up).unwrap();
        tree.advance(Action::Left).unwrap();
    }
    assert!(wait_for(&gc, 3));
}

#[test]
fn test_shutdown_drains_queue() {
    let gc = NodeGarbageCollector::new();
    let mut expected = 0;
    for _ in 0..5 {
        let (arena, _, live) = bushy_arena(10);
        expected += live;
        gc.enqueue_arena(arena);
    }
    gc.shutdown();
    assert_eq!(gc.pending(), 0);
    assert_eq!(gc.freed(), expected);

    let (arena, _, live) = bushy_arena(3);
    gc.enqueue_arena(arena);
    assert_eq!(gc.freed(), expected + live);
}
