//! # Background Node Reclamation
//!
//! Detached subtrees can be large, and freeing them on a search thread would
//! stall every other worker waiting on the tree lock. Instead the owner hands
//! them to a [`NodeGarbageCollector`], whose single thread frees them a chunk
//! at a time.
//!
//! ```text
//! NodeTree ──enqueue──► queue ──(every 100 ms)──► collector thread
//!                                                   │
//!                 arena.write() ◄── free ≤ 1024 ────┘  (repeat until done)
//! ```

use super::node::{NodeArena, NodeId};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How long the collector sleeps when it finds nothing to do.
pub const GC_INTERVAL: Duration = Duration::from_millis(100);

/// Vertices freed per acquisition of the arena write lock.
pub const GC_CHUNK: usize = 1024;

/// Work handed to the collector.
pub enum GcEntry {
    /// A child chain cut out of a live arena.
    Subtree {
        arena: Arc<RwLock<NodeArena>>,
        chain: NodeId,
    },
    /// An arena nobody will search again.
    Arena(Arc<RwLock<NodeArena>>),
}

#[derive(Default)]
struct GcShared {
    queue: Mutex<VecDeque<GcEntry>>,
    stop: AtomicBool,
    freed: AtomicUsize,
}

impl GcShared {
    fn collect(&self, entry: GcEntry) {
        match entry {
            GcEntry::Subtree { arena, chain } => {
                let mut pending = vec![chain];
                let mut total = 0;
                while !pending.is_empty() {
                    let freed = arena.write().free_detached(&mut pending, GC_CHUNK);
                    total += freed;
                    self.freed.fetch_add(freed, Ordering::Relaxed);
                }
                debug!(freed = total, "collected detached subtree");
            }
            GcEntry::Arena(arena) => match Arc::try_unwrap(arena) {
                Ok(lock) => {
                    let live = lock.into_inner().live();
                    self.freed.fetch_add(live, Ordering::Relaxed);
                    debug!(freed = live, "collected arena");
                }
                Err(_) => debug!("arena still shared, released our reference"),
            },
        }
    }

    fn run(&self) {
        loop {
            let entry = self.queue.lock().pop_front();
            match entry {
                Some(entry) => self.collect(entry),
                None if self.stop.load(Ordering::Acquire) => break,
                None => thread::park_timeout(GC_INTERVAL),
            }
        }
    }
}

/// Frees detached tree fragments on a background thread.
///
/// Shared through an `Arc` by every tree that reclaims memory through it. The
/// thread starts on the first enqueue and is joined by [`shutdown`](Self::shutdown)
/// or on drop, after the queue has been drained.
#[derive(Default)]
pub struct NodeGarbageCollector {
    shared: Arc<GcShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NodeGarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `entry` without touching the vertices it refers to. Once the
    /// collector is shut down the entry is freed on the calling thread.
    pub fn enqueue(&self, entry: GcEntry) {
        let rejected = {
            let mut queue = self.shared.queue.lock();
            if self.shared.stop.load(Ordering::Acquire) {
                Some(entry)
            } else {
                queue.push_back(entry);
                None
            }
        };
        match rejected {
            Some(entry) => self.shared.collect(entry),
            None => self.ensure_started(),
        }
    }

    /// Queues a child chain detached from `arena`.
    pub fn enqueue_subtree(&self, arena: Arc<RwLock<NodeArena>>, chain: NodeId) {
        self.enqueue(GcEntry::Subtree { arena, chain });
    }

    /// Queues a whole arena.
    pub fn enqueue_arena(&self, arena: Arc<RwLock<NodeArena>>) {
        self.enqueue(GcEntry::Arena(arena));
    }

    fn ensure_started(&self) {
        let mut worker = self.worker.lock();
        // Shutdown drains whatever was queued before it raised `stop`.
        if worker.is_some() || self.shared.stop.load(Ordering::Acquire) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("node-gc".to_string())
            .spawn(move || shared.run())
        {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                warn!(error = %e, "could not start node collector, freeing inline");
                while let Some(entry) = self.shared.queue.lock().pop_front() {
                    self.shared.collect(entry);
                }
            }
        }
    }

    /// Total vertices freed so far.
    pub fn freed(&self) -> usize {
        self.shared.freed.load(Ordering::Relaxed)
    }

    /// Entries waiting to be collected.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Drains the queue and joins the collector thread.
    pub fn shutdown(&self) {
        {
            // Raised under the queue lock so no enqueue can slip in behind it.
            let _queue = self.shared.queue.lock();
            self.shared.stop.store(true, Ordering::Release);
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("node collector thread panicked");
            }
        }
        while let Some(entry) = self.shared.queue.lock().pop_front() {
            self.shared.collect(entry);
        }
    }
}

impl Drop for NodeGarbageCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Action;
    use std::time::Instant;

    fn wide_arena(children: usize) -> (Arc<RwLock<NodeArena>>, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        arena.expand(root, &vec![Action::Up; children]);
        for i in 0..children {
            arena.get_or_spawn_child(root, i);
        }
        (Arc::new(RwLock::new(arena)), root)
    }

    #[test]
    fn test_subtree_is_freed_in_background() {
        let gc = NodeGarbageCollector::new();
        let (arena, root) = wide_arena(3000);
        let chain = arena.write().take_children(root).unwrap();

        gc.enqueue_subtree(Arc::clone(&arena), chain);
        let deadline = Instant::now() + Duration::from_secs(5);
        while gc.freed() < 3000 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(gc.freed(), 3000);
        assert_eq!(arena.read().live(), 1);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let gc = NodeGarbageCollector::new();
        let (arena, _) = wide_arena(10);
        let weak = Arc::downgrade(&arena);
        gc.enqueue_arena(arena);
        gc.shutdown();
        assert!(weak.upgrade().is_none());
        assert_eq!(gc.freed(), 11);
        assert_eq!(gc.pending(), 0);
    }

    #[test]
    fn test_shared_arena_is_only_released() {
        let gc = NodeGarbageCollector::new();
        let (arena, _) = wide_arena(4);
        gc.enqueue_arena(Arc::clone(&arena));
        gc.shutdown();
        assert_eq!(Arc::strong_count(&arena), 1);
        assert_eq!(gc.freed(), 0);
    }

    #[test]
    fn test_enqueue_after_shutdown_frees_inline() {
        let gc = NodeGarbageCollector::new();
        gc.shutdown();

        let (arena, root) = wide_arena(5);
        let chain = arena.write().take_children(root).unwrap();
        gc.enqueue_subtree(Arc::clone(&arena), chain);
        assert_eq!(arena.read().live(), 1);

        let (arena, _) = wide_arena(2);
        gc.enqueue_arena(arena);
        assert_eq!(gc.freed(), 8);
        assert_eq!(gc.pending(), 0);
        assert!(gc.worker.lock().is_none());
    }

    #[test]
    fn test_nothing_is_stranded_by_a_racing_shutdown() {
        let gc = Arc::new(NodeGarbageCollector::new());
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let gc = Arc::clone(&gc);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let (arena, _) = wide_arena(1);
                        gc.enqueue_arena(arena);
                    }
                })
            })
            .collect();
        gc.shutdown();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(gc.pending(), 0);
        assert_eq!(gc.freed(), 400);
    }
}
