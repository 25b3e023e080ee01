//! # Search Coordinator
//!
//! A [`Search`] owns one run of the tree search from the current head of a
//! [`NodeTree`]. It starts one watchdog thread and a pool of worker threads,
//! and delivers exactly one [`BestMoveInfo`] on a channel once the search is
//! stopped, whether by deadline, by [`Search::stop`] or by [`Search::abort`].
//!
//! ## Threads and locks
//! ```text
//!  ┌──────────┐  ┌──────────┐        ┌────────────┐
//!  │ worker 0 │  │ worker N │  ...   │  watchdog  │──► best_move_tx
//!  └────┬─────┘  └────┬─────┘        └─────┬──────┘
//!       │ write       │ write              │ write, then counters
//!       ▼             ▼                    ▼
//!  ┌───────────────────────────────────────────────┐
//!  │     RwLock<NodeArena>   (the tree lock)       │
//!  └───────────────────────────────────────────────┘
//!  ┌───────────────────────────────────────────────┐
//!  │ Mutex<Counters>  best move, sent, failed      │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! The counters mutex is only ever taken while holding the tree lock or with
//! no lock at all, never the other way round.

use super::node::{EdgeAndNode, NodeArena, NodeId};
use super::params::SearchParams;
use super::tree::NodeTree;
use super::worker::SearchWorker;
use crate::neural::network::{Network, NetworkError};
use crate::position::PositionHistory;
use crate::{Action, Puzzle, RulesError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that end a search session.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network evaluation failed: {0}")]
    Network(#[from] NetworkError),
    #[error("Replaying a search path failed: {0}")]
    Replay(#[from] RulesError),
    #[error("Vertex is not below the search root")]
    DetachedNode,
    #[error("A search thread panicked")]
    WorkerPanicked,
    #[error("Failed to spawn a search thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// When the search should end on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimits {
    /// `None` searches until stopped.
    pub deadline: Option<Instant>,
}

impl SearchLimits {
    pub fn movetime(movetime: Duration) -> Self {
        SearchLimits {
            deadline: Some(Instant::now() + movetime),
        }
    }

    pub fn infinite() -> Self {
        SearchLimits { deadline: None }
    }
}

/// The result delivered once per search.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestMoveInfo {
    /// `None` when the root was never expanded or has no legal action.
    pub best_move: Option<Action>,
    pub visits: u32,
    pub q: f32,
}

impl BestMoveInfo {
    fn from_edge(edge: &EdgeAndNode<'_>) -> Self {
        BestMoveInfo {
            best_move: Some(edge.action()),
            visits: edge.n(),
            q: edge.q(0.0),
        }
    }
}

/// Statistics of one root edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeStats {
    pub action: Action,
    pub n: u32,
    pub n_in_flight: u32,
    pub q: f32,
    pub prior: f32,
}

/// Up to `count` edges of `parent`, best first: most visits, then highest q
/// (0 when unvisited), then highest prior. Full ties keep edge order.
pub fn best_children_no_temperature<'a>(
    arena: &'a NodeArena,
    parent: NodeId,
    count: usize,
) -> Vec<EdgeAndNode<'a>> {
    let mut edges: Vec<_> = arena.edges(parent).collect();
    edges.sort_by(|a, b| {
        b.n()
            .cmp(&a.n())
            .then(b.q(0.0).total_cmp(&a.q(0.0)))
            .then(b.prior().total_cmp(&a.prior()))
    });
    edges.truncate(count);
    edges
}

pub fn best_child_no_temperature(arena: &NodeArena, parent: NodeId) -> Option<EdgeAndNode<'_>> {
    best_children_no_temperature(arena, parent, 1).into_iter().next()
}

/// Guarded by its own mutex; always taken after the tree lock.
struct Counters {
    /// The move reported once the search stops. Frozen after delivery.
    final_bestmove: BestMoveInfo,
    bestmove_is_sent: bool,
    /// Set when a worker errored; its search never reports a move.
    worker_failed: bool,
    best_move_tx: Sender<BestMoveInfo>,
}

/// State shared between the coordinator and its threads.
pub(crate) struct SearchShared<P: Puzzle> {
    /// The tree lock, shared with the owning [`NodeTree`].
    pub(crate) nodes: Arc<RwLock<NodeArena>>,
    /// Head of the tree when the search was created.
    pub(crate) root: NodeId,
    /// Positions from the start up to and including `root`.
    pub(crate) played_history: PositionHistory<P>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) params: SearchParams,
    limits: SearchLimits,
    start_time: Instant,
    /// Raised once and never cleared.
    pub(crate) stop: AtomicBool,
    counters: Mutex<Counters>,
}

impl<P: Puzzle> SearchShared<P> {
    pub(crate) fn is_search_active(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    fn deadline_passed(&self) -> bool {
        self.limits
            .deadline
            .map_or(false, |deadline| Instant::now() >= deadline)
    }

    fn ensure_best_move_known(&self, arena: &NodeArena, counters: &mut Counters) {
        if counters.bestmove_is_sent {
            return;
        }
        if !arena.get(self.root).has_edges() {
            return;
        }
        if let Some(best) = best_child_no_temperature(arena, self.root) {
            counters.final_bestmove = BestMoveInfo::from_edge(&best);
        }
    }

    /// Resolves and sends the best move unless it was sent already or a
    /// worker failed. Callers hold the tree lock.
    fn send_best_move(&self, arena: &NodeArena, counters: &mut Counters) {
        if counters.bestmove_is_sent {
            return;
        }
        if !counters.worker_failed {
            self.ensure_best_move_known(arena, counters);
            let info = counters.final_bestmove;
            info!(
                best_move = ?info.best_move,
                visits = info.visits,
                q = info.q,
                root_visits = arena.get(self.root).n(),
                elapsed_ms = self.start_time.elapsed().as_millis() as u64,
                "search finished"
            );
            if counters.best_move_tx.send(info).is_err() {
                warn!("best move receiver dropped");
            }
        }
        counters.bestmove_is_sent = true;
    }

    /// Returns true once the best move has been sent.
    fn maybe_trigger_stop(&self) -> bool {
        let arena = self.nodes.write();
        let mut counters = self.counters.lock();
        if counters.bestmove_is_sent {
            return true;
        }
        if self.is_search_active() && self.deadline_passed() {
            debug!("search deadline reached");
            self.stop.store(true, Ordering::Release);
        }
        if !self.is_search_active() {
            self.send_best_move(&arena, &mut counters);
        }
        counters.bestmove_is_sent
    }

    fn watchdog(&self) {
        loop {
            if (!self.is_search_active() || self.deadline_passed()) && self.maybe_trigger_stop() {
                break;
            }
            thread::yield_now();
        }
    }

    pub(crate) fn report_failure(&self, err: &SearchError) {
        error!(error = %err, "search worker failed");
        let mut counters = self.counters.lock();
        counters.worker_failed = true;
        self.stop.store(true, Ordering::Release);
    }
}

/// One search run from the head of a tree.
pub struct Search<P: Puzzle> {
    shared: Arc<SearchShared<P>>,
    threads: Mutex<Vec<JoinHandle<Result<(), SearchError>>>>,
}

impl<P: Puzzle> Search<P> {
    /// Binds a search to the current head of `tree`.
    ///
    /// # Arguments
    /// * `tree` - Supplies the arena, the root and the played history
    /// * `network` - Estimator used by every worker
    /// * `best_move_tx` - Receives exactly one [`BestMoveInfo`]
    /// * `limits` - Deadline of the search
    /// * `params` - Validated tunables
    pub fn new(
        tree: &NodeTree<P>,
        network: Arc<dyn Network>,
        best_move_tx: Sender<BestMoveInfo>,
        limits: SearchLimits,
        params: SearchParams,
    ) -> Self {
        let shared = SearchShared {
            nodes: Arc::clone(tree.arena()),
            root: tree.current_head(),
            played_history: tree.history().clone(),
            network,
            params,
            limits,
            start_time: Instant::now(),
            stop: AtomicBool::new(false),
            counters: Mutex::new(Counters {
                final_bestmove: BestMoveInfo::default(),
                bestmove_is_sent: false,
                worker_failed: false,
                best_move_tx,
            }),
        };
        Search {
            shared: Arc::new(shared),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Starts the watchdog if needed and workers until `how_many` are running.
    /// Calling it again never starts a second watchdog.
    pub fn start_threads(&self, how_many: usize) -> Result<(), SearchError> {
        let mut threads = self.threads.lock();

        if threads.is_empty() {
            info!(
                threads = how_many,
                deadline_ms = self
                    .shared
                    .limits
                    .deadline
                    .map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64),
                backend = self.shared.network.name(),
                "search started"
            );
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("search-watchdog".to_string())
                .spawn(move || {
                    shared.watchdog();
                    Ok::<(), SearchError>(())
                })
                .map_err(SearchError::Spawn)?;
            threads.push(handle);
        }

        while threads.len() <= how_many {
            let shared = Arc::clone(&self.shared);
            let name = format!("search-worker-{}", threads.len() - 1);
            let spawned = thread::Builder::new().name(name).spawn(move || {
                let result = SearchWorker::new(Arc::clone(&shared)).run_blocking();
                if let Err(ref e) = result {
                    shared.report_failure(e);
                }
                result
            });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    let err = SearchError::Spawn(e);
                    self.shared.report_failure(&err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Starts `threads` workers and waits for the search to end.
    pub fn run_blocking(&self, threads: usize) -> Result<(), SearchError> {
        self.start_threads(threads)?;
        self.wait()
    }

    pub fn is_search_active(&self) -> bool {
        self.shared.is_search_active()
    }

    /// Asks the search to stop. The watchdog delivers the best move.
    pub fn stop(&self) {
        info!("stopping search on request");
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Stops the search and delivers the best move right away unless it has
    /// been delivered already.
    pub fn abort(&self) {
        let arena = self.shared.nodes.write();
        let mut counters = self.shared.counters.lock();
        self.shared.stop.store(true, Ordering::Release);
        self.shared.send_best_move(&arena, &mut counters);
    }

    /// Joins every thread. Returns the first failure of the session.
    pub fn wait(&self) -> Result<(), SearchError> {
        let mut first_error = None;
        let mut threads = self.threads.lock();
        while let Some(handle) = threads.pop() {
            let result = handle.join().unwrap_or(Err(SearchError::WorkerPanicked));
            if let Err(e) = result {
                if matches!(e, SearchError::WorkerPanicked) {
                    self.shared.report_failure(&e);
                }
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The move the search currently prefers. Frozen once it has been sent.
    pub fn best_move(&self) -> Option<Action> {
        let arena = self.shared.nodes.write();
        let mut counters = self.shared.counters.lock();
        self.shared.ensure_best_move_known(&arena, &mut counters);
        counters.final_bestmove.best_move
    }

    /// Value of the best root child, falling back to the negated root value.
    pub fn best_eval(&self) -> f32 {
        let arena = self.shared.nodes.read();
        let _counters = self.shared.counters.lock();
        let root = arena.get(self.shared.root);
        let parent_q = -root.q();
        if !root.has_edges() {
            return parent_q;
        }
        best_child_no_temperature(&arena, self.shared.root).map_or(parent_q, |best| best.q(parent_q))
    }

    /// Snapshot of the root edges.
    pub fn root_stats(&self) -> Vec<EdgeStats> {
        let arena = self.shared.nodes.read();
        arena
            .edges(self.shared.root)
            .map(|e| EdgeStats {
                action: e.action(),
                n: e.n(),
                n_in_flight: e.node().map_or(0, |n| n.n_in_flight()),
                q: e.q(0.0),
                prior: e.prior(),
            })
            .collect()
    }

    /// Completed visits of the root.
    pub fn root_visits(&self) -> u32 {
        self.shared.nodes.read().get(self.shared.root).n()
    }
}

impl<P: Puzzle> Drop for Search<P> {
    fn drop(&mut self) {
        self.abort();
        if let Err(e) = self.wait() {
            debug!(error = %e, "search dropped after a failure");
        }
        debug!("search destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcts::gc::NodeGarbageCollector;
    use crate::neural::uniform::UniformNetwork;
    use crate::soko::SokoBoard;
    use std::sync::mpsc;

    fn visit(arena: &mut NodeArena, id: NodeId, v: f32, times: u32) {
        for _ in 0..times {
            let node = arena.get_mut(id);
            assert!(node.try_start_visit());
            node.finalize_visit(v, 1);
        }
    }

    #[test]
    fn test_best_child_ranking() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        arena.expand(root, &Action::ALL);
        let down = arena.get_or_spawn_child(root, 1);
        let left = arena.get_or_spawn_child(root, 2);
        let right = arena.get_or_spawn_child(root, 3);
        visit(&mut arena, down, 0.1, 3);
        visit(&mut arena, left, 0.9, 3);
        visit(&mut arena, right, 0.9, 1);

        let best: Vec<_> = best_children_no_temperature(&arena, root, 4)
            .iter()
            .map(|e| e.action())
            .collect();
        assert_eq!(best, vec![Action::Left, Action::Down, Action::Right, Action::Up]);
    }

    #[test]
    fn test_best_child_ties_keep_edge_order() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        arena.expand(root, &[Action::Down, Action::Left, Action::Right]);
        let best = best_child_no_temperature(&arena, root).unwrap();
        assert_eq!(best.action(), Action::Down);

        arena
            .get_mut(root)
            .edges_mut()
            .unwrap()
            .iter_mut()
            .nth(2)
            .unwrap()
            .set_prior(0.5);
        let best = best_child_no_temperature(&arena, root).unwrap();
        assert_eq!(best.action(), Action::Right);
    }

    #[test]
    fn test_abort_sends_exactly_once() {
        let gc = Arc::new(NodeGarbageCollector::new());
        let tree = NodeTree::new(SokoBoard::startpos(), gc);
        let (tx, rx) = mpsc::channel();
        let search = Search::new(
            &tree,
            Arc::new(UniformNetwork::default()),
            tx,
            SearchLimits::infinite(),
            SearchParams::default(),
        );
        search.abort();
        search.abort();
        drop(search);
        let messages: Vec<_> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].best_move, None);
    }

    #[test]
    fn test_best_eval_without_edges_is_negated_root_q() {
        let gc = Arc::new(NodeGarbageCollector::new());
        let tree = NodeTree::new(SokoBoard::startpos(), gc);
        {
            let mut arena = tree.arena().write();
            visit(&mut arena, tree.current_head(), 0.4, 1);
        }
        let (tx, _rx) = mpsc::channel();
        let search = Search::new(
            &tree,
            Arc::new(UniformNetwork::default()),
            tx,
            SearchLimits::infinite(),
            SearchParams::default(),
        );
        assert!((search.best_eval() + 0.4).abs() < 1e-6);
        assert_eq!(search.best_move(), None);
    }
}
