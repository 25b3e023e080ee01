//! # Search Worker
//!
//! Each worker thread repeats one iteration until the search stops:
//!
//! ```text
//! gather ──► compute ──► fetch ──► backup
//!   │           │          │         │
//!   │ pick, expand, encode │         └─ write lock: finalize or cancel visits
//!   │           │          └─ write lock: values and priors
//!   │           └─ one blocking network call (skipped if nothing was queued)
//!   └─ write lock per pick, read lock for path replay
//! ```
//!
//! Selection claims an in-flight visit on every vertex it walks through. A
//! vertex that is already being evaluated for the first time refuses the
//! claim, which turns the pick into a collision; the visits claimed above it
//! are cancelled during backup.

use super::node::{NodeArena, NodeId};
use super::params::{SearchParams, HISTORY_FILL, MAX_COLLISIONS};
use super::search::{SearchError, SearchShared};
use crate::neural::encoder::encode_position_for_nn;
use crate::neural::network::NetworkComputation;
use crate::position::PositionHistory;
use crate::{GameResult, Puzzle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// One pick of a minibatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeToProcess {
    /// The vertex the pick ended on.
    pub node: NodeId,
    /// Visits claimed by this pick on every vertex of its path.
    pub multivisit: u32,
    /// Number of vertices on the path, root included.
    pub depth: u16,
    /// The pick ran into a vertex that is being evaluated already.
    pub is_collision: bool,
    /// The position of `node` was added to the network batch.
    pub nn_queried: bool,
    /// Value backed up along the path, filled in by [`fetch_results`].
    pub v: f32,
}

impl NodeToProcess {
    /// A regular single visit of `node`.
    pub fn visit(node: NodeId, depth: u16) -> Self {
        NodeToProcess {
            node,
            multivisit: 1,
            depth,
            is_collision: false,
            nn_queried: false,
            v: 0.0,
        }
    }

    /// A pick that must only release the visits it claimed above `node`.
    pub fn collision(node: NodeId, depth: u16) -> Self {
        NodeToProcess {
            is_collision: true,
            ..NodeToProcess::visit(node, depth)
        }
    }
}

/// Walks from `root` to the vertex to evaluate next, claiming a visit on each
/// vertex on the way and materializing the chosen children.
pub fn pick_node_to_extend(arena: &mut NodeArena, root: NodeId, params: &SearchParams) -> NodeToProcess {
    let mut node = root;
    let mut depth: u16 = 0;
    loop {
        depth = depth.saturating_add(1);

        if !arena.get_mut(node).try_start_visit() {
            return NodeToProcess::collision(node, depth);
        }

        let current = arena.get(node);
        if current.is_terminal() || current.num_edges() == 0 {
            return NodeToProcess::visit(node, depth);
        }

        let cpuct = params.compute_cpuct(current.n());
        let puct_mult = cpuct * (current.children_visits().max(1) as f32).sqrt();
        let fpu = params.fpu_value();

        let mut best = f32::MIN;
        let mut best_index = 0;
        for edge in arena.edges(node) {
            let score = edge.q(fpu) + edge.u(puct_mult);
            if score > best {
                best = score;
                best_index = edge.index();
            }
        }

        node = arena.get_or_spawn_child(node, best_index);
    }
}

/// Applies the backup of one pick.
///
/// Collisions cancel the in-flight visits claimed on the ancestors of the
/// collided vertex. Visits finalize every vertex from the pick up to `root`
/// with the same value; a terminal vertex substitutes its fixed q.
pub fn backup_node(arena: &mut NodeArena, root: NodeId, item: &NodeToProcess) {
    if item.is_collision {
        if item.node == root {
            return;
        }
        let mut cur = arena.get(item.node).parent();
        while let Some(id) = cur {
            arena.get_mut(id).cancel_visit(item.multivisit);
            if id == root {
                break;
            }
            cur = arena.get(id).parent();
        }
        return;
    }

    let mut v = item.v;
    let mut cur = Some(item.node);
    while let Some(id) = cur {
        let node = arena.get_mut(id);
        if node.is_terminal() {
            v = node.q();
        }
        node.finalize_visit(v, item.multivisit);
        if id == root {
            break;
        }
        cur = node.parent();
    }
}

/// Reads the value and priors of every queried pick out of `computation`.
/// Picks that were not queried take the value of their vertex.
pub fn fetch_results(
    arena: &mut NodeArena,
    computation: &dyn NetworkComputation,
    minibatch: &mut [NodeToProcess],
) -> Result<(), SearchError> {
    let mut sample = 0;
    for item in minibatch.iter_mut().filter(|item| !item.is_collision) {
        if !item.nn_queried {
            item.v = arena.get(item.node).q();
            continue;
        }

        item.v = -computation.q_val(sample)?;

        if let Some(edges) = arena.get_mut(item.node).edges_mut() {
            let mut total = 0.0;
            for edge in edges.iter_mut() {
                edge.set_prior(computation.p_val(sample, edge.action().nn_index())?);
                total += edge.prior();
            }
            if total > 0.0 {
                let scale = 1.0 / total;
                for edge in edges.iter_mut() {
                    let p = edge.prior() * scale;
                    edge.set_prior(p);
                }
            }
        }
        sample += 1;
    }
    Ok(())
}

/// One search thread. Owns a scratch copy of the played history that is
/// extended to the position of each vertex it expands.
pub(crate) struct SearchWorker<P: Puzzle> {
    /// State shared with the coordinator and the other workers.
    search: Arc<SearchShared<P>>,
    /// Played history plus the path of the vertex being expanded.
    history: PositionHistory<P>,
    /// Picks of the current iteration, collisions included.
    minibatch: Vec<NodeToProcess>,
}

impl<P: Puzzle> SearchWorker<P> {
    pub(crate) fn new(search: Arc<SearchShared<P>>) -> Self {
        let history = search.played_history.clone();
        let capacity = search.params.minibatch_size();
        SearchWorker {
            search,
            history,
            minibatch: Vec::with_capacity(capacity),
        }
    }

    /// Runs iterations until the search stops. The first error ends the worker.
    pub(crate) fn run_blocking(mut self) -> Result<(), SearchError> {
        let mut iterations: u64 = 0;
        while self.search.is_search_active() {
            self.execute_one_iteration()?;
            iterations += 1;
        }
        debug!(iterations, "search worker finished");
        Ok(())
    }

    /// Gathers a minibatch, evaluates it with one network call and backs up
    /// every pick.
    pub(crate) fn execute_one_iteration(&mut self) -> Result<(), SearchError> {
        let mut computation = self.search.network.new_computation();
        self.minibatch.clear();

        self.gather_minibatch(computation.as_mut())?;

        if computation.batch_size() > 0 {
            computation.compute_blocking()?;
        }

        let mut arena = self.search.nodes.write();
        fetch_results(&mut arena, computation.as_ref(), &mut self.minibatch)?;
        for item in &self.minibatch {
            backup_node(&mut arena, self.search.root, item);
        }
        Ok(())
    }

    /// Picks until the batch is full, too many collisions happen in a row or
    /// the search is stopped.
    fn gather_minibatch(&mut self, computation: &mut dyn NetworkComputation) -> Result<(), SearchError> {
        let mut picked = 0;
        let mut collisions = 0;

        while picked < self.search.params.minibatch_size() {
            let (mut item, extendable) = {
                let mut arena = self.search.nodes.write();
                let item = pick_node_to_extend(&mut arena, self.search.root, &self.search.params);
                let node = arena.get(item.node);
                (item, !item.is_collision && !node.is_terminal() && !node.has_edges())
            };

            if item.is_collision {
                self.minibatch.push(item);
                collisions += 1;
                if collisions >= MAX_COLLISIONS {
                    break;
                }
                continue;
            }
            collisions = 0;
            picked += 1;

            if extendable && !self.extend_node(item.node)? {
                item.nn_queried = true;
                computation.add_input(encode_position_for_nn(&self.history, HISTORY_FILL))?;
            }
            self.minibatch.push(item);

            if self.search.stop.load(Ordering::Acquire) {
                break;
            }
        }
        Ok(())
    }

    /// Replays the path to `node` and either pins it to the game result or
    /// installs its legal actions. Returns true if the vertex became terminal.
    fn extend_node(&mut self, node: NodeId) -> Result<bool, SearchError> {
        self.history.trim(self.search.played_history.len());

        let actions = self
            .search
            .nodes
            .read()
            .path_actions(self.search.root, node)
            .ok_or(SearchError::DetachedNode)?;
        for action in actions {
            self.history.append(action)?;
        }

        let mut result = self.history.compute_game_result();
        let legal = match result {
            GameResult::Undecided => self.history.last().board().legal_actions(),
            _ => Vec::new(),
        };
        // A position without moves is lost whether or not the rules call it
        // a deadlock.
        if result == GameResult::Undecided && legal.is_empty() {
            result = GameResult::Lose;
        }

        let mut arena = self.search.nodes.write();
        if result == GameResult::Undecided {
            arena.expand(node, &legal);
            Ok(false)
        } else {
            arena.get_mut(node).make_terminal(result);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::network::Network;
    use crate::neural::uniform::UniformNetwork;
    use crate::neural::encoder::InputPlane;
    use crate::mcts::gc::NodeGarbageCollector;
    use crate::mcts::search::{Search, SearchLimits};
    use crate::mcts::tree::NodeTree;
    use crate::{Action, RulesError};
    use std::sync::mpsc;
    use std::time::Duration;

    /// A puzzle that has no moves yet never reports itself as deadlocked.
    #[derive(Debug, Clone, PartialEq)]
    struct NoMoves;

    impl Puzzle for NoMoves {
        const FEATURE_PLANES: usize = 1;

        fn legal_actions(&self) -> Vec<Action> {
            Vec::new()
        }

        fn apply(&mut self, action: Action) -> Result<(), RulesError> {
            Err(RulesError::IllegalAction(action))
        }

        fn is_success(&self) -> bool {
            false
        }

        fn is_deadlocked(&self) -> bool {
            false
        }

        fn write_feature_planes(&self, _planes: &mut [InputPlane]) {}
    }

    #[test]
    fn test_position_without_moves_is_a_terminal_loss() {
        let tree = NodeTree::new(NoMoves, Arc::new(NodeGarbageCollector::new()));
        let (tx, rx) = mpsc::channel();
        let search = Search::new(
            &tree,
            Arc::new(UniformNetwork::default()),
            tx,
            SearchLimits::movetime(Duration::from_millis(50)),
            SearchParams::default(),
        );
        search.run_blocking(2).unwrap();
        drop(search);

        let messages: Vec<_> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].best_move, None);

        let arena = tree.arena().read();
        let root = arena.get(tree.current_head());
        assert!(root.is_terminal());
        assert!(!root.has_edges());
        assert_eq!(root.q(), -1.0);
        assert!(root.n() > 1);
    }

    #[test]
    fn test_pick_stops_at_empty_edge_list() {
        let (mut arena, root) = root_with_children(&[]);
        let item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        assert_eq!(item, NodeToProcess::visit(root, 1));
        assert_eq!(arena.get(root).first_child(), None);
    }

    fn root_with_children(actions: &[Action]) -> (NodeArena, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        arena.expand(root, actions);
        let node = arena.get_mut(root);
        node.try_start_visit();
        node.finalize_visit(0.0, 1);
        (arena, root)
    }

    #[test]
    fn test_first_pick_visits_unexpanded_root() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        let params = SearchParams::default();

        let first = pick_node_to_extend(&mut arena, root, &params);
        assert_eq!(first, NodeToProcess::visit(root, 1));
        let second = pick_node_to_extend(&mut arena, root, &params);
        assert!(second.is_collision);
        assert_eq!(arena.get(root).n_in_flight(), 1);

        backup_node(&mut arena, root, &second);
        assert_eq!(arena.get(root).n_in_flight(), 1);
    }

    #[test]
    fn test_selection_prefers_highest_prior() {
        let (mut arena, root) = root_with_children(&[Action::Up, Action::Down, Action::Left]);
        let priors = [0.2, 0.5, 0.3];
        for (edge, p) in arena.get_mut(root).edges_mut().unwrap().iter_mut().zip(priors) {
            edge.set_prior(p);
        }
        let item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        assert!(!item.is_collision);
        assert_eq!(item.depth, 2);
        assert_eq!(arena.get(item.node).index(), 1);
    }

    #[test]
    fn test_selection_ties_pick_first_edge() {
        let (mut arena, root) = root_with_children(&[Action::Down, Action::Left]);
        let item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        assert_eq!(arena.get(item.node).index(), 0);
    }

    #[test]
    fn test_collision_cancels_ancestors() {
        let (mut arena, root) = root_with_children(&[Action::Down, Action::Left]);
        let params = SearchParams::default();
        let first = pick_node_to_extend(&mut arena, root, &params);
        let second = pick_node_to_extend(&mut arena, root, &params);
        assert!(!first.is_collision);
        assert!(second.is_collision);
        assert_eq!(second.node, first.node);
        assert_eq!(arena.get(root).n_in_flight(), 2);

        backup_node(&mut arena, root, &second);
        assert_eq!(arena.get(root).n_in_flight(), 1);
        assert_eq!(arena.get(first.node).n_in_flight(), 1);
    }

    #[test]
    fn test_visit_backup_reaches_root_without_negation() {
        let (mut arena, root) = root_with_children(&[Action::Down]);
        let mut item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        item.v = 0.5;
        backup_node(&mut arena, root, &item);

        assert_eq!(arena.get(item.node).n(), 1);
        assert!((arena.get(item.node).q() - 0.5).abs() < 1e-6);
        assert_eq!(arena.get(root).n(), 2);
        assert!((arena.get(root).q() - 0.25).abs() < 1e-6);
        assert_eq!(arena.get(root).n_in_flight(), 0);
    }

    #[test]
    fn test_terminal_value_replaces_leaf_value() {
        let (mut arena, root) = root_with_children(&[Action::Down]);
        let mut item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        arena.get_mut(item.node).make_terminal(GameResult::Win);
        item.v = -0.7;
        backup_node(&mut arena, root, &item);
        assert!((arena.get(item.node).q() - 1.0).abs() < 1e-6);
        assert!((arena.get(root).q() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fetch_negates_value_and_normalizes_priors() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        let mut item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        arena.expand(root, &[Action::Up, Action::Down]);
        item.nn_queried = true;

        let mut computation = UniformNetwork::new(0.3).new_computation();
        computation.add_input(vec![InputPlane::default()]).unwrap();
        computation.compute_blocking().unwrap();

        let mut batch = [item];
        fetch_results(&mut arena, computation.as_ref(), &mut batch).unwrap();
        assert!((batch[0].v + 0.3).abs() < 1e-6);
        for edge in arena.get(root).edges().unwrap().iter() {
            assert!((edge.prior() - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fetch_reads_terminal_value() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        let item = pick_node_to_extend(&mut arena, root, &SearchParams::default());
        arena.get_mut(root).make_terminal(GameResult::Lose);

        let computation = UniformNetwork::default().new_computation();
        let mut batch = [item];
        fetch_results(&mut arena, computation.as_ref(), &mut batch).unwrap();
        assert_eq!(batch[0].v, -1.0);
    }
}
