//! The game tree of one session together with the moves actually played.

use super::gc::NodeGarbageCollector;
use super::node::{NodeArena, NodeId};
use crate::position::PositionHistory;
use crate::{Action, Puzzle, RulesError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Owns the arena, the game-begin vertex, the current head and the history
/// leading to it. The history always has one position per ply from the game
/// begin to the head.
pub struct NodeTree<P: Puzzle> {
    arena: Arc<RwLock<NodeArena>>,
    game_begin: NodeId,
    current_head: NodeId,
    history: PositionHistory<P>,
    gc: Arc<NodeGarbageCollector>,
}

impl<P: Puzzle> NodeTree<P> {
    pub fn new(start: P, gc: Arc<NodeGarbageCollector>) -> Self {
        let mut arena = NodeArena::new();
        let game_begin = arena.alloc_root();
        NodeTree {
            arena: Arc::new(RwLock::new(arena)),
            game_begin,
            current_head: game_begin,
            history: PositionHistory::new(start),
            gc,
        }
    }

    /// The tree lock.
    pub fn arena(&self) -> &Arc<RwLock<NodeArena>> {
        &self.arena
    }

    pub fn game_begin(&self) -> NodeId {
        self.game_begin
    }

    pub fn current_head(&self) -> NodeId {
        self.current_head
    }

    pub fn history(&self) -> &PositionHistory<P> {
        &self.history
    }

    pub fn position(&self) -> &P {
        self.history.last().board()
    }

    /// Plays `action` from the head and moves the head to the child behind it.
    /// Siblings of the new head are handed to the collector.
    ///
    /// # Errors
    /// Returns [`RulesError::IllegalAction`] without moving the head if the
    /// action is not legal in the current position.
    pub fn advance(&mut self, action: Action) -> Result<(), RulesError> {
        self.history.append(action)?;

        let head = self.current_head;
        let mut detached = None;
        {
            let mut arena = self.arena.write();
            let edge = arena.get(head).edges().and_then(|e| e.position(action));
            self.current_head = match edge {
                Some(index) => {
                    let child = arena.get_or_spawn_child(head, index);
                    detached = arena.release_children_except(head, child);
                    child
                }
                None => {
                    detached = arena.take_children(head);
                    arena.reset_node(head);
                    arena.create_single_child(head, action)
                }
            };
        }
        if let Some(chain) = detached {
            self.gc.enqueue_subtree(Arc::clone(&self.arena), chain);
        }
        Ok(())
    }

    /// Throws away everything below the head and clears its statistics.
    pub fn detach_at_head(&mut self) {
        let detached = {
            let mut arena = self.arena.write();
            let chain = arena.take_children(self.current_head);
            arena.reset_node(self.current_head);
            chain
        };
        if let Some(chain) = detached {
            self.gc.enqueue_subtree(Arc::clone(&self.arena), chain);
        }
    }

    /// Starts a fresh tree at `start` and plays `actions` from it.
    ///
    /// # Errors
    /// Stops at the first illegal action and returns it; the head is left at
    /// the last legal position.
    pub fn reset_to_position(&mut self, start: P, actions: &[Action]) -> Result<(), RulesError> {
        let mut arena = NodeArena::new();
        let game_begin = arena.alloc_root();
        let old = std::mem::replace(&mut self.arena, Arc::new(RwLock::new(arena)));
        self.gc.enqueue_arena(old);

        self.game_begin = game_begin;
        self.current_head = game_begin;
        self.history.reset(start);
        debug!(moves = actions.len(), "tree reset");

        for &action in actions {
            self.advance(action)?;
        }
        Ok(())
    }
}

impl<P: Puzzle> Drop for NodeTree<P> {
    fn drop(&mut self) {
        self.gc.enqueue_arena(std::mem::take(&mut self.arena));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soko::SokoBoard;

    fn tree() -> NodeTree<SokoBoard> {
        NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()))
    }

    #[test]
    fn test_advance_without_edges_creates_single_child() {
        let mut tree = tree();
        tree.advance(Action::Up).unwrap();
        let arena = tree.arena().read();
        assert_eq!(arena.get(tree.game_begin()).num_edges(), 1);
        assert_eq!(arena.get(tree.current_head()).parent(), Some(tree.game_begin()));
        assert_eq!(tree.history().len(), 2);
    }

    #[test]
    fn test_advance_reuses_expanded_edge() {
        let mut tree = tree();
        tree.advance(Action::Up).unwrap();
        let head = tree.current_head();
        tree.arena()
            .write()
            .expand(head, &[Action::Down, Action::Left, Action::Right]);

        tree.advance(Action::Left).unwrap();
        let arena = tree.arena().read();
        assert_eq!(arena.get(tree.current_head()).index(), 1);
        assert_eq!(arena.get(head).num_edges(), 3);
    }

    #[test]
    fn test_advance_releases_siblings() {
        let gc = Arc::new(NodeGarbageCollector::new());
        let mut tree = NodeTree::new(SokoBoard::startpos(), Arc::clone(&gc));
        let head = tree.current_head();
        {
            let mut arena = tree.arena().write();
            arena.expand(head, &[Action::Up]);
            arena.get_or_spawn_child(head, 0);
        }
        tree.advance(Action::Up).unwrap();
        let up = tree.current_head();
        {
            let mut arena = tree.arena().write();
            arena.expand(up, &[Action::Down, Action::Left, Action::Right]);
            for i in 0..3 {
                arena.get_or_spawn_child(up, i);
            }
        }
        tree.advance(Action::Right).unwrap();
        gc.shutdown();

        let arena = tree.arena().read();
        assert_eq!(arena.children(up).collect::<Vec<_>>(), vec![tree.current_head()]);
        assert_eq!(arena.live(), 3);
        assert_eq!(gc.freed(), 2);
    }

    #[test]
    fn test_illegal_advance_keeps_head() {
        let mut tree = tree();
        let head = tree.current_head();
        assert_eq!(tree.advance(Action::Down), Err(RulesError::IllegalAction(Action::Down)));
        assert_eq!(tree.current_head(), head);
        assert_eq!(tree.history().len(), 1);
    }

    #[test]
    fn test_detach_at_head_clears_subtree() {
        let mut tree = tree();
        let head = tree.current_head();
        {
            let mut arena = tree.arena().write();
            arena.expand(head, &[Action::Up]);
            arena.get_or_spawn_child(head, 0);
            arena.get_mut(head).try_start_visit();
            arena.get_mut(head).finalize_visit(0.3, 1);
        }
        tree.detach_at_head();
        let arena = tree.arena().read();
        assert_eq!(arena.get(head).n(), 0);
        assert!(!arena.get(head).has_edges());
        assert_eq!(arena.get(head).first_child(), None);
    }

    #[test]
    fn test_reset_to_position_replays_moves() {
        let mut tree = tree();
        tree.advance(Action::Up).unwrap();
        let old = Arc::clone(tree.arena());

        tree.reset_to_position(SokoBoard::startpos(), &[Action::Up, Action::Left])
            .unwrap();
        assert!(!Arc::ptr_eq(&old, tree.arena()));
        assert_eq!(tree.history().len(), 3);

        let mut expected = SokoBoard::startpos();
        expected.apply(Action::Up).unwrap();
        expected.apply(Action::Left).unwrap();
        assert_eq!(tree.position(), &expected);
    }

    #[test]
    fn test_reset_reports_illegal_move() {
        let mut tree = tree();
        let result = tree.reset_to_position(SokoBoard::startpos(), &[Action::Up, Action::Up]);
        assert_eq!(result, Err(RulesError::IllegalAction(Action::Up)));
        assert_eq!(tree.history().len(), 2);
    }
}
