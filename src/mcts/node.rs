//! # Search Tree Storage
//!
//! Every vertex of a tree lives in one [`NodeArena`] and is addressed by a
//! [`NodeId`]. A vertex knows its legal actions as an [`EdgeList`], but child
//! vertices are only materialized when the search first walks into them. The
//! materialized children of a vertex form a singly linked sibling chain kept
//! sorted by edge index:
//!
//! ```text
//!   parent ── edges: [up, down, left, right]
//!     │
//!     └─ first_child ──► (index 1) ──► (index 3) ──► None
//! ```
//!
//! The arena is guarded by the tree lock; anything that links, unlinks or
//! updates statistics needs `&mut NodeArena`.

use crate::{Action, GameResult};

/// Handle of a vertex inside a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An action out of a vertex together with its prior probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    action: Action,
    prior: f32,
}

impl Edge {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn prior(&self) -> f32 {
        self.prior
    }

    /// Stores `p` clamped into [0, 1].
    pub fn set_prior(&mut self, p: f32) {
        self.prior = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    }
}

/// The edges of one vertex. Its length never changes after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeList(Box<[Edge]>);

impl EdgeList {
    pub fn from_actions(actions: &[Action]) -> Self {
        EdgeList(
            actions
                .iter()
                .map(|&action| Edge { action, prior: 0.0 })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Edge> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Edge> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Edge> {
        self.0.iter_mut()
    }

    pub fn position(&self, action: Action) -> Option<usize> {
        self.0.iter().position(|e| e.action == action)
    }
}

/// A vertex of the search tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// `None` for the root.
    parent: Option<NodeId>,
    /// Legal actions with their priors; `None` until the vertex is expanded.
    edges: Option<EdgeList>,
    /// Head of the materialized children, linked through `next_sibling`.
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    /// Position of the edge leading here in the parent's edge list.
    index: u16,
    /// Mean value of the completed visits, from the puzzle's point of view.
    q: f32,
    n: u32,
    /// Visits claimed by pickers that are not backed up yet.
    n_in_flight: u32,
    /// The outcome is fixed and `q` no longer changes.
    terminal: bool,
}

impl Node {
    fn new(parent: Option<NodeId>, index: u16) -> Self {
        Node {
            parent,
            edges: None,
            first_child: None,
            next_sibling: None,
            index,
            q: 0.0,
            n: 0,
            n_in_flight: 0,
            terminal: false,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Position of this vertex among its parent's edges.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    /// Completed visits.
    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn n_in_flight(&self) -> u32 {
        self.n_in_flight
    }

    /// Completed plus in-flight visits.
    pub fn n_started(&self) -> u32 {
        self.n + self.n_in_flight
    }

    /// Visits that went past this vertex into a child.
    pub fn children_visits(&self) -> u32 {
        self.n.saturating_sub(1)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// True once the edge list has been installed.
    pub fn has_edges(&self) -> bool {
        self.edges.is_some()
    }

    pub fn edges(&self) -> Option<&EdgeList> {
        self.edges.as_ref()
    }

    pub fn edges_mut(&mut self) -> Option<&mut EdgeList> {
        self.edges.as_mut()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.as_ref().map_or(0, EdgeList::len)
    }

    /// Claims an in-flight visit. A vertex that has never been evaluated and
    /// is already being evaluated by someone else refuses the claim.
    pub fn try_start_visit(&mut self) -> bool {
        if self.n == 0 && self.n_in_flight > 0 {
            return false;
        }
        self.n_in_flight += 1;
        true
    }

    pub fn cancel_visit(&mut self, multivisit: u32) {
        debug_assert!(self.n_in_flight >= multivisit);
        self.n_in_flight -= multivisit;
    }

    /// Folds `multivisit` visits of value `v` into the running mean.
    pub fn finalize_visit(&mut self, v: f32, multivisit: u32) {
        debug_assert!(self.n_in_flight >= multivisit);
        let k = multivisit as f32;
        self.q += k * (v - self.q) / (self.n as f32 + k);
        self.n += multivisit;
        self.n_in_flight -= multivisit;
    }

    /// Pins the value of this vertex to the game result.
    pub fn make_terminal(&mut self, result: GameResult) {
        self.terminal = true;
        self.q = result.value();
    }

    fn reset_in_place(&mut self) {
        let parent = self.parent;
        let index = self.index;
        let next_sibling = self.next_sibling;
        *self = Node::new(parent, index);
        self.next_sibling = next_sibling;
    }
}

/// One edge of a vertex and, if it has been materialized, the child behind it.
#[derive(Debug, Clone, Copy)]
pub struct EdgeAndNode<'a> {
    index: usize,
    edge: &'a Edge,
    node: Option<(NodeId, &'a Node)>,
}

impl<'a> EdgeAndNode<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn edge(&self) -> &'a Edge {
        self.edge
    }

    pub fn action(&self) -> Action {
        self.edge.action
    }

    pub fn prior(&self) -> f32 {
        self.edge.prior
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node.map(|(id, _)| id)
    }

    pub fn node(&self) -> Option<&'a Node> {
        self.node.map(|(_, n)| n)
    }

    /// Child value, or `default` when the child has no completed visits.
    pub fn q(&self, default: f32) -> f32 {
        match self.node {
            Some((_, n)) if n.n > 0 => n.q,
            _ => default,
        }
    }

    pub fn n(&self) -> u32 {
        self.node.map_or(0, |(_, n)| n.n)
    }

    pub fn n_started(&self) -> u32 {
        self.node.map_or(0, |(_, n)| n.n_started())
    }

    /// Exploration term for a parent-side `numerator` of `cpuct * sqrt(visits)`.
    pub fn u(&self, numerator: f32) -> f32 {
        numerator * self.prior() / (1 + self.n_started()) as f32
    }
}

/// Walks the edges of a vertex in lock-step with its sibling chain.
pub struct Edges<'a> {
    arena: &'a NodeArena,
    edges: &'a [Edge],
    index: usize,
    next_child: Option<NodeId>,
}

impl<'a> Iterator for Edges<'a> {
    type Item = EdgeAndNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let edge = self.edges.get(self.index)?;
        let mut node = None;
        if let Some(id) = self.next_child {
            let child = self.arena.get(id);
            if child.index() == self.index {
                node = Some((id, child));
                self.next_child = child.next_sibling;
            }
        }
        let item = EdgeAndNode {
            index: self.index,
            edge,
            node,
        };
        self.index += 1;
        Some(item)
    }
}

/// Storage for every vertex of one tree.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a vertex with no parent.
    pub fn alloc_root(&mut self) -> NodeId {
        self.alloc(None, 0)
    }

    fn alloc(&mut self, parent: Option<NodeId>, index: u16) -> NodeId {
        self.live += 1;
        let node = Node::new(parent, index);
        if let Some(id) = self.free.pop() {
            self.nodes[id.index()] = node;
            id
        } else {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(node);
            id
        }
    }

    /// Number of vertices currently allocated.
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Installs the edge list of `id` without materializing any child.
    ///
    /// # Panics
    /// Panics if the vertex already has edges.
    pub fn expand(&mut self, id: NodeId, actions: &[Action]) {
        let node = self.get_mut(id);
        assert!(node.edges.is_none(), "vertex expanded twice");
        node.edges = Some(EdgeList::from_actions(actions));
    }

    /// Gives a bare vertex a single edge for `action` and materializes its child.
    ///
    /// # Panics
    /// Panics if the vertex already has edges or children.
    pub fn create_single_child(&mut self, id: NodeId, action: Action) -> NodeId {
        {
            let node = self.get(id);
            assert!(
                node.edges.is_none() && node.first_child.is_none(),
                "single child requested on an expanded vertex"
            );
        }
        self.expand(id, &[action]);
        self.get_or_spawn_child(id, 0)
    }

    /// The materialized child at edge `index`, if any.
    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.children(parent).find(|&c| self.get(c).index() == index)
    }

    /// Returns the child at edge `index`, materializing it in sorted position
    /// if needed.
    ///
    /// # Panics
    /// Panics if `index` is not below the number of edges of `parent`.
    pub fn get_or_spawn_child(&mut self, parent: NodeId, index: usize) -> NodeId {
        let num_edges = self.get(parent).num_edges();
        assert!(index < num_edges, "child {index} past {num_edges} edges");

        let mut prev = None;
        let mut cur = self.get(parent).first_child;
        while let Some(c) = cur {
            let ci = self.get(c).index();
            if ci == index {
                return c;
            }
            if ci > index {
                break;
            }
            prev = Some(c);
            cur = self.get(c).next_sibling;
        }

        let child = self.alloc(Some(parent), index as u16);
        self.get_mut(child).next_sibling = cur;
        match prev {
            Some(p) => self.get_mut(p).next_sibling = Some(child),
            None => self.get_mut(parent).first_child = Some(child),
        }
        child
    }

    /// Materialized children of `parent`, in edge order.
    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.get(parent).first_child, move |&c| {
            self.get(c).next_sibling
        })
    }

    /// Edges of `id` paired with their materialized children. Empty when the
    /// vertex has no edges.
    pub fn edges(&self, id: NodeId) -> Edges<'_> {
        let node = self.get(id);
        let edges: &[Edge] = match &node.edges {
            Some(list) => &list.0,
            None => &[],
        };
        Edges {
            arena: self,
            edges,
            index: 0,
            next_child: node.first_child,
        }
    }

    /// The parent's edge leading into `id`.
    pub fn edge_to(&self, id: NodeId) -> Option<&Edge> {
        let node = self.get(id);
        let parent = self.get(node.parent?);
        parent.edges.as_ref()?.get(node.index())
    }

    /// Actions on the path from `root` down to `node`, in playing order.
    /// `None` if `root` is not an ancestor of `node` or an edge is missing.
    pub fn path_actions(&self, root: NodeId, node: NodeId) -> Option<Vec<Action>> {
        let mut actions = Vec::new();
        let mut cur = node;
        while cur != root {
            actions.push(self.edge_to(cur)?.action);
            cur = self.get(cur).parent?;
        }
        actions.reverse();
        Some(actions)
    }

    /// Unlinks the child chain of `id` and returns its head. The chain is not
    /// reachable from the tree afterwards.
    pub fn take_children(&mut self, id: NodeId) -> Option<NodeId> {
        self.get_mut(id).first_child.take()
    }

    /// Unlinks every child of `parent` except `keep` and returns the head of
    /// the unlinked ones, chained through their sibling links. `keep` ends up
    /// as the only child.
    pub fn release_children_except(&mut self, parent: NodeId, keep: NodeId) -> Option<NodeId> {
        let mut head = None;
        let mut tail: Option<NodeId> = None;
        let mut cur = self.get_mut(parent).first_child.take();
        while let Some(c) = cur {
            cur = self.get_mut(c).next_sibling.take();
            if c == keep {
                continue;
            }
            match tail {
                Some(t) => self.get_mut(t).next_sibling = Some(c),
                None => head = Some(c),
            }
            tail = Some(c);
        }
        debug_assert_eq!(self.get(keep).parent, Some(parent));
        self.get_mut(parent).first_child = Some(keep);
        head
    }

    /// Clears the statistics and edges of `id` while keeping it linked in its
    /// parent's sibling chain. Children must have been taken first.
    pub fn reset_node(&mut self, id: NodeId) {
        debug_assert!(self.get(id).first_child.is_none());
        self.get_mut(id).reset_in_place();
    }

    /// Frees up to `budget` vertices of detached subtrees. `pending` holds the
    /// roots still to visit, along with their following siblings, and is
    /// updated in place so the walk can resume later.
    ///
    /// Returns the number of vertices freed.
    pub fn free_detached(&mut self, pending: &mut Vec<NodeId>, budget: usize) -> usize {
        let mut freed = 0;
        while freed < budget {
            let Some(id) = pending.pop() else { break };
            let node = &mut self.nodes[id.index()];
            if let Some(sibling) = node.next_sibling.take() {
                pending.push(sibling);
            }
            if let Some(child) = node.first_child.take() {
                pending.push(child);
            }
            node.edges = None;
            node.parent = None;
            self.free.push(id);
            self.live -= 1;
            freed += 1;
        }
        freed
    }
}
