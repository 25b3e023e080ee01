//! # Parallel Tree Search
//!
//! - [`node`]: arena storage of vertices, edges and sibling chains
//! - [`tree`]: the played line and the tree hanging off it
//! - [`gc`]: background reclamation of detached subtrees
//! - [`params`]: validated tunables
//! - [`search`]: the coordinator, its watchdog and result delivery
//! - [`worker`]: the select, expand, evaluate and backup loop

pub mod gc;
pub mod node;
pub mod params;
pub mod search;
pub mod tree;
pub mod worker;

pub use gc::NodeGarbageCollector;
pub use node::{Edge, EdgeAndNode, EdgeList, Node, NodeArena, NodeId};
pub use params::SearchParams;
pub use search::{BestMoveInfo, EdgeStats, Search, SearchError, SearchLimits};
pub use tree::NodeTree;
