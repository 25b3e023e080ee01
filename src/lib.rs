//! # Network-Guided Parallel MCTS for Push Puzzles
//!
//! This crate searches move sequences for box-pushing puzzles with a
//! multi-threaded Monte Carlo Tree Search guided by a policy/value network.
//! The same search drives single-move decisions and self-play training data
//! generation.
//!
//! ## Architecture Overview
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌──────────────┐
//! │   Drivers    │──►│            Search            │──►│   Network    │
//! │ • engine     │   │ • watchdog + worker threads  │   │ • batching   │
//! │ • selfplay   │   │ • virtual loss / collisions  │   │ • value + p  │
//! └──────┬───────┘   └──────────────┬───────────────┘   └──────────────┘
//!        │                          │
//!        ▼                          ▼
//! ┌──────────────┐   ┌──────────────────────────────┐
//! │   NodeTree   │──►│   NodeArena (RwLock)  ──► GC │
//! │ • history    │   │ • edges, sibling chains      │
//! └──────────────┘   └──────────────────────────────┘
//! ```
//!
//! The rules of the puzzle are reached only through the [`Puzzle`] trait, so
//! the search never depends on how a board is represented.

pub mod action;
pub mod config;
pub mod engine;
pub mod mcts;
pub mod neural;
pub mod position;
pub mod selfplay;
pub mod soko;

pub use action::Action;
pub use position::{GameResult, Position, PositionHistory};

use neural::encoder::InputPlane;
use thiserror::Error;

/// Errors raised by a rules engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The action is not legal in the current position.
    #[error("Illegal action: {0}")]
    IllegalAction(Action),
    /// The text does not name an action.
    #[error("Bad action: {0}")]
    BadAction(String),
    /// The level description could not be parsed.
    #[error("Bad fen string: {0}")]
    BadFen(String),
}

/// The state of a puzzle. Must be cloneable to be replayed by search workers.
/// `Send` and `Sync` are required because positions are shared across threads.
pub trait Puzzle: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Number of feature planes written by [`Puzzle::write_feature_planes`].
    const FEATURE_PLANES: usize;

    /// Returns every legal action, in [`Action::ALL`] order.
    fn legal_actions(&self) -> Vec<Action>;
    /// Applies an action to the position, rejecting illegal ones.
    fn apply(&mut self, action: Action) -> Result<(), RulesError>;
    /// Returns true if the puzzle is solved.
    fn is_success(&self) -> bool;
    /// Returns true if the puzzle can no longer be solved from here.
    fn is_deadlocked(&self) -> bool;
    /// Writes exactly `FEATURE_PLANES` planes describing this position.
    fn write_feature_planes(&self, planes: &mut [InputPlane]);
}
