//! # Box-Pushing Rules
//!
//! The concrete [`Puzzle`](crate::Puzzle) implementation driven by the search:
//! a grid of walls, targets and boxes with one player who walks and pushes.
//!
//! ```text
//!   #####        # wall      $ box
//!   #@$.#        . target    * box on target
//!   #####        @ player    + player on target
//! ```

pub mod bitboard;
pub mod board;

pub use bitboard::{BitBoard, BoardSquare, BOARD_SIZE, BOARD_SQUARES};
pub use board::{SokoBoard, STARTPOS_FEN};
