//! # Position History
//!
//! A linear record of the positions reached since the start of the game,
//! each tagged with how many times it has been seen before. The search keeps
//! one history for the moves actually played and a scratch copy per worker
//! for replaying paths inside the tree.

use crate::{Action, Puzzle, RulesError};

/// A position that has been reached this many times before counts as a lost
/// line, both during expansion and when a driver decides whether a game is over.
pub const REPETITION_LOSS_THRESHOLD: u32 = 1;

/// Outcome of a puzzle line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    Undecided,
    Win,
    Lose,
}

impl GameResult {
    /// Value of the result from the solver's point of view.
    pub fn value(self) -> f32 {
        match self {
            GameResult::Win => 1.0,
            GameResult::Lose => -1.0,
            GameResult::Undecided => 0.0,
        }
    }

    /// Signed outcome stored in training records.
    pub fn as_i8(self) -> i8 {
        match self {
            GameResult::Win => 1,
            GameResult::Lose => -1,
            GameResult::Undecided => 0,
        }
    }
}

/// A board plus the number of earlier occurrences of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Position<P> {
    board: P,
    repetitions: u32,
}

impl<P: Puzzle> Position<P> {
    pub fn new(board: P) -> Self {
        Position {
            board,
            repetitions: 0,
        }
    }

    pub fn board(&self) -> &P {
        &self.board
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }
}

/// The sequence of positions of one game. Never empty.
#[derive(Debug, Clone)]
pub struct PositionHistory<P> {
    positions: Vec<Position<P>>,
}

impl<P: Puzzle> PositionHistory<P> {
    pub fn new(start: P) -> Self {
        PositionHistory {
            positions: vec![Position::new(start)],
        }
    }

    /// Forgets everything and starts again from `start`.
    pub fn reset(&mut self, start: P) {
        self.positions.clear();
        self.positions.push(Position::new(start));
    }

    pub fn last(&self) -> &Position<P> {
        // Never empty: construction pushes one and trim keeps at least one.
        &self.positions[self.positions.len() - 1]
    }

    pub fn starting(&self) -> &Position<P> {
        &self.positions[0]
    }

    pub fn position_at(&self, index: usize) -> &Position<P> {
        &self.positions[index]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Drops every position after the first `len`.
    ///
    /// # Panics
    /// Panics if `len` is zero.
    pub fn trim(&mut self, len: usize) {
        assert!(len >= 1, "a position history cannot be trimmed to nothing");
        self.positions.truncate(len);
    }

    /// Applies `action` to the last position and records the result.
    ///
    /// Illegal actions leave the history untouched.
    pub fn append(&mut self, action: Action) -> Result<(), RulesError> {
        let mut board = self.last().board.clone();
        board.apply(action)?;
        let repetitions = self.repetitions_of(&board);
        self.positions.push(Position { board, repetitions });
        Ok(())
    }

    fn repetitions_of(&self, board: &P) -> u32 {
        self.positions
            .iter()
            .rev()
            .find(|p| p.board == *board)
            .map_or(0, |p| p.repetitions + 1)
    }

    pub fn repetitions_of_last(&self) -> u32 {
        self.last().repetitions
    }

    pub fn compute_game_result(&self) -> GameResult {
        let last = self.last();
        if last.board.is_success() {
            GameResult::Win
        } else if last.board.is_deadlocked() {
            GameResult::Lose
        } else if last.repetitions >= REPETITION_LOSS_THRESHOLD {
            GameResult::Lose
        } else {
            GameResult::Undecided
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Position<P>> {
        self.positions.iter()
    }
}
