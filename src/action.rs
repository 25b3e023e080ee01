//! # Actions
//!
//! A puzzle move is one step of the player in one of four directions. The
//! discriminant doubles as the network output slot, so the order of
//! [`Action::ALL`] is part of the network contract.

use crate::RulesError;
use std::fmt;
use std::str::FromStr;

/// One step of the player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Action {
    /// Number of distinct actions, and the width of the policy head.
    pub const COUNT: usize = 4;

    /// All actions in network output order.
    pub const ALL: [Action; Action::COUNT] = [Action::Up, Action::Down, Action::Left, Action::Right];

    /// Index of this action in the network policy output.
    #[inline]
    pub fn nn_index(self) -> usize {
        self as usize
    }

    /// Inverse of [`Action::nn_index`].
    pub fn from_nn_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    /// Row and column offsets of one step, with row 0 at the top of the level.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Action::Up => (-1, 0),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::Right => (0, 1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Up => "up",
            Action::Down => "down",
            Action::Left => "left",
            Action::Right => "right",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RulesError;

    /// Accepts the full word or its first letter, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "u" => Ok(Action::Up),
            "down" | "d" => Ok(Action::Down),
            "left" | "l" => Ok(Action::Left),
            "right" | "r" => Ok(Action::Right),
            _ => Err(RulesError::BadAction(s.to_string())),
        }
    }
}

/// Parses a whitespace-separated list of actions.
pub fn parse_actions(text: &str) -> Result<Vec<Action>, RulesError> {
    text.split_whitespace().map(str::parse).collect()
}
