//! # Sokoban Board
//!
//! Walls, targets and boxes are kept as [`BitBoard`]s and the player as a
//! single [`BoardSquare`]. Levels are read from their usual text form, one
//! line per row with row 0 at the top:
//!
//! | char | meaning |
//! |------|---------|
//! | `#` | wall |
//! | `.` | target |
//! | `$` | box |
//! | `*` | box on a target |
//! | `@` | player |
//! | `+`, `o` | player on a target |
//! | space, `-`, `_` | floor |
//!
//! Squares beyond the edge of the 20×20 grid behave like walls.

use super::bitboard::{BitBoard, BoardSquare, BOARD_SIZE};
use crate::neural::encoder::InputPlane;
use crate::{Action, Puzzle, RulesError};
use std::fmt;
use std::str::FromStr;

/// The level every engine starts from unless told otherwise.
pub const STARTPOS_FEN: &str = "    #####\n\
    \x20   #   #\n\
    \x20   #$  #\n\
    \x20 ###  $##\n\
    \x20 #  $ $ #\n\
    ### # ## #   ######\n\
    #   # ## #####  ..#\n\
    # $  $          ..#\n\
    ##### ### #@##  ..#\n\
    \x20   #     #########\n\
    \x20   #######\n";

/// A box-pushing level and the player's place in it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SokoBoard {
    walls: BitBoard,
    targets: BitBoard,
    boxes: BitBoard,
    player: BoardSquare,
    rows: usize,
    cols: usize,
}

impl SokoBoard {
    /// Parses a level from its text form.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let bad = || RulesError::BadFen(fen.to_string());

        let mut walls = BitBoard::new();
        let mut targets = BitBoard::new();
        let mut boxes = BitBoard::new();
        let mut player = None;
        let mut rows = 0;
        let mut cols = 0;

        for (row, line) in fen.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if row >= BOARD_SIZE {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(bad());
            }
            for (col, c) in line.chars().enumerate() {
                if col >= BOARD_SIZE {
                    return Err(bad());
                }
                let sq = BoardSquare::new(row, col);
                match c {
                    '#' => walls.set(sq),
                    '.' => targets.set(sq),
                    '$' => boxes.set(sq),
                    '*' => {
                        boxes.set(sq);
                        targets.set(sq);
                    }
                    '@' | '+' | 'o' => {
                        if player.replace(sq).is_some() {
                            return Err(bad());
                        }
                        if c != '@' {
                            targets.set(sq);
                        }
                    }
                    ' ' | '-' | '_' => {}
                    _ => return Err(bad()),
                }
                cols = cols.max(col + 1);
            }
            if !line.trim().is_empty() {
                rows = row + 1;
            }
        }

        let player = player.ok_or_else(bad)?;
        Ok(SokoBoard {
            walls,
            targets,
            boxes,
            player,
            rows,
            cols,
        })
    }

    /// The built-in start level.
    pub fn startpos() -> Self {
        // The constant is covered by tests.
        match Self::from_fen(STARTPOS_FEN) {
            Ok(board) => board,
            Err(e) => unreachable!("start position must parse: {e}"),
        }
    }

    pub fn walls(&self) -> &BitBoard {
        &self.walls
    }

    pub fn targets(&self) -> &BitBoard {
        &self.targets
    }

    pub fn boxes(&self) -> &BitBoard {
        &self.boxes
    }

    pub fn player(&self) -> BoardSquare {
        self.player
    }

    /// True for walls and for everything off the grid.
    fn blocked(&self, from: BoardSquare, action: Action) -> bool {
        match from.step(action) {
            Some(sq) => self.walls.get(sq),
            None => true,
        }
    }

    fn can_move(&self, action: Action) -> bool {
        let next = match self.player.step(action) {
            Some(sq) => sq,
            None => return false,
        };
        if self.walls.get(next) {
            return false;
        }
        if !self.boxes.get(next) {
            return true;
        }
        match next.step(action) {
            Some(beyond) => !self.walls.get(beyond) && !self.boxes.get(beyond),
            None => false,
        }
    }

    fn is_cornered(&self, sq: BoardSquare) -> bool {
        let vertical = self.blocked(sq, Action::Up) || self.blocked(sq, Action::Down);
        let horizontal = self.blocked(sq, Action::Left) || self.blocked(sq, Action::Right);
        vertical && horizontal
    }

    /// Two neighbouring boxes held against the same wall can never be moved
    /// apart along it, and neither can leave it.
    fn is_frozen_pair(&self, a: BoardSquare, b: BoardSquare, sides: [Action; 2]) -> bool {
        if self.targets.get(a) && self.targets.get(b) {
            return false;
        }
        sides
            .iter()
            .any(|side| self.blocked(a, *side) && self.blocked(b, *side))
    }
}

impl Puzzle for SokoBoard {
    const FEATURE_PLANES: usize = 4;

    fn legal_actions(&self) -> Vec<Action> {
        Action::ALL
            .iter()
            .copied()
            .filter(|a| self.can_move(*a))
            .collect()
    }

    fn apply(&mut self, action: Action) -> Result<(), RulesError> {
        if !self.can_move(action) {
            return Err(RulesError::IllegalAction(action));
        }
        let next = self
            .player
            .step(action)
            .ok_or(RulesError::IllegalAction(action))?;
        if self.boxes.get(next) {
            let beyond = next.step(action).ok_or(RulesError::IllegalAction(action))?;
            self.boxes.reset(next);
            self.boxes.set(beyond);
        }
        self.player = next;
        Ok(())
    }

    fn is_success(&self) -> bool {
        self.boxes.difference(&self.targets).is_empty()
    }

    fn is_deadlocked(&self) -> bool {
        if self.legal_actions().is_empty() {
            return true;
        }
        for sq in self.boxes.iter() {
            if !self.targets.get(sq) && self.is_cornered(sq) {
                return true;
            }
            if let Some(right) = sq.step(Action::Right) {
                if self.boxes.get(right) && self.is_frozen_pair(sq, right, [Action::Up, Action::Down]) {
                    return true;
                }
            }
            if let Some(below) = sq.step(Action::Down) {
                if self.boxes.get(below) && self.is_frozen_pair(sq, below, [Action::Left, Action::Right]) {
                    return true;
                }
            }
        }
        false
    }

    fn write_feature_planes(&self, planes: &mut [InputPlane]) {
        planes[0].mask = self.walls;
        planes[1].mask = self.targets;
        planes[2].mask = self.boxes;
        let mut player = BitBoard::new();
        player.set(self.player);
        planes[3].mask = player;
    }
}

impl FromStr for SokoBoard {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SokoBoard::from_fen(s)
    }
}

impl fmt::Display for SokoBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            let mut line = String::with_capacity(self.cols);
            for col in 0..self.cols {
                let sq = BoardSquare::new(row, col);
                let target = self.targets.get(sq);
                let c = if self.walls.get(sq) {
                    '#'
                } else if self.player == sq {
                    if target {
                        '+'
                    } else {
                        '@'
                    }
                } else if self.boxes.get(sq) {
                    if target {
                        '*'
                    } else {
                        '$'
                    }
                } else if target {
                    '.'
                } else {
                    ' '
                };
                line.push(c);
            }
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

impl fmt::Debug for SokoBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SokoBoard {{\n{}}}", self)
    }
}
