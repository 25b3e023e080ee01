//! Encodes the recent history of a game into network input planes.
//!
//! ```text
//! slot 0 (last position)   [features of P ...][repetition]
//! slot 1                   [features of P ...][repetition]
//!  ...                     (empty before the start of the game)
//! slot 7                   [features of P ...][repetition]
//! aux                      [all ones]
//! ```

use crate::position::PositionHistory;
use crate::soko::BitBoard;
use crate::Puzzle;

/// Number of past positions fed to the network.
pub const MOVE_HISTORY: usize = 8;

/// One 20×20 input plane: every set square carries `value`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputPlane {
    pub mask: BitBoard,
    pub value: f32,
}

impl Default for InputPlane {
    fn default() -> Self {
        InputPlane {
            mask: BitBoard::new(),
            value: 1.0,
        }
    }
}

impl InputPlane {
    pub fn set_all(&mut self) {
        self.mask = BitBoard::full();
    }
}

pub type InputPlanes = Vec<InputPlane>;

/// Planes used by one history slot of `P`.
pub const fn planes_per_board<P: Puzzle>() -> usize {
    P::FEATURE_PLANES + 1
}

/// Total planes of an encoded history window of `P`.
pub const fn total_planes<P: Puzzle>() -> usize {
    planes_per_board::<P>() * MOVE_HISTORY + 1
}

/// Encodes up to `history_planes` (capped at [`MOVE_HISTORY`]) of the latest
/// positions, newest first.
pub fn encode_position_for_nn<P: Puzzle>(
    history: &PositionHistory<P>,
    history_planes: usize,
) -> InputPlanes {
    let per_board = planes_per_board::<P>();
    let aux_base = per_board * MOVE_HISTORY;
    let mut planes = vec![InputPlane::default(); aux_base + 1];
    planes[aux_base].set_all();

    for (slot, position) in history
        .iter()
        .rev()
        .take(history_planes.min(MOVE_HISTORY))
        .enumerate()
    {
        let base = slot * per_board;
        position
            .board()
            .write_feature_planes(&mut planes[base..base + P::FEATURE_PLANES]);
        if position.repetitions() >= 1 {
            planes[base + P::FEATURE_PLANES].set_all();
        }
    }

    planes
}
