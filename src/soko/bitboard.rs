//! Square indexing and 400-bit boards for the 20×20 puzzle grid.

use crate::Action;

/// Width and height of the grid.
pub const BOARD_SIZE: usize = 20;
/// Number of squares on the grid.
pub const BOARD_SQUARES: usize = BOARD_SIZE * BOARD_SIZE;

const WORDS: usize = (BOARD_SQUARES + 63) / 64;

/// A square on the grid, stored as `row * 20 + col`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BoardSquare(u16);

impl BoardSquare {
    pub fn new(row: usize, col: usize) -> Self {
        debug_assert!(row < BOARD_SIZE && col < BOARD_SIZE);
        BoardSquare((row * BOARD_SIZE + col) as u16)
    }

    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < BOARD_SQUARES);
        BoardSquare(index as u16)
    }

    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn row(self) -> usize {
        self.as_index() / BOARD_SIZE
    }

    #[inline]
    pub fn col(self) -> usize {
        self.as_index() % BOARD_SIZE
    }

    /// The neighbouring square in the direction of `action`, if it is on the grid.
    pub fn step(self, action: Action) -> Option<BoardSquare> {
        let (dr, dc) = action.delta();
        let row = self.row() as i32 + dr;
        let col = self.col() as i32 + dc;
        let size = BOARD_SIZE as i32;
        if (0..size).contains(&row) && (0..size).contains(&col) {
            Some(BoardSquare::new(row as usize, col as usize))
        } else {
            None
        }
    }
}

/// One bit per square.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BitBoard([u64; WORDS]);

impl BitBoard {
    /// Number of 64-bit words backing a board.
    pub const WORDS: usize = WORDS;

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a board from raw words, dropping bits past the last square.
    pub fn from_words(words: [u64; WORDS]) -> Self {
        let mut board = BitBoard(words);
        let full = BitBoard::full();
        for (w, f) in board.0.iter_mut().zip(full.0.iter()) {
            *w &= f;
        }
        board
    }

    /// A board with every square set.
    pub fn full() -> Self {
        let mut board = BitBoard([u64::MAX; WORDS]);
        let spare = WORDS * 64 - BOARD_SQUARES;
        board.0[WORDS - 1] >>= spare;
        board
    }

    pub fn clear(&mut self) {
        self.0 = [0; WORDS];
    }

    pub fn set(&mut self, square: BoardSquare) {
        let i = square.as_index();
        self.0[i / 64] |= 1 << (i % 64);
    }

    pub fn reset(&mut self, square: BoardSquare) {
        let i = square.as_index();
        self.0[i / 64] &= !(1 << (i % 64));
    }

    pub fn get(&self, square: BoardSquare) -> bool {
        let i = square.as_index();
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    pub fn intersects(&self, other: &BitBoard) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    /// Squares set here but not in `other`.
    pub fn difference(&self, other: &BitBoard) -> BitBoard {
        let mut out = *self;
        for (w, o) in out.0.iter_mut().zip(other.0.iter()) {
            *w &= !o;
        }
        out
    }

    /// The raw words, least significant square first.
    pub fn words(&self) -> &[u64] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = BoardSquare> + '_ {
        (0..BOARD_SQUARES)
            .map(BoardSquare::from_index)
            .filter(move |sq| self.get(*sq))
    }
}

impl std::fmt::Debug for BitBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|sq| (sq.row(), sq.col()))).finish()
    }
}
