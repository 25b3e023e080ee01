//! # Training Records
//!
//! One record is produced per searched move of a self-play game. Records are
//! dumped back to back into one file per game, all fields little-endian:
//!
//! ```text
//! u32         version (4)
//! f32 × 4     visit fraction per action, -1 for actions without an edge
//! u32         plane count
//! u64 × 7     mask of each plane, 7 words per plane
//! i8          game result (+1 win, -1 lose, 0 undecided)
//! f32         root q (negated)
//! f32         best q
//! ```

use super::encoder::{encode_position_for_nn, MOVE_HISTORY};
use crate::mcts::node::{NodeArena, NodeId};
use crate::position::PositionHistory;
use crate::soko::BitBoard;
use crate::{Action, GameResult, Puzzle};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const TRAINING_DATA_VERSION: u32 = 4;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Cannot export a vertex whose children have no visits")]
    NoChildVisits,
    #[error("Unsupported training record version {0}")]
    BadVersion(u32),
    #[error("Training data I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRecord {
    pub version: u32,
    pub probabilities: [f32; Action::COUNT],
    pub planes: Vec<BitBoard>,
    pub result: i8,
    pub root_q: f32,
    pub best_q: f32,
}

impl TrainingRecord {
    /// Captures the searched statistics of `node`, whose position is the last
    /// one of `history`. The result is usually patched in once the game ends.
    pub fn from_node<P: Puzzle>(
        arena: &NodeArena,
        node: NodeId,
        result: GameResult,
        history: &PositionHistory<P>,
        best_q: f32,
    ) -> Result<Self, TrainingError> {
        let vertex = arena.get(node);
        let children_visits = vertex.children_visits();
        if children_visits == 0 {
            return Err(TrainingError::NoChildVisits);
        }

        let mut probabilities = [-1.0; Action::COUNT];
        for edge in arena.edges(node) {
            probabilities[edge.action().nn_index()] = edge.n() as f32 / children_visits as f32;
        }

        let planes = encode_position_for_nn(history, MOVE_HISTORY)
            .into_iter()
            .map(|plane| plane.mask)
            .collect();

        Ok(TrainingRecord {
            version: TRAINING_DATA_VERSION,
            probabilities,
            planes,
            result: result.as_i8(),
            root_q: -vertex.q(),
            best_q,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<LittleEndian>(self.version)?;
        for p in self.probabilities {
            out.write_f32::<LittleEndian>(p)?;
        }
        out.write_u32::<LittleEndian>(self.planes.len() as u32)?;
        for plane in &self.planes {
            for word in plane.words() {
                out.write_u64::<LittleEndian>(*word)?;
            }
        }
        out.write_i8(self.result)?;
        out.write_f32::<LittleEndian>(self.root_q)?;
        out.write_f32::<LittleEndian>(self.best_q)?;
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, TrainingError> {
        let version = input.read_u32::<LittleEndian>()?;
        if version != TRAINING_DATA_VERSION {
            return Err(TrainingError::BadVersion(version));
        }
        let mut probabilities = [0.0; Action::COUNT];
        for p in probabilities.iter_mut() {
            *p = input.read_f32::<LittleEndian>()?;
        }
        let count = input.read_u32::<LittleEndian>()? as usize;
        let mut planes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut words = [0u64; BitBoard::WORDS];
            input.read_u64_into::<LittleEndian>(&mut words)?;
            planes.push(BitBoard::from_words(words));
        }
        Ok(TrainingRecord {
            version,
            probabilities,
            planes,
            result: input.read_i8()?,
            root_q: input.read_f32::<LittleEndian>()?,
            best_q: input.read_f32::<LittleEndian>()?,
        })
    }
}

/// Writes the records of one game into `game_NNNNNN.bin` under a directory.
pub struct TrainingDataWriter {
    path: PathBuf,
    out: BufWriter<File>,
    records: usize,
}

impl TrainingDataWriter {
    pub fn new(directory: &Path, game_id: usize) -> Result<Self, TrainingError> {
        fs::create_dir_all(directory)?;
        let path = directory.join(format!("game_{:06}.bin", game_id));
        let out = BufWriter::new(File::create(&path)?);
        Ok(TrainingDataWriter {
            path,
            out,
            records: 0,
        })
    }

    pub fn write_chunk(&mut self, record: &TrainingRecord) -> Result<(), TrainingError> {
        record.write_to(&mut self.out)?;
        self.records += 1;
        Ok(())
    }

    /// Flushes the file and returns its path.
    pub fn finalize(mut self) -> Result<PathBuf, TrainingError> {
        self.out.flush()?;
        debug!(path = %self.path.display(), records = self.records, "training data written");
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soko::SokoBoard;
    use std::io::Cursor;

    fn searched_root() -> (NodeArena, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        arena.expand(root, &[Action::Down, Action::Left, Action::Right]);
        let down = arena.get_or_spawn_child(root, 0);
        let right = arena.get_or_spawn_child(root, 2);
        let mut visit = |id: NodeId, v: f32| {
            let node = arena.get_mut(id);
            node.try_start_visit();
            node.finalize_visit(v, 1);
        };
        visit(root, 0.2);
        for _ in 0..3 {
            visit(down, 0.0);
            visit(root, 0.2);
        }
        visit(right, 0.0);
        visit(root, 0.2);
        (arena, root)
    }

    #[test]
    fn test_probabilities_from_visits() {
        let (arena, root) = searched_root();
        let mut history = PositionHistory::new(SokoBoard::startpos());
        history.append(Action::Up).unwrap();

        let record = TrainingRecord::from_node(&arena, root, GameResult::Undecided, &history, 0.1).unwrap();
        assert_eq!(record.version, 4);
        assert_eq!(record.probabilities, [-1.0, 0.75, 0.0, 0.25]);
        assert_eq!(record.planes.len(), 41);
        assert!((record.root_q + 0.2).abs() < 1e-6);
        assert_eq!(record.result, 0);
        assert_eq!(record.best_q, 0.1);
    }

    #[test]
    fn test_unvisited_vertex_is_rejected() {
        let mut arena = NodeArena::new();
        let root = arena.alloc_root();
        let history = PositionHistory::new(SokoBoard::startpos());
        assert!(matches!(
            TrainingRecord::from_node(&arena, root, GameResult::Win, &history, 0.0),
            Err(TrainingError::NoChildVisits)
        ));
        arena.get_mut(root).try_start_visit();
        arena.get_mut(root).finalize_visit(1.0, 1);
        assert!(TrainingRecord::from_node(&arena, root, GameResult::Win, &history, 0.0).is_err());
    }

    #[test]
    fn test_record_layout() {
        let (arena, root) = searched_root();
        let history = PositionHistory::new(SokoBoard::startpos());
        let record = TrainingRecord::from_node(&arena, root, GameResult::Win, &history, 0.5).unwrap();

        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 4 + 16 + 4 + 41 * 7 * 8 + 1 + 4 + 4);
        assert_eq!(&bytes[0..4], &[4, 0, 0, 0]);

        let back = TrainingRecord::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_writer_names_file_by_game() {
        let dir = std::env::temp_dir().join(format!("soko-writer-{}", std::process::id()));
        let (arena, root) = searched_root();
        let history = PositionHistory::new(SokoBoard::startpos());
        let record = TrainingRecord::from_node(&arena, root, GameResult::Lose, &history, 0.0).unwrap();

        let mut writer = TrainingDataWriter::new(&dir, 7).unwrap();
        writer.write_chunk(&record).unwrap();
        writer.write_chunk(&record).unwrap();
        let path = writer.finalize().unwrap();

        assert_eq!(path.file_name().unwrap(), "game_000007.bin");
        let bytes = fs::read(&path).unwrap();
        let mut cursor = Cursor::new(bytes);
        assert_eq!(TrainingRecord::read_from(&mut cursor).unwrap().result, -1);
        assert_eq!(TrainingRecord::read_from(&mut cursor).unwrap(), record);
        fs::remove_dir_all(&dir).unwrap();
    }
}
