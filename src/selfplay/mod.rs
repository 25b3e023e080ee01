//! # Self-Play
//!
//! A [`SelfPlayGame`] plays one puzzle from its start position to the end,
//! searching every move, and optionally captures a training record per move.
//! A [`SelfPlayTournament`] runs many games in parallel and writes their
//! records to disk.

pub mod game;
pub mod tournament;

pub use game::{AbortHandle, SelfPlayGame, SelfPlayOptions};
pub use tournament::{SelfPlayTournament, TournamentSummary};

use crate::config::ConfigError;
use crate::mcts::SearchError;
use crate::neural::writer::TrainingError;
use crate::RulesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelfPlayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error("Failed to build the game thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
