//! Many self-play games on a rayon pool.

use super::game::{AbortHandle, SelfPlayGame, SelfPlayOptions};
use super::SelfPlayError;
use crate::config::SelfPlayConfig;
use crate::mcts::{NodeGarbageCollector, SearchParams};
use crate::neural::writer::TrainingDataWriter;
use crate::neural::Network;
use crate::{GameResult, Puzzle};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Aggregated outcome of a tournament.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TournamentSummary {
    /// Games that were actually played, aborted ones included.
    pub games: usize,
    pub wins: usize,
    pub losses: usize,
    pub undecided: usize,
    pub moves: usize,
    pub files: Vec<PathBuf>,
}

struct GameOutcome {
    result: GameResult,
    moves: usize,
    file: Option<PathBuf>,
}

struct TournamentState<P: Puzzle> {
    aborted: bool,
    running: Vec<(usize, AbortHandle<P>)>,
}

pub struct SelfPlayTournament<P: Puzzle> {
    start: P,
    network: Arc<dyn Network>,
    config: SelfPlayConfig,
    threads: usize,
    params: SearchParams,
    gc: Arc<NodeGarbageCollector>,
    state: Mutex<TournamentState<P>>,
}

impl<P: Puzzle> SelfPlayTournament<P> {
    /// Prepares `config.games` games from `start`.
    ///
    /// # Arguments
    /// * `start` - Position every game starts from
    /// * `network` - Estimator shared by all games
    /// * `config` - Game count, parallelism and per-move limits
    /// * `threads` - Search workers per game
    /// * `params` - Search tunables
    ///
    /// # Errors
    /// Returns [`SelfPlayError::Config`] when `config` is out of range.
    pub fn new(
        start: P,
        network: Arc<dyn Network>,
        config: SelfPlayConfig,
        threads: usize,
        params: SearchParams,
    ) -> Result<Self, SelfPlayError> {
        config.validate()?;
        Ok(SelfPlayTournament {
            start,
            network,
            config,
            threads,
            params,
            gc: Arc::new(NodeGarbageCollector::new()),
            state: Mutex::new(TournamentState {
                aborted: false,
                running: Vec::new(),
            }),
        })
    }

    /// Plays every game and blocks until all are done.
    pub fn run(&self) -> Result<TournamentSummary, SelfPlayError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("selfplay-{i}"))
            .build()?;
        let directory = self.config.training.then(|| self.output_dir());
        info!(
            games = self.config.games,
            parallelism = self.config.parallelism,
            training = self.config.training,
            "tournament started"
        );

        let outcomes: Vec<Result<Option<GameOutcome>, SelfPlayError>> = pool.install(|| {
            (0..self.config.games)
                .into_par_iter()
                .map(|game_id| self.play_one(game_id, directory.as_deref()))
                .collect()
        });

        let mut summary = TournamentSummary::default();
        for outcome in outcomes {
            let Some(outcome) = outcome? else { continue };
            summary.games += 1;
            summary.moves += outcome.moves;
            match outcome.result {
                GameResult::Win => summary.wins += 1,
                GameResult::Lose => summary.losses += 1,
                GameResult::Undecided => summary.undecided += 1,
            }
            summary.files.extend(outcome.file);
        }
        info!(
            games = summary.games,
            wins = summary.wins,
            losses = summary.losses,
            undecided = summary.undecided,
            "tournament finished"
        );
        Ok(summary)
    }

    /// Aborts the running games. Games that have not started yet are skipped.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        for (_, handle) in &state.running {
            handle.abort();
        }
        info!(running = state.running.len(), "tournament aborted");
    }

    fn play_one(
        &self,
        game_id: usize,
        directory: Option<&Path>,
    ) -> Result<Option<GameOutcome>, SelfPlayError> {
        let options = SelfPlayOptions {
            threads: self.threads,
            movetime: Duration::from_millis(self.config.movetime_ms),
            max_moves: self.config.max_moves,
            training: directory.is_some(),
            params: self.params.clone(),
            seed: self.config.seed.map(|s| s.wrapping_add(game_id as u64)),
        };
        let mut game = SelfPlayGame::new(
            self.start.clone(),
            Arc::clone(&self.network),
            options,
            Arc::clone(&self.gc),
        );
        {
            let mut state = self.state.lock();
            if state.aborted {
                return Ok(None);
            }
            state.running.push((game_id, game.abort_handle()));
        }

        let played = game.play();
        self.state.lock().running.retain(|(id, _)| *id != game_id);
        let result = played?;

        let file = match directory {
            Some(directory) => {
                let mut writer = TrainingDataWriter::new(directory, game_id)?;
                for record in game.training_data() {
                    writer.write_chunk(record)?;
                }
                Some(writer.finalize()?)
            }
            None => None,
        };
        Ok(Some(GameOutcome {
            result,
            moves: game.moves().len(),
            file,
        }))
    }

    fn output_dir(&self) -> PathBuf {
        match &self.config.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let stamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs());
                PathBuf::from(format!("data-{stamp}"))
            }
        }
    }
}
