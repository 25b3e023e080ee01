//! One self-play game.

use super::SelfPlayError;
use crate::mcts::{
    BestMoveInfo, NodeGarbageCollector, NodeTree, Search, SearchLimits, SearchParams,
};
use crate::neural::writer::{TrainingError, TrainingRecord};
use crate::neural::Network;
use crate::{Action, GameResult, Puzzle};
use parking_lot::Mutex;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How each move of a game is searched.
#[derive(Debug, Clone)]
pub struct SelfPlayOptions {
    pub threads: usize,
    pub movetime: Duration,
    pub max_moves: usize,
    pub training: bool,
    pub params: SearchParams,
    /// Seed of the move sampler; a random one when `None`.
    pub seed: Option<u64>,
}

impl Default for SelfPlayOptions {
    fn default() -> Self {
        SelfPlayOptions {
            threads: 1,
            movetime: Duration::from_millis(1000),
            max_moves: 300,
            training: false,
            params: SearchParams::default(),
            seed: None,
        }
    }
}

struct GameControl<P: Puzzle> {
    aborted: bool,
    search: Option<Arc<Search<P>>>,
}

/// Aborts a game from another thread.
pub struct AbortHandle<P: Puzzle> {
    control: Arc<Mutex<GameControl<P>>>,
}

impl<P: Puzzle> Clone for AbortHandle<P> {
    fn clone(&self) -> Self {
        AbortHandle {
            control: Arc::clone(&self.control),
        }
    }
}

impl<P: Puzzle> AbortHandle<P> {
    /// Ends the running search, if any, and keeps the game from searching
    /// again. The game result stays undecided.
    pub fn abort(&self) {
        let mut control = self.control.lock();
        control.aborted = true;
        if let Some(search) = &control.search {
            search.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.control.lock().aborted
    }
}

pub struct SelfPlayGame<P: Puzzle> {
    tree: NodeTree<P>,
    network: Arc<dyn Network>,
    options: SelfPlayOptions,
    control: Arc<Mutex<GameControl<P>>>,
    rng: Xoshiro256PlusPlus,
    result: GameResult,
    moves: Vec<Action>,
    training_data: Vec<TrainingRecord>,
}

impl<P: Puzzle> SelfPlayGame<P> {
    pub fn new(
        start: P,
        network: Arc<dyn Network>,
        options: SelfPlayOptions,
        gc: Arc<NodeGarbageCollector>,
    ) -> Self {
        let seed = options.seed.unwrap_or_else(rand::random::<u64>);
        SelfPlayGame {
            tree: NodeTree::new(start, gc),
            network,
            options,
            control: Arc::new(Mutex::new(GameControl {
                aborted: false,
                search: None,
            })),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            result: GameResult::Undecided,
            moves: Vec::new(),
            training_data: Vec::new(),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle<P> {
        AbortHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Plays until the result is decided, the move cap is hit or the game is
    /// aborted. Returns the final result.
    pub fn play(&mut self) -> Result<GameResult, SelfPlayError> {
        loop {
            self.result = self.tree.history().compute_game_result();
            if self.result != GameResult::Undecided {
                break;
            }
            if self.moves.len() >= self.options.max_moves {
                debug!(moves = self.moves.len(), "move cap reached");
                break;
            }

            let (tx, rx) = mpsc::channel();
            let search = {
                let mut control = self.control.lock();
                if control.aborted {
                    break;
                }
                let search = Arc::new(Search::new(
                    &self.tree,
                    Arc::clone(&self.network),
                    tx,
                    SearchLimits::movetime(self.options.movetime),
                    self.options.params.clone(),
                ));
                control.search = Some(Arc::clone(&search));
                search
            };
            let outcome = search.run_blocking(self.options.threads);
            let aborted = {
                let mut control = self.control.lock();
                control.search = None;
                control.aborted
            };
            outcome?;
            if aborted {
                break;
            }
            let info = rx.try_recv().unwrap_or_default();

            if self.options.training {
                self.record_training_data(&search);
            }

            let Some(action) = self.choose_action(&search, &info) else {
                warn!("search returned no move");
                break;
            };
            drop(search);
            debug!(ply = self.moves.len(), action = %action, q = info.q, "self-play move");
            self.tree.advance(action)?;
            self.moves.push(action);
        }

        for record in &mut self.training_data {
            record.result = self.result.as_i8();
        }
        info!(result = ?self.result, moves = self.moves.len(), "self-play game finished");
        Ok(self.result)
    }

    fn record_training_data(&mut self, search: &Search<P>) {
        let best_q = search.best_eval();
        let arena = self.tree.arena().read();
        match TrainingRecord::from_node(
            &arena,
            self.tree.current_head(),
            GameResult::Undecided,
            self.tree.history(),
            best_q,
        ) {
            Ok(record) => self.training_data.push(record),
            Err(TrainingError::NoChildVisits) => warn!("skipping record of an unsearched move"),
            Err(e) => warn!(error = %e, "skipping training record"),
        }
    }

    /// The best move without temperature, otherwise a sample over the root
    /// children weighted by `n^(1/T)`.
    fn choose_action(&mut self, search: &Search<P>, info: &BestMoveInfo) -> Option<Action> {
        let temperature = self.options.params.temperature();
        if temperature <= 0.0 {
            return info.best_move;
        }

        let (actions, weights): (Vec<Action>, Vec<f64>) = search
            .root_stats()
            .into_iter()
            .filter(|stats| stats.n > 0)
            .map(|stats| (stats.action, (stats.n as f64).powf(1.0 / temperature as f64)))
            .unzip();
        match WeightedIndex::new(&weights) {
            Ok(dist) => Some(actions[dist.sample(&mut self.rng)]),
            Err(_) => info.best_move,
        }
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    /// Actions played so far.
    pub fn moves(&self) -> &[Action] {
        &self.moves
    }

    pub fn tree(&self) -> &NodeTree<P> {
        &self.tree
    }

    pub fn training_data(&self) -> &[TrainingRecord] {
        &self.training_data
    }
}
