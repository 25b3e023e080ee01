//! # Engine Controller
//!
//! Drives single-move searches: set a position, start a timed search, and
//! collect the best move from a channel. At most one search is alive at a
//! time; setting a new position or starting a new search tears down the
//! previous one first.

use crate::config::{ConfigError, EngineConfig};
use crate::mcts::{
    BestMoveInfo, EdgeStats, NodeGarbageCollector, NodeTree, Search, SearchError, SearchLimits,
    SearchParams,
};
use crate::neural::{create_network, Network, NetworkError};
use crate::soko::SokoBoard;
use crate::{Action, RulesError};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

pub struct EngineController {
    config: EngineConfig,
    params: SearchParams,
    network: Arc<dyn Network>,
    // Field order matters: the search must be torn down before its tree.
    search: Option<Search<SokoBoard>>,
    tree: Option<NodeTree<SokoBoard>>,
    gc: Arc<NodeGarbageCollector>,
}

impl EngineController {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let network = create_network(&config.backend)?;
        Self::with_network(config, network)
    }

    /// Like [`new`](Self::new) but with an explicit estimator.
    pub fn with_network(config: EngineConfig, network: Arc<dyn Network>) -> Result<Self, EngineError> {
        let params = SearchParams::new(&config.search)?;
        Ok(EngineController {
            config,
            params,
            network,
            search: None,
            tree: None,
            gc: Arc::new(NodeGarbageCollector::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets the level to search from, then plays `moves` on it. `None` picks
    /// the built-in start level.
    pub fn set_position(&mut self, fen: Option<&str>, moves: &[Action]) -> Result<(), EngineError> {
        self.search = None;

        let board = match fen {
            Some(fen) => SokoBoard::from_fen(fen)?,
            None => SokoBoard::startpos(),
        };
        debug!(moves = moves.len(), "setting up position");
        match self.tree.as_mut() {
            Some(tree) => tree.reset_to_position(board, moves)?,
            None => {
                let mut tree = NodeTree::new(board, Arc::clone(&self.gc));
                for &action in moves {
                    tree.advance(action)?;
                }
                self.tree = Some(tree);
            }
        }
        Ok(())
    }

    /// Starts a search that ends after `movetime`, or runs until stopped when
    /// `None`. The returned channel receives exactly one message unless the
    /// search fails.
    pub fn go(&mut self, movetime: Option<Duration>) -> Result<Receiver<BestMoveInfo>, EngineError> {
        self.search = None;
        let gc = &self.gc;
        let tree = self
            .tree
            .get_or_insert_with(|| NodeTree::new(SokoBoard::startpos(), Arc::clone(gc)));

        let limits = match movetime {
            Some(movetime) => SearchLimits::movetime(movetime),
            None => SearchLimits::infinite(),
        };
        info!(
            movetime_ms = movetime.map(|m| m.as_millis() as u64),
            threads = self.config.threads,
            "go"
        );

        let (tx, rx) = mpsc::channel();
        let search = Search::new(
            tree,
            Arc::clone(&self.network),
            tx,
            limits,
            self.params.clone(),
        );
        search.start_threads(self.config.threads)?;
        self.search = Some(search);
        Ok(rx)
    }

    pub fn stop(&self) {
        if let Some(search) = &self.search {
            search.stop();
        }
    }

    /// Waits for the running search, if any, to finish.
    pub fn wait(&self) -> Result<(), EngineError> {
        if let Some(search) = &self.search {
            search.wait()?;
        }
        Ok(())
    }

    /// Root statistics of the current or last search.
    pub fn root_stats(&self) -> Vec<EdgeStats> {
        self.search.as_ref().map(Search::root_stats).unwrap_or_default()
    }

    pub fn position(&self) -> Option<&SokoBoard> {
        self.tree.as_ref().map(NodeTree::position)
    }
}
