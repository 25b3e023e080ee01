//! # Engine Configuration
//!
//! Settings come from three layers, each overriding the one before:
//!
//! 1. Built-in defaults (every field is `#[serde(default)]`)
//! 2. A TOML file (`--config`, or `soko.toml` in the working directory)
//! 3. `SOKO_*` environment variables
//!
//! Command line flags are applied on top by the binary. Ranges are checked by
//! [`EngineConfig::validate`] once all layers are in.
//!
//! ```toml
//! threads = 4
//! backend = "random"
//!
//! [search]
//! minibatch_size = 256
//! cpuct = 3.0
//!
//! [selfplay]
//! games = 16
//! parallelism = 4
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File looked for in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "soko.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        min: String,
        max: String,
        value: String,
    },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn check_range<T: PartialOrd + Display>(
    name: &'static str,
    value: T,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    // Written so that NaN is rejected.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            min: min.to_string(),
            max: max.to_string(),
            value: value.to_string(),
        })
    }
}

/// Search tunables. Validated into [`SearchParams`](crate::mcts::SearchParams).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of leaves evaluated per network batch.
    pub minibatch_size: usize,
    /// Exploration constant.
    pub cpuct: f32,
    /// Visit count scale of the exploration growth term.
    pub cpuct_base: f32,
    /// Weight of the exploration growth term.
    pub cpuct_factor: f32,
    /// Grow the exploration constant with the parent's visit count.
    pub cpuct_growth: bool,
    /// Move selection temperature for self-play; 0 picks the best move.
    pub temperature: f32,
    /// Value assumed for children that have not been visited yet.
    pub fpu_value: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            minibatch_size: 256,
            cpuct: 3.0,
            cpuct_base: 19652.0,
            cpuct_factor: 2.0,
            cpuct_growth: false,
            temperature: 0.0,
            fpu_value: 1.2,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("search.minibatch_size", self.minibatch_size, 1, 1024)?;
        check_range("search.cpuct", self.cpuct, 0.0, 100.0)?;
        check_range("search.cpuct_base", self.cpuct_base, 1.0, 1_000_000.0)?;
        check_range("search.cpuct_factor", self.cpuct_factor, 0.0, 1000.0)?;
        check_range("search.temperature", self.temperature, 0.0, 100.0)?;
        check_range("search.fpu_value", self.fpu_value, -100.0, 100.0)?;
        Ok(())
    }

    /// Builder pattern: set the minibatch size.
    pub fn with_minibatch_size(mut self, size: usize) -> Self {
        self.minibatch_size = size;
        self
    }

    /// Builder pattern: set the temperature.
    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }
}

/// Self-play tournament settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfPlayConfig {
    /// Number of games to play.
    pub games: usize,
    /// Games played at the same time.
    pub parallelism: usize,
    /// Search time per move.
    pub movetime_ms: u64,
    /// A game that has not ended after this many moves is scored as undecided.
    pub max_moves: usize,
    /// Write training records.
    pub training: bool,
    /// Where training files go. A fresh `data-<timestamp>` directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Seed for move sampling; random when unset.
    pub seed: Option<u64>,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            games: 1,
            parallelism: 1,
            movetime_ms: 1000,
            max_moves: 300,
            training: false,
            output_dir: None,
            seed: None,
        }
    }
}

impl SelfPlayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("selfplay.parallelism", self.parallelism, 1, 256)?;
        check_range("selfplay.max_moves", self.max_moves, 1, 100_000)?;
        Ok(())
    }
}

/// Everything the engine and self-play drivers need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search worker threads per search.
    pub threads: usize,
    /// Estimator backend name.
    pub backend: String,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    pub search: SearchConfig,
    pub selfplay: SelfPlayConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            backend: "random".to_string(),
            log_level: "info".to_string(),
            search: SearchConfig::default(),
            selfplay: SelfPlayConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("threads", self.threads, 1, 128)?;
        self.search.validate()?;
        self.selfplay.validate()
    }
}

/// Parses a TOML document.
pub fn parse_config(text: &str, path: &Path) -> Result<EngineConfig, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads configuration from `path`.
pub fn load_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text, path)
}

/// Loads configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] if it
/// exists, or falls back to defaults. Environment overrides are applied and
/// the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_from_path(path)?
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                info!("Loading config from {}", default.display());
                load_from_path(default)?
            } else {
                debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                EngineConfig::default()
            }
        }
    };
    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

macro_rules! env_override {
    ($lookup:expr, $config:expr, $field:ident, $key:expr) => {
        if let Some(v) = $lookup($key) {
            $config.$field = v;
        }
    };
    ($lookup:expr, $config:expr, $field:ident, $key:expr, parse) => {
        if let Some(v) = $lookup($key) {
            match v.parse() {
                Ok(parsed) => $config.$field = parsed,
                Err(_) => warn!("Ignoring {}={}: not a valid value", $key, v),
            }
        }
    };
}

/// Applies `SOKO_THREADS`, `SOKO_BACKEND` and `SOKO_LOG_LEVEL` as returned by
/// `lookup`.
pub fn apply_env_overrides<F>(mut config: EngineConfig, lookup: F) -> EngineConfig
where
    F: Fn(&str) -> Option<String>,
{
    env_override!(lookup, config, threads, "SOKO_THREADS", parse);
    env_override!(lookup, config, backend, "SOKO_BACKEND");
    env_override!(lookup, config, log_level, "SOKO_LOG_LEVEL");
    config
}
