//! Validated, immutable search parameters.

use crate::config::{ConfigError, SearchConfig};

/// Number of positions fed to the network per evaluation.
pub const HISTORY_FILL: usize = crate::neural::encoder::MOVE_HISTORY;

/// Consecutive collisions after which a minibatch is sent as is.
pub const MAX_COLLISIONS: usize = 10;

/// Tunables shared by every worker of a search. Built only through
/// [`SearchParams::new`], so every value is known to be in range.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Non-collision picks gathered before one network call.
    minibatch_size: usize,
    /// Base exploration constant of the PUCT formula.
    cpuct: f32,
    /// Visit count at which the growth term reaches `ln 2`.
    cpuct_base: f32,
    /// Weight of the logarithmic growth term.
    cpuct_factor: f32,
    /// Whether the exploration constant grows with the parent's visits.
    cpuct_growth: bool,
    /// Self-play move sampling temperature; 0 plays the best move.
    temperature: f32,
    /// Value assumed for children that have not been visited yet.
    fpu_value: f32,
}

impl SearchParams {
    /// Validates `config` and copies its values.
    ///
    /// # Errors
    /// Returns [`ConfigError::OutOfRange`] for the first value outside its range.
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: &SearchConfig) -> Self {
        Self {
            minibatch_size: config.minibatch_size,
            cpuct: config.cpuct,
            cpuct_base: config.cpuct_base,
            cpuct_factor: config.cpuct_factor,
            cpuct_growth: config.cpuct_growth,
            temperature: config.temperature,
            fpu_value: config.fpu_value,
        }
    }

    pub fn minibatch_size(&self) -> usize {
        self.minibatch_size
    }

    pub fn cpuct(&self) -> f32 {
        self.cpuct
    }

    pub fn cpuct_base(&self) -> f32 {
        self.cpuct_base
    }

    pub fn cpuct_factor(&self) -> f32 {
        self.cpuct_factor
    }

    pub fn cpuct_growth(&self) -> bool {
        self.cpuct_growth
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// First-play urgency: the q of an unvisited child.
    pub fn fpu_value(&self) -> f32 {
        self.fpu_value
    }

    /// Exploration constant for a parent with `n` visits.
    ///
    /// `cpuct` alone unless growth is on, in which case
    /// `cpuct + factor * ln((n + base) / base)`.
    pub fn compute_cpuct(&self, n: u32) -> f32 {
        if !self.cpuct_growth {
            return self.cpuct;
        }
        self.cpuct + self.cpuct_factor * ((n as f32 + self.cpuct_base) / self.cpuct_base).ln()
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from_valid(&SearchConfig::default())
    }
}
