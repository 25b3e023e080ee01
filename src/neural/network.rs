//! The batching interface between the search and a policy/value estimator.

use super::encoder::InputPlanes;
use thiserror::Error;

/// Errors raised by an estimator backend.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Unknown network backend: {0}")]
    UnknownBackend(String),
    #[error("Sample {sample} out of range for a batch of {batch}")]
    SampleOutOfRange { sample: usize, batch: usize },
}

/// One batch of inputs evaluated together.
///
/// Inputs are added, then [`compute_blocking`](Self::compute_blocking) runs
/// once, then results are read back by sample index in insertion order.
pub trait NetworkComputation: Send {
    fn add_input(&mut self, input: InputPlanes) -> Result<(), NetworkError>;

    fn compute_blocking(&mut self) -> Result<(), NetworkError>;

    fn batch_size(&self) -> usize;

    /// Value of `sample` in [-1, 1] for the side to move.
    fn q_val(&self, sample: usize) -> Result<f32, NetworkError>;

    /// Probability of the action with network index `action_index`.
    fn p_val(&self, sample: usize, action_index: usize) -> Result<f32, NetworkError>;
}

/// Factory of computations, shared across search workers.
pub trait Network: Send + Sync {
    fn new_computation(&self) -> Box<dyn NetworkComputation>;

    fn name(&self) -> &str;
}
