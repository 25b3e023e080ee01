//! An estimator with no opinion: a constant value and equal priors.

use super::encoder::InputPlanes;
use super::network::{Network, NetworkComputation, NetworkError};
use crate::Action;

#[derive(Debug)]
pub struct UniformComputation {
    batch: usize,
    q: f32,
}

impl NetworkComputation for UniformComputation {
    fn add_input(&mut self, _input: InputPlanes) -> Result<(), NetworkError> {
        self.batch += 1;
        Ok(())
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch
    }

    fn q_val(&self, sample: usize) -> Result<f32, NetworkError> {
        if sample >= self.batch {
            return Err(NetworkError::SampleOutOfRange {
                sample,
                batch: self.batch,
            });
        }
        Ok(self.q)
    }

    fn p_val(&self, sample: usize, _action_index: usize) -> Result<f32, NetworkError> {
        if sample >= self.batch {
            return Err(NetworkError::SampleOutOfRange {
                sample,
                batch: self.batch,
            });
        }
        Ok(1.0 / Action::COUNT as f32)
    }
}

/// Returns `q` for every input and `1/4` for every action.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformNetwork {
    q: f32,
}

impl UniformNetwork {
    pub fn new(q: f32) -> Self {
        UniformNetwork { q: q.clamp(-1.0, 1.0) }
    }
}

impl Network for UniformNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(UniformComputation { batch: 0, q: self.q })
    }

    fn name(&self) -> &str {
        "uniform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::encoder::InputPlane;

    #[test]
    fn test_uniform_outputs() {
        let network = UniformNetwork::new(0.25);
        let mut computation = network.new_computation();
        computation.add_input(vec![InputPlane::default()]).unwrap();
        computation.add_input(vec![InputPlane::default()]).unwrap();
        computation.compute_blocking().unwrap();
        assert_eq!(computation.batch_size(), 2);
        assert_eq!(computation.q_val(1).unwrap(), 0.25);
        assert_eq!(computation.p_val(0, 3).unwrap(), 0.25);
        assert!(computation.q_val(2).is_err());
    }
}
