//! A deterministic stand-in estimator.
//!
//! Every input is reduced to a 64-bit hash of its planes; the value and the
//! per-action probabilities are read off that hash. Equal inputs always get
//! equal outputs, which makes searches reproducible without real weights.

use super::encoder::InputPlanes;
use super::network::{Network, NetworkComputation, NetworkError};

fn hash(value: u64) -> u64 {
    0xfad0_d7f2_fbb0_59f1_u64
        .wrapping_mul(value.wrapping_add(0xbaad_41cd_cb83_9961))
        .wrapping_add(
            0x7ace_c005_0bf8_2f43_u64.wrapping_mul((value >> 31).wrapping_add(0xd571_b3a9_2b1b_2755)),
        )
}

/// Mixes `value` into `seed`.
pub fn hash_cat(seed: u64, value: u64) -> u64 {
    seed ^ 0x2997_99ad_f0d9_5def_u64
        .wrapping_add(hash(value))
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

fn hash_planes(input: &InputPlanes) -> u64 {
    input.iter().fold(0, |mut h, plane| {
        for word in plane.mask.words() {
            h = hash_cat(h, *word);
        }
        hash_cat(h, u64::from(plane.value.to_bits()))
    })
}

#[derive(Debug, Default)]
pub struct RandomComputation {
    inputs: Vec<u64>,
}

impl RandomComputation {
    fn input(&self, sample: usize) -> Result<u64, NetworkError> {
        self.inputs
            .get(sample)
            .copied()
            .ok_or(NetworkError::SampleOutOfRange {
                sample,
                batch: self.inputs.len(),
            })
    }
}

impl NetworkComputation for RandomComputation {
    fn add_input(&mut self, input: InputPlanes) -> Result<(), NetworkError> {
        self.inputs.push(hash_planes(&input));
        Ok(())
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    fn q_val(&self, sample: usize) -> Result<f32, NetworkError> {
        let h = self.input(sample)?;
        Ok(((h % 200_000) as i64 - 100_000) as f32 / 100_000.0)
    }

    fn p_val(&self, sample: usize, action_index: usize) -> Result<f32, NetworkError> {
        let h = self.input(sample)?;
        Ok((hash_cat(h, action_index as u64) % 10_000) as f32 / 10_000.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNetwork;

impl Network for RandomNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(RandomComputation::default())
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::encoder::encode_position_for_nn;
    use crate::position::PositionHistory;
    use crate::soko::SokoBoard;
    use crate::Action;

    #[test]
    fn test_same_input_same_output() {
        let history = PositionHistory::new(SokoBoard::startpos());
        let network = RandomNetwork;
        let mut a = network.new_computation();
        let mut b = network.new_computation();
        a.add_input(encode_position_for_nn(&history, 8)).unwrap();
        b.add_input(encode_position_for_nn(&history, 8)).unwrap();
        a.compute_blocking().unwrap();
        b.compute_blocking().unwrap();
        assert_eq!(a.q_val(0).unwrap(), b.q_val(0).unwrap());
        for i in 0..Action::COUNT {
            assert_eq!(a.p_val(0, i).unwrap(), b.p_val(0, i).unwrap());
        }
    }

    #[test]
    fn test_outputs_in_range() {
        let mut history = PositionHistory::new(SokoBoard::startpos());
        let network = RandomNetwork;
        let mut computation = network.new_computation();
        for action in [Action::Up, Action::Left, Action::Left] {
            history.append(action).unwrap();
            computation.add_input(encode_position_for_nn(&history, 8)).unwrap();
        }
        computation.compute_blocking().unwrap();
        assert_eq!(computation.batch_size(), 3);
        for sample in 0..3 {
            let q = computation.q_val(sample).unwrap();
            assert!((-1.0..1.0).contains(&q));
            for i in 0..Action::COUNT {
                let p = computation.p_val(sample, i).unwrap();
                assert!((0.0..1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_sample_out_of_range() {
        let computation = RandomNetwork.new_computation();
        assert!(matches!(
            computation.q_val(0),
            Err(NetworkError::SampleOutOfRange { sample: 0, batch: 0 })
        ));
    }
}
