//! # Policy/Value Estimation
//!
//! The search only sees the [`Network`] and [`NetworkComputation`] traits.
//! Positions are turned into input planes by [`encoder`], and the searched
//! root statistics are written out for training by [`writer`].

pub mod encoder;
pub mod factory;
pub mod network;
pub mod random;
pub mod uniform;
pub mod writer;

pub use factory::create_network;
pub use network::{Network, NetworkComputation, NetworkError};
pub use random::RandomNetwork;
pub use uniform::UniformNetwork;
