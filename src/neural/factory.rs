//! Picks an estimator backend by name.

use super::network::{Network, NetworkError};
use super::random::RandomNetwork;
use super::uniform::UniformNetwork;
use std::sync::Arc;
use tracing::info;

/// Backend names accepted by [`create_network`].
pub const BACKENDS: [&str; 2] = ["random", "uniform"];

pub fn create_network(name: &str) -> Result<Arc<dyn Network>, NetworkError> {
    info!(backend = name, "creating network backend");
    match name {
        "random" => Ok(Arc::new(RandomNetwork)),
        "uniform" => Ok(Arc::new(UniformNetwork::default())),
        other => Err(NetworkError::UnknownBackend(other.to_string())),
    }
}
