//! Tracker node: authoritative file catalog, swarm membership and the
//! global termination barrier.

pub mod control;
pub mod registry;

pub use control::{TrackerControlLoop, TrackerSummary};
pub use registry::{SwarmEntry, TrackerRegistry};

use crate::network::NetworkError;

/// Errors that stop the tracker control loop.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}
