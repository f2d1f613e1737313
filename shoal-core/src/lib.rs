//! Shoal Core - tracker-coordinated segment swarming
//!
//! A tracker holds the authoritative file catalog and swarm membership.
//! Peers declare what they own, then download wanted files segment by
//! segment from each other while answering availability queries for what
//! they already hold.

pub mod bootstrap;
pub mod config;
pub mod network;
pub mod peer;
pub mod protocol;
pub mod scenario;
pub mod storage;
pub mod swarm;
pub mod tracing_setup;
pub mod tracker;

// Re-export main types for convenient access
pub use bootstrap::{ConfigError, PeerManifest};
pub use config::{AvailabilityPolicy, ShoalConfig};
pub use peer::{PeerError, PeerReport};
pub use protocol::{FileDescriptor, FileName, NodeId, SegmentHash, WireError};
pub use scenario::ScenarioBuilder;
pub use storage::{DirectorySink, MemorySink, SegmentSink, StorageError};
pub use swarm::{Swarm, SwarmReport};
pub use tracker::{TrackerError, TrackerSummary};

/// Errors that can end a Shoal run.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Invalid field: {0}")]
    Wire(#[from] WireError),

    #[error("Node task failed: {reason}")]
    TaskFailed { reason: String },
}

impl ShoalError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ShoalError::Configuration(e) => match e {
                ConfigError::Missing { path } => {
                    format!("Manifest {} does not exist", path.display())
                }
                ConfigError::Malformed { reason } => format!("Manifest is malformed: {reason}"),
                ConfigError::Io { path, .. } => format!("Could not read {}", path.display()),
            },
            ShoalError::Peer(e) => match e {
                PeerError::ProtocolViolation { .. } => "Tracker sent an unexpected reply".to_string(),
                PeerError::Stalled { file, .. } => {
                    format!("Download of {file} cannot make progress")
                }
                PeerError::Storage(_) => "Could not write a completed file".to_string(),
                _ => "Peer error occurred".to_string(),
            },
            ShoalError::Tracker(_) => "Tracker error occurred".to_string(),
            ShoalError::Wire(e) => format!("Invalid field: {e}"),
            ShoalError::TaskFailed { .. } => "A node crashed".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ShoalError::Configuration(_) | ShoalError::Wire(_))
    }
}

pub type Result<T> = std::result::Result<T, ShoalError>;
