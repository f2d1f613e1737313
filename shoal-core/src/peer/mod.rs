//! Peer node: a download agent and an upload agent sharing one state block.

pub mod download;
pub mod node;
pub mod state;
pub mod upload;

pub use download::{DownloadAgent, DownloadReport, FileOutcome, FileReport};
pub use node::{PeerNode, PeerReport};
pub use state::{DownloadProgress, FileStage, PeerState, SharedPeerState};
pub use upload::{UploadAgent, UploadReport};

use crate::network::NetworkError;
use crate::protocol::FileName;
use crate::storage::StorageError;

/// Errors that abort a peer.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol violation: expected {expected}, received {received}")]
    ProtocolViolation { expected: String, received: String },

    #[error("Download of {file} stalled: {reason}")]
    Stalled { file: FileName, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{role} task failed: {reason}")]
    TaskFailed { role: &'static str, reason: String },
}
