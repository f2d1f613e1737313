//! Runs a whole swarm, tracker and peers, inside one process.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::ShoalError;
use crate::bootstrap::PeerManifest;
use crate::config::ShoalConfig;
use crate::network::Network;
use crate::peer::{PeerNode, PeerReport};
use crate::protocol::{FileName, NodeId};
use crate::storage::SegmentSink;
use crate::tracker::{TrackerControlLoop, TrackerSummary};

/// Everything the nodes reported once the swarm terminated.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmReport {
    pub tracker: TrackerSummary,
    /// Peer reports ordered by node id
    pub peers: Vec<PeerReport>,
}

impl SwarmReport {
    pub fn peer(&self, node: NodeId) -> Option<&PeerReport> {
        self.peers.iter().find(|peer| peer.node == node)
    }

    /// Number of wanted files completed across all peers.
    pub fn completed_downloads(&self) -> usize {
        self.peers
            .iter()
            .flat_map(|peer| &peer.downloads.files)
            .filter(|file| file.is_completed())
            .count()
    }

    /// Swarm members the tracker knows for `name`.
    pub fn swarm(&self, name: &FileName) -> &[NodeId] {
        self.tracker
            .swarms
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

enum NodeOutcome {
    Tracker(TrackerSummary),
    Peer(PeerReport),
}

/// A tracker plus one peer per manifest. Manifest `i` belongs to node `i + 1`.
pub struct Swarm<S> {
    config: ShoalConfig,
    manifests: Vec<PeerManifest>,
    sink: Arc<S>,
}

impl<S: SegmentSink + 'static> Swarm<S> {
    pub fn new(config: ShoalConfig, manifests: Vec<PeerManifest>, sink: Arc<S>) -> Self {
        Self {
            config,
            manifests,
            sink,
        }
    }

    /// Spawns every node and waits for all of them.
    ///
    /// The first node to fail aborts the others.
    ///
    /// # Errors
    ///
    /// - `ShoalError::Tracker` - If the tracker control loop fails
    /// - `ShoalError::Peer` - If any peer fails
    /// - `ShoalError::TaskFailed` - If a node task panicked
    pub async fn run(self) -> Result<SwarmReport, ShoalError> {
        let peer_count = self.manifests.len() as u32;
        tracing::info!("Starting swarm with {} peers", peer_count);

        let mut manifests = self.manifests.into_iter();
        let mut tasks = FuturesUnordered::new();
        let mut aborts: Vec<AbortHandle> = Vec::new();

        for endpoint in Network::connect(peer_count + 1, &self.config.network) {
            let node = endpoint.node();
            let handle = if node.is_tracker() {
                let tracker = TrackerControlLoop::new(endpoint, peer_count);
                tokio::spawn(
                    async move {
                        tracker
                            .run()
                            .await
                            .map(NodeOutcome::Tracker)
                            .map_err(ShoalError::from)
                    }
                    .instrument(tracing::info_span!("tracker", peers = peer_count)),
                )
            } else {
                let manifest = manifests.next().unwrap_or_default();
                let peer = PeerNode::new(
                    endpoint,
                    manifest,
                    self.config.peer.clone(),
                    Arc::clone(&self.sink),
                );
                tokio::spawn(
                    async move {
                        peer.run()
                            .await
                            .map(NodeOutcome::Peer)
                            .map_err(ShoalError::from)
                    }
                    .instrument(tracing::info_span!("peer", node = %node)),
                )
            };
            aborts.push(handle.abort_handle());
            tasks.push(handle);
        }

        let mut tracker = None;
        let mut peers = Vec::with_capacity(peer_count as usize);

        while let Some(joined) = tasks.next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(error)) => {
                    tracing::error!("Swarm aborted: {}", error);
                    abort_all(&aborts);
                    return Err(error);
                }
                Err(error) => {
                    abort_all(&aborts);
                    return Err(ShoalError::TaskFailed {
                        reason: error.to_string(),
                    });
                }
            };
            match outcome {
                NodeOutcome::Tracker(summary) => tracker = Some(summary),
                NodeOutcome::Peer(report) => peers.push(report),
            }
        }

        let tracker = tracker.ok_or_else(|| ShoalError::TaskFailed {
            reason: "tracker produced no summary".to_string(),
        })?;
        peers.sort_by_key(|peer| peer.node);

        tracing::info!(
            "Swarm terminated: {} files catalogued, {} peers finished",
            tracker.catalog_size,
            tracker.finished_peers.len()
        );
        Ok(SwarmReport { tracker, peers })
    }
}

fn abort_all(handles: &[AbortHandle]) {
    for handle in handles {
        handle.abort();
    }
}
