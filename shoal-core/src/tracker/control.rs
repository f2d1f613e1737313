//! Tracker control loop: setup barrier, request servicing and termination.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::TrackerError;
use super::registry::TrackerRegistry;
use crate::network::{Delivery, Endpoint, Mailbox, NetworkError, Outbox};
use crate::protocol::{FileName, Message, MessageKind, NodeId, ReplyToken};

/// State of the tracker when its control loop exits.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary {
    /// Number of distinct files in the catalog
    pub catalog_size: usize,
    /// Swarm members per file, in insertion order
    pub swarms: BTreeMap<FileName, Vec<NodeId>>,
    /// Peers that reported finishing all downloads
    pub finished_peers: Vec<NodeId>,
    /// Number of termination broadcasts issued
    pub terminate_broadcasts: u32,
}

/// The tracker's single task.
///
/// Owns the registry outright; every request is handled to completion
/// before the next one is received.
pub struct TrackerControlLoop {
    outbox: Outbox,
    requests: Mailbox,
    registry: TrackerRegistry,
    peer_count: u32,
    finished: BTreeSet<NodeId>,
    terminate_broadcasts: u32,
}

impl TrackerControlLoop {
    /// Creates the control loop for a swarm of `peer_count` peers, numbered
    /// `1..=peer_count`.
    pub fn new(endpoint: Endpoint, peer_count: u32) -> Self {
        Self {
            outbox: endpoint.outbox,
            requests: endpoint.requests,
            registry: TrackerRegistry::new(),
            peer_count,
            finished: BTreeSet::new(),
            terminate_broadcasts: 0,
        }
    }

    /// Runs the setup phase, then services requests until every peer has
    /// reported completion and termination was broadcast.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Network` - If a receive fails or a reply cannot be delivered
    pub async fn run(mut self) -> Result<TrackerSummary, TrackerError> {
        tracing::info!("Tracker started for {} peers", self.peer_count);

        self.register_peers().await?;
        if self.peer_count > 0 {
            self.serve().await?;
        }

        tracing::info!("Tracker stopped");
        Ok(self.summary())
    }

    /// Consumes each peer's declaration in increasing identifier order.
    ///
    /// Requests that arrive early stay queued in the mailbox until the
    /// barrier is passed.
    async fn register_peers(&mut self) -> Result<(), TrackerError> {
        for id in 1..=self.peer_count {
            let peer = NodeId::new(id);
            let files = match self
                .requests
                .recv_from(peer, MessageKind::InitDeclare)
                .await?
            {
                Message::InitDeclare { files } => files,
                other => return Err(NetworkError::unexpected(MessageKind::InitDeclare, &other).into()),
            };

            let declared = files.len();
            for file in files {
                let name = file.name().clone();
                if self.registry.declare(peer, file) {
                    tracing::debug!("Catalogued {} from peer {}", name, peer);
                }
            }

            self.outbox.send(
                peer,
                &Message::InitAck {
                    token: ReplyToken::ack(),
                },
            )?;
            tracing::info!("Registered peer {} owning {} files", peer, declared);
        }
        Ok(())
    }

    async fn serve(&mut self) -> Result<(), TrackerError> {
        loop {
            let Delivery { origin, message } = self.requests.recv_any().await?;
            if self.handle(origin, message)? {
                return Ok(());
            }
        }
    }

    /// Handles one request. Returns true once termination was broadcast.
    fn handle(&mut self, origin: NodeId, message: Message) -> Result<bool, TrackerError> {
        match message {
            Message::FileInfo { name } => {
                let segment_count = self.registry.segment_count(&name);
                if segment_count == 0 {
                    tracing::warn!("Peer {} asked for unknown file {}", origin, name);
                }
                self.outbox
                    .send(origin, &Message::FileInfoReply { segment_count })?;
            }

            Message::SegmentList { name } => match self.registry.file(&name) {
                Some(file) => {
                    for hash in file.segments() {
                        self.outbox.send(
                            origin,
                            &Message::SegmentListReply { hash: hash.clone() },
                        )?;
                    }
                }
                None => tracing::warn!("Peer {} asked for hashes of unknown file {}", origin, name),
            },

            Message::JoinSwarm { name } => {
                self.registry.join(&name, origin);
                let peers = self.registry.members(&name);
                tracing::debug!("Peer {} joined swarm of {}: {:?}", origin, name, peers);
                self.outbox.send(origin, &Message::SwarmReply { peers })?;
            }

            Message::Completed { name } => {
                self.registry.join(&name, origin);
                tracing::info!("Peer {} is now seeding {}", origin, name);
            }

            Message::WorkerDone { node } => return self.record_finished(node),

            other => {
                tracing::warn!("Tracker ignoring {} from {}", other.kind(), origin);
            }
        }
        Ok(false)
    }

    fn record_finished(&mut self, node: NodeId) -> Result<bool, TrackerError> {
        if node.is_tracker() || node.as_u32() > self.peer_count {
            tracing::warn!("Ignoring completion notice for unknown node {}", node);
            return Ok(false);
        }
        if !self.finished.insert(node) {
            tracing::debug!("Duplicate completion notice from peer {}", node);
            return Ok(false);
        }

        tracing::info!(
            "Peer {} finished ({}/{})",
            node,
            self.finished.len(),
            self.peer_count
        );

        if self.finished.len() as u32 == self.peer_count {
            self.broadcast_terminate()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn broadcast_terminate(&mut self) -> Result<(), TrackerError> {
        for id in 1..=self.peer_count {
            self.outbox.send(NodeId::new(id), &Message::Terminate)?;
        }
        self.terminate_broadcasts += 1;
        tracing::info!("All peers finished, termination broadcast sent");
        Ok(())
    }

    fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            catalog_size: self.registry.file_count(),
            swarms: self.registry.snapshot(),
            finished_peers: self.finished.iter().copied().collect(),
            terminate_broadcasts: self.terminate_broadcasts,
        }
    }
}
