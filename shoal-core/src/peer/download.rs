//! Download agent: acquires wanted files one at a time, segment by segment.

use std::sync::Arc;

use serde::Serialize;

use super::PeerError;
use super::state::{DownloadProgress, FileStage, SharedPeerState};
use crate::config::PeerConfig;
use crate::network::{Mailbox, NetworkError, Outbox};
use crate::protocol::{
    FileDescriptor, FileName, Message, MessageKind, NodeId, SegmentHash, SegmentIndex,
};
use crate::storage::SegmentSink;

/// How the acquisition of one wanted file ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Every segment acquired and persisted
    Completed { segments: u32, probes: u64 },
    /// The tracker reported no segments for this name
    NotFound,
}

/// Result of one wanted file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub name: FileName,
    pub outcome: FileOutcome,
    pub stage: FileStage,
    pub bitmap: Vec<bool>,
    pub hash_list: Vec<SegmentHash>,
}

impl FileReport {
    fn not_found(name: FileName) -> Self {
        Self {
            name,
            outcome: FileOutcome::NotFound,
            stage: FileStage::Unstarted,
            bitmap: Vec::new(),
            hash_list: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Completed { .. })
    }
}

/// Per-file results in wanted order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub files: Vec<FileReport>,
}

impl DownloadReport {
    pub fn file(&self, name: &FileName) -> Option<&FileReport> {
        self.files.iter().find(|file| &file.name == name)
    }
}

/// Round-robin cursor over a file's swarm.
///
/// The list may contain the downloading peer itself; it is kept for cursor
/// arithmetic but never selected.
#[derive(Debug, Clone)]
struct CandidateSet {
    own: NodeId,
    peers: Vec<NodeId>,
    cursor: usize,
}

impl CandidateSet {
    fn new(own: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            own,
            peers,
            cursor: 0,
        }
    }

    /// Number of candidates other than ourselves.
    fn remote_count(&self) -> usize {
        self.peers.iter().filter(|&&peer| peer != self.own).count()
    }

    /// Current candidate, moving the cursor past our own entry.
    fn select(&mut self) -> Option<NodeId> {
        for _ in 0..self.peers.len() {
            let peer = self.peers[self.cursor];
            if peer != self.own {
                return Some(peer);
            }
            self.advance();
        }
        None
    }

    fn advance(&mut self) {
        if !self.peers.is_empty() {
            self.cursor = (self.cursor + 1) % self.peers.len();
        }
    }

    /// Replaces the candidates, keeping the cursor position modulo the new length.
    fn replace(&mut self, peers: Vec<NodeId>) {
        self.cursor = if peers.is_empty() {
            0
        } else {
            self.cursor % peers.len()
        };
        self.peers = peers;
    }
}

/// Drives acquisition of every wanted file, then reports completion to the
/// tracker.
pub struct DownloadAgent<S> {
    node: NodeId,
    outbox: Outbox,
    replies: Mailbox,
    state: SharedPeerState,
    sink: Arc<S>,
    wanted: Vec<FileName>,
    max_probe_rounds: Option<u32>,
}

impl<S: SegmentSink> DownloadAgent<S> {
    pub fn new(
        outbox: Outbox,
        replies: Mailbox,
        state: SharedPeerState,
        sink: Arc<S>,
        wanted: Vec<FileName>,
        config: &PeerConfig,
    ) -> Self {
        Self {
            node: outbox.node(),
            outbox,
            replies,
            state,
            sink,
            wanted,
            max_probe_rounds: config.max_probe_rounds,
        }
    }

    /// Acquires the wanted files in order, never interleaving two files,
    /// then sends `WorkerDone`.
    ///
    /// # Errors
    ///
    /// - `PeerError::Network` - If the tracker or a candidate cannot be reached
    /// - `PeerError::Stalled` - If no candidate other than ourselves exists, or
    ///   the probe bound is exhausted for one segment
    /// - `PeerError::Storage` - If a completed file cannot be persisted
    pub async fn run(mut self) -> Result<DownloadReport, PeerError> {
        let wanted = std::mem::take(&mut self.wanted);
        let mut report = DownloadReport {
            files: Vec::with_capacity(wanted.len()),
        };

        for name in wanted {
            report.files.push(self.acquire(name).await?);
        }

        self.outbox
            .send(NodeId::TRACKER, &Message::WorkerDone { node: self.node })?;
        tracing::info!("Peer {} finished all downloads", self.node);
        Ok(report)
    }

    async fn acquire(&mut self, name: FileName) -> Result<FileReport, PeerError> {
        let segment_count = self.file_info(&name).await?;
        if segment_count == 0 {
            tracing::warn!("Peer {}: tracker does not know {}", self.node, name);
            return Ok(FileReport::not_found(name));
        }
        self.state
            .write()
            .await
            .begin_download(name.clone(), segment_count);
        tracing::debug!("Peer {}: {} has {} segments", self.node, name, segment_count);

        let mut candidates = CandidateSet::new(self.node, self.join_swarm(&name).await?);
        if candidates.remote_count() == 0 {
            return Err(PeerError::Stalled {
                file: name,
                reason: "no other peer in the swarm".to_string(),
            });
        }
        self.advance_stage(&name, FileStage::SwarmJoined).await;

        let hash_list = self.segment_list(&name, segment_count).await?;
        {
            let mut state = self.state.write().await;
            if let Some(progress) = state.progress_mut(&name) {
                progress.learn_hash_list(hash_list);
                progress.advance(FileStage::Acquiring);
            }
        }

        let mut probes = 0u64;
        let mut misses = 0u64;
        let mut refreshed = false;

        while let Some(segment) = self.next_missing(&name).await {
            let Some(candidate) = candidates.select() else {
                return Err(PeerError::Stalled {
                    file: name,
                    reason: "candidate set became empty".to_string(),
                });
            };

            probes += 1;
            if self.probe(candidate, &name, segment).await? {
                misses = 0;
                if let Some(progress) = self.state.write().await.progress_mut(&name) {
                    progress.mark_owned(segment);
                    tracing::debug!(
                        "Peer {} got {}#{} from {} ({}/{})",
                        self.node,
                        name,
                        segment,
                        candidate,
                        progress.owned_count(),
                        progress.segment_count()
                    );
                }

                if !refreshed {
                    refreshed = true;
                    candidates.replace(self.join_swarm(&name).await?);
                }
            } else {
                misses += 1;
                if let Some(limit) = self.max_probe_rounds {
                    let bound = u64::from(limit) * candidates.remote_count() as u64;
                    if misses >= bound {
                        return Err(PeerError::Stalled {
                            file: name,
                            reason: format!(
                                "segment {segment} refused by every candidate for {limit} rounds"
                            ),
                        });
                    }
                }
            }
            // Every query moves the cursor on, answered or not.
            candidates.advance();
        }

        let (bitmap, hash_list) = self
            .state
            .read()
            .await
            .progress(&name)
            .map(|progress| (progress.bitmap().to_vec(), progress.hash_list().to_vec()))
            .unwrap_or_default();
        let file = FileDescriptor::new(name.clone(), hash_list.clone());

        self.outbox
            .send(NodeId::TRACKER, &Message::Completed { name: name.clone() })?;
        self.sink.persist(self.node, &file).await?;
        let stage = {
            let mut state = self.state.write().await;
            state.publish(file);
            state.stage(&name)
        };

        tracing::info!(
            "Peer {} completed {} ({} segments, {} probes)",
            self.node,
            name,
            segment_count,
            probes
        );
        Ok(FileReport {
            name,
            outcome: FileOutcome::Completed {
                segments: segment_count,
                probes,
            },
            stage,
            bitmap,
            hash_list,
        })
    }

    async fn advance_stage(&self, name: &FileName, stage: FileStage) {
        if let Some(progress) = self.state.write().await.progress_mut(name) {
            progress.advance(stage);
        }
    }

    async fn next_missing(&self, name: &FileName) -> Option<SegmentIndex> {
        self.state
            .read()
            .await
            .progress(name)
            .and_then(DownloadProgress::next_missing)
    }

    async fn file_info(&mut self, name: &FileName) -> Result<u32, PeerError> {
        self.outbox
            .send(NodeId::TRACKER, &Message::FileInfo { name: name.clone() })?;
        match self
            .replies
            .recv_from(NodeId::TRACKER, MessageKind::FileInfoReply)
            .await?
        {
            Message::FileInfoReply { segment_count } => Ok(segment_count),
            other => Err(NetworkError::unexpected(MessageKind::FileInfoReply, &other).into()),
        }
    }

    async fn join_swarm(&mut self, name: &FileName) -> Result<Vec<NodeId>, PeerError> {
        self.outbox
            .send(NodeId::TRACKER, &Message::JoinSwarm { name: name.clone() })?;
        match self
            .replies
            .recv_from(NodeId::TRACKER, MessageKind::SwarmReply)
            .await?
        {
            Message::SwarmReply { peers } => Ok(peers),
            other => Err(NetworkError::unexpected(MessageKind::SwarmReply, &other).into()),
        }
    }

    /// Collects the hash list, which arrives as one message per segment.
    async fn segment_list(
        &mut self,
        name: &FileName,
        segment_count: u32,
    ) -> Result<Vec<SegmentHash>, PeerError> {
        self.outbox
            .send(NodeId::TRACKER, &Message::SegmentList { name: name.clone() })?;

        let mut hashes = Vec::with_capacity(segment_count as usize);
        for _ in 0..segment_count {
            match self
                .replies
                .recv_from(NodeId::TRACKER, MessageKind::SegmentListReply)
                .await?
            {
                Message::SegmentListReply { hash } => hashes.push(hash),
                other => {
                    return Err(
                        NetworkError::unexpected(MessageKind::SegmentListReply, &other).into(),
                    );
                }
            }
        }
        Ok(hashes)
    }

    async fn probe(
        &mut self,
        candidate: NodeId,
        name: &FileName,
        segment: SegmentIndex,
    ) -> Result<bool, PeerError> {
        self.outbox.send(
            candidate,
            &Message::AvailabilityQuery {
                name: name.clone(),
                segment,
            },
        )?;
        match self
            .replies
            .recv_from(candidate, MessageKind::AvailabilityReply)
            .await?
        {
            Message::AvailabilityReply { available } => Ok(available),
            other => Err(NetworkError::unexpected(MessageKind::AvailabilityReply, &other).into()),
        }
    }
}
