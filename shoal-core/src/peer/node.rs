//! Peer lifecycle: declaration handshake, then the two agents side by side.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::{AbortHandle, JoinError};
use tracing::Instrument;

use super::PeerError;
use super::download::{DownloadAgent, DownloadReport};
use super::state::PeerState;
use super::upload::{UploadAgent, UploadReport};
use crate::bootstrap::PeerManifest;
use crate::config::PeerConfig;
use crate::network::{Endpoint, NetworkError};
use crate::protocol::{ACK_TOKEN, FileName, Message, MessageKind, NodeId};
use crate::storage::SegmentSink;

/// What a peer did during a run.
#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub node: NodeId,
    /// Owned set at shutdown: declared files followed by completed ones
    pub owned_files: Vec<FileName>,
    pub downloads: DownloadReport,
    pub uploads: UploadReport,
}

/// One non-tracker node.
pub struct PeerNode<S> {
    endpoint: Endpoint,
    manifest: PeerManifest,
    config: PeerConfig,
    sink: Arc<S>,
}

impl<S: SegmentSink + 'static> PeerNode<S> {
    pub fn new(endpoint: Endpoint, manifest: PeerManifest, config: PeerConfig, sink: Arc<S>) -> Self {
        Self {
            endpoint,
            manifest,
            config,
            sink,
        }
    }

    /// Declares owned files, waits for the tracker's acknowledgment, then runs
    /// the download and upload agents until both stop.
    ///
    /// Whichever agent fails first takes the other one down with it.
    ///
    /// # Errors
    ///
    /// - `PeerError::ProtocolViolation` - If the acknowledgment token is not the expected one
    /// - `PeerError::TaskFailed` - If an agent task panicked or was cancelled
    /// - Any error returned by either agent
    pub async fn run(self) -> Result<PeerReport, PeerError> {
        let Self {
            endpoint,
            manifest,
            config,
            sink,
        } = self;
        let Endpoint {
            outbox,
            requests,
            mut replies,
        } = endpoint;
        let node = outbox.node();

        outbox.send(
            NodeId::TRACKER,
            &Message::InitDeclare {
                files: manifest.owned.clone(),
            },
        )?;
        match replies.recv_from(NodeId::TRACKER, MessageKind::InitAck).await? {
            Message::InitAck { token } if token.as_str() == ACK_TOKEN => {}
            Message::InitAck { token } => {
                return Err(PeerError::ProtocolViolation {
                    expected: ACK_TOKEN.to_string(),
                    received: token.to_string(),
                });
            }
            other => return Err(NetworkError::unexpected(MessageKind::InitAck, &other).into()),
        }
        tracing::debug!("Peer {} registered {} files", node, manifest.owned.len());
        let wanted_count = manifest.wanted.len();

        let state = PeerState::new(manifest.owned).shared();

        let mut upload = tokio::spawn(
            UploadAgent::new(
                outbox.clone(),
                requests,
                Arc::clone(&state),
                config.availability,
            )
            .run()
            .instrument(tracing::debug_span!("upload")),
        );
        let mut download = tokio::spawn(
            DownloadAgent::new(
                outbox,
                replies,
                Arc::clone(&state),
                sink,
                manifest.wanted,
                &config,
            )
            .run()
            .instrument(tracing::debug_span!("download", wanted = %wanted_count)),
        );
        let upload_abort = upload.abort_handle();
        let download_abort = download.abort_handle();

        let (downloads, uploads) = tokio::select! {
            joined = &mut download => {
                let downloads = settle("download", joined, &upload_abort)?;
                (downloads, settle("upload", upload.await, &download_abort)?)
            }
            joined = &mut upload => {
                let uploads = settle("upload", joined, &download_abort)?;
                (settle("download", download.await, &upload_abort)?, uploads)
            }
        };

        let owned_files = state.read().await.owned_names();
        Ok(PeerReport {
            node,
            owned_files,
            downloads,
            uploads,
        })
    }
}

/// Unwraps one agent's result, aborting its sibling when it failed.
fn settle<T>(
    role: &'static str,
    joined: Result<Result<T, PeerError>, JoinError>,
    sibling: &AbortHandle,
) -> Result<T, PeerError> {
    let outcome = joined.map_err(|error| task_failed(role, error)).and_then(|result| result);
    if let Err(error) = &outcome {
        tracing::warn!("{} agent failed, stopping the other: {}", role, error);
        sibling.abort();
    }
    outcome
}

fn task_failed(role: &'static str, error: JoinError) -> PeerError {
    PeerError::TaskFailed {
        role,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::NetworkConfig;
    use crate::network::Network;
    use crate::protocol::{ReplyToken, SegmentIndex};
    use crate::storage::MemorySink;

    #[tokio::test]
    async fn test_wrong_acknowledgment_is_a_protocol_violation() {
        let mut endpoints = Network::connect(2, &NetworkConfig::default());
        let peer = endpoints.pop().unwrap();
        let mut tracker = endpoints.pop().unwrap();
        let peer_node = peer.node();

        let node = PeerNode::new(
            peer,
            PeerManifest::default(),
            PeerConfig::default(),
            Arc::new(MemorySink::new()),
        );
        let handle = tokio::spawn(node.run());

        let declared = tracker
            .requests
            .recv_from(peer_node, MessageKind::InitDeclare)
            .await
            .unwrap();
        assert_eq!(declared, Message::InitDeclare { files: vec![] });
        tracker
            .outbox
            .send(
                peer_node,
                &Message::InitAck {
                    token: ReplyToken::new("NOPE").unwrap(),
                },
            )
            .unwrap();

        let result = handle.await.unwrap();
        match result {
            Err(PeerError::ProtocolViolation { expected, received }) => {
                assert_eq!(expected, "ACK");
                assert_eq!(received, "NOPE");
            }
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_without_wants_serves_until_terminate() {
        let mut endpoints = Network::connect(2, &NetworkConfig::default());
        let peer = endpoints.pop().unwrap();
        let mut tracker = endpoints.pop().unwrap();
        let peer_node = peer.node();

        let node = PeerNode::new(
            peer,
            PeerManifest::default(),
            PeerConfig::default(),
            Arc::new(MemorySink::new()),
        );
        let handle = tokio::spawn(node.run());

        tracker
            .requests
            .recv_from(peer_node, MessageKind::InitDeclare)
            .await
            .unwrap();
        tracker
            .outbox
            .send(
                peer_node,
                &Message::InitAck {
                    token: ReplyToken::ack(),
                },
            )
            .unwrap();

        let done = tracker
            .requests
            .recv_from(peer_node, MessageKind::WorkerDone)
            .await
            .unwrap();
        assert_eq!(done, Message::WorkerDone { node: peer_node });
        tracker.outbox.send(peer_node, &Message::Terminate).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.node, peer_node);
        assert!(report.downloads.files.is_empty());
        assert_eq!(report.uploads.queries_answered, 0);
    }

    #[tokio::test]
    async fn test_upload_failure_stops_a_blocked_download() {
        let mut endpoints = Network::connect(3, &NetworkConfig::default());
        let Endpoint {
            outbox: rogue_outbox,
            replies: rogue_replies,
            ..
        } = endpoints.pop().unwrap();
        let peer = endpoints.pop().unwrap();
        let mut tracker = endpoints.pop().unwrap();
        let peer_node = peer.node();

        let manifest = PeerManifest::new(vec![], vec![FileName::new("movie.mp4").unwrap()]);
        let node = PeerNode::new(
            peer,
            manifest,
            PeerConfig::default(),
            Arc::new(MemorySink::new()),
        );
        let handle = tokio::spawn(node.run());

        tracker
            .requests
            .recv_from(peer_node, MessageKind::InitDeclare)
            .await
            .unwrap();
        tracker
            .outbox
            .send(
                peer_node,
                &Message::InitAck {
                    token: ReplyToken::ack(),
                },
            )
            .unwrap();
        // The tracker never answers, so the download agent stays blocked.
        tracker
            .requests
            .recv_from(peer_node, MessageKind::FileInfo)
            .await
            .unwrap();

        // The querying node has gone away, so the answer cannot be delivered.
        drop(rogue_replies);
        rogue_outbox
            .send(
                peer_node,
                &Message::AvailabilityQuery {
                    name: FileName::new("movie.mp4").unwrap(),
                    segment: SegmentIndex::new(0),
                },
            )
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("peer kept running after its upload agent failed")
            .unwrap();
        match result {
            Err(PeerError::Network(NetworkError::Disconnected { node })) => {
                assert_eq!(node, rogue_outbox.node());
            }
            other => panic!("expected disconnected reply lane, got {other:?}"),
        }
    }
}
