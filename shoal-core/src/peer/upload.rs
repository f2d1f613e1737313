//! Upload agent: answers availability queries until termination.

use serde::Serialize;

use super::PeerError;
use super::state::SharedPeerState;
use crate::config::AvailabilityPolicy;
use crate::network::{Delivery, Mailbox, Outbox};
use crate::protocol::Message;

/// Counters kept by the upload agent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub queries_answered: u64,
    pub affirmative_answers: u64,
}

/// Serves a peer's request lane.
pub struct UploadAgent {
    outbox: Outbox,
    requests: Mailbox,
    state: SharedPeerState,
    policy: AvailabilityPolicy,
}

impl UploadAgent {
    pub fn new(
        outbox: Outbox,
        requests: Mailbox,
        state: SharedPeerState,
        policy: AvailabilityPolicy,
    ) -> Self {
        Self {
            outbox,
            requests,
            state,
            policy,
        }
    }

    /// Answers queries against the current owned set until the tracker
    /// broadcasts termination.
    ///
    /// # Errors
    ///
    /// - `PeerError::Network` - If a receive fails or a reply cannot be delivered
    pub async fn run(mut self) -> Result<UploadReport, PeerError> {
        let node = self.outbox.node();
        let mut report = UploadReport::default();

        loop {
            let Delivery { origin, message } = self.requests.recv_any().await?;
            match message {
                Message::Terminate if origin.is_tracker() => {
                    tracing::debug!("Peer {} upload agent terminating", node);
                    return Ok(report);
                }
                Message::AvailabilityQuery { name, segment } => {
                    let available = self.state.read().await.can_serve(&name, segment, self.policy);
                    self.outbox
                        .send(origin, &Message::AvailabilityReply { available })?;

                    report.queries_answered += 1;
                    if available {
                        report.affirmative_answers += 1;
                    }
                    tracing::trace!(
                        "Peer {} answered {} for {}#{} from {}",
                        node,
                        available,
                        name,
                        segment,
                        origin
                    );
                }
                other => {
                    tracing::warn!("Peer {} ignoring {} from {}", node, other.kind(), origin);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::network::Network;
    use crate::peer::state::PeerState;
    use crate::protocol::{FileDescriptor, FileName, MessageKind, NodeId, SegmentHash, SegmentIndex};

    fn name(value: &str) -> FileName {
        FileName::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_answers_queries_until_terminate() {
        let mut endpoints = Network::connect(3, &NetworkConfig::default());
        let mut asker = endpoints.pop().unwrap();
        let server = endpoints.pop().unwrap();
        let tracker = endpoints.pop().unwrap();

        let movie = FileDescriptor::new(
            name("movie.mp4"),
            vec![SegmentHash::new("h0").unwrap(), SegmentHash::new("h1").unwrap()],
        );
        let state = PeerState::new(vec![movie]).shared();
        let agent = UploadAgent::new(
            server.outbox.clone(),
            server.requests,
            state,
            AvailabilityPolicy::CompleteFilesOnly,
        );
        let handle = tokio::spawn(agent.run());

        let queries = [("movie.mp4", 1, true), ("movie.mp4", 2, false), ("other", 0, false)];
        for (file, index, expected) in queries {
            asker
                .outbox
                .send(
                    server.outbox.node(),
                    &Message::AvailabilityQuery {
                        name: name(file),
                        segment: SegmentIndex::new(index),
                    },
                )
                .unwrap();
            let reply = asker
                .replies
                .recv_from(server.outbox.node(), MessageKind::AvailabilityReply)
                .await
                .unwrap();
            assert_eq!(reply, Message::AvailabilityReply { available: expected });
        }

        tracker
            .outbox
            .send(server.outbox.node(), &Message::Terminate)
            .unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.queries_answered, 3);
        assert_eq!(report.affirmative_answers, 1);
        assert_eq!(asker.outbox.node(), NodeId::new(2));
    }

    #[tokio::test]
    async fn test_terminate_from_a_peer_is_ignored() {
        let mut endpoints = Network::connect(3, &NetworkConfig::default());
        let mut asker = endpoints.pop().unwrap();
        let server = endpoints.pop().unwrap();
        let server_node = server.node();
        let state = PeerState::new(vec![]).shared();
        let handle = tokio::spawn(
            UploadAgent::new(
                server.outbox,
                server.requests,
                state,
                AvailabilityPolicy::CompleteFilesOnly,
            )
            .run(),
        );

        asker.outbox.send(server_node, &Message::Terminate).unwrap();
        asker
            .outbox
            .send(
                server_node,
                &Message::AvailabilityQuery {
                    name: name("a"),
                    segment: SegmentIndex::new(0),
                },
            )
            .unwrap();

        // Still serving after the bogus terminate.
        let reply = asker
            .replies
            .recv_from(server_node, MessageKind::AvailabilityReply)
            .await
            .unwrap();
        assert_eq!(reply, Message::AvailabilityReply { available: false });

        endpoints[0].outbox.send(server_node, &Message::Terminate).unwrap();
        handle.await.unwrap().unwrap();
    }
}
