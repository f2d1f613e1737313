//! In-process point-to-point transport between swarm nodes.
//!
//! Messages are addressed by destination node and routed to one of the
//! destination's two lanes according to their kind. Every message is framed
//! through [`MessageCodec`] on send and decoded on receipt, so the codec sits
//! on every path a real wire would.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::NetworkConfig;
use crate::protocol::{Lane, Message, MessageCodec, MessageKind, NodeId, WireError};

/// Errors raised by the transport.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("No route to node {node} on the {lane:?} lane")]
    UnknownDestination { node: NodeId, lane: Lane },

    #[error("Mailbox of node {node} is disconnected")]
    Disconnected { node: NodeId },

    #[error("Node {node} waited {waited:?} on the {lane:?} lane without a matching message")]
    ReceiveTimeout {
        node: NodeId,
        lane: Lane,
        waited: Duration,
    },

    #[error("Expected {expected} but received {received}")]
    UnexpectedMessage {
        expected: MessageKind,
        received: MessageKind,
    },

    #[error("Undecodable frame: {0}")]
    Decode(#[from] WireError),
}

impl NetworkError {
    /// Builds the error for a reply whose kind does not match the request.
    pub fn unexpected(expected: MessageKind, received: &Message) -> Self {
        Self::UnexpectedMessage {
            expected,
            received: received.kind(),
        }
    }
}

/// Raw frame in flight.
struct Envelope {
    origin: NodeId,
    frame: Bytes,
}

/// Decoded message together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub origin: NodeId,
    pub message: Message,
}

type Routes = HashMap<(NodeId, Lane), mpsc::UnboundedSender<Envelope>>;

/// Builds the transport for a fixed set of nodes.
pub struct Network;

impl Network {
    /// Creates one endpoint per node, `0..world_size`, fully connected.
    ///
    /// Endpoint `i` belongs to node `i`; endpoint 0 is the tracker.
    pub fn connect(world_size: u32, config: &NetworkConfig) -> Vec<Endpoint> {
        let mut routes = Routes::new();
        let mut receivers = Vec::with_capacity(world_size as usize);

        for id in 0..world_size {
            let node = NodeId::new(id);
            let (request_tx, request_rx) = mpsc::unbounded_channel();
            let (reply_tx, reply_rx) = mpsc::unbounded_channel();
            routes.insert((node, Lane::Requests), request_tx);
            routes.insert((node, Lane::Replies), reply_tx);
            receivers.push((node, request_rx, reply_rx));
        }

        let routes = Arc::new(routes);
        receivers
            .into_iter()
            .map(|(node, request_rx, reply_rx)| Endpoint {
                outbox: Outbox {
                    node,
                    routes: Arc::clone(&routes),
                },
                // Request lanes idle until termination, so only replies are bounded.
                requests: Mailbox::new(node, Lane::Requests, request_rx, None),
                replies: Mailbox::new(node, Lane::Replies, reply_rx, config.receive_timeout),
            })
            .collect()
    }
}

/// Everything one node needs to talk to the rest of the swarm.
pub struct Endpoint {
    pub outbox: Outbox,
    pub requests: Mailbox,
    pub replies: Mailbox,
}

impl Endpoint {
    pub fn node(&self) -> NodeId {
        self.outbox.node
    }
}

/// Sending half of an endpoint. Cheap to clone, shared by a node's tasks.
#[derive(Clone)]
pub struct Outbox {
    node: NodeId,
    routes: Arc<Routes>,
}

impl Outbox {
    /// Node this outbox sends on behalf of.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Sends a message without waiting for the receiver.
    ///
    /// # Errors
    ///
    /// - `NetworkError::UnknownDestination` - If `destination` is not part of the network
    /// - `NetworkError::Disconnected` - If the destination lane has been dropped
    pub fn send(&self, destination: NodeId, message: &Message) -> Result<(), NetworkError> {
        let lane = message.kind().lane();
        let route = self
            .routes
            .get(&(destination, lane))
            .ok_or(NetworkError::UnknownDestination {
                node: destination,
                lane,
            })?;

        tracing::trace!("{} -> {}: {:?}", self.node, destination, message);

        route
            .send(Envelope {
                origin: self.node,
                frame: MessageCodec::encode(message),
            })
            .map_err(|_| NetworkError::Disconnected { node: destination })
    }
}

/// Receiving half of one lane.
///
/// Selective receives leave non-matching messages in a stash, in arrival
/// order, where later receives look first.
pub struct Mailbox {
    node: NodeId,
    lane: Lane,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    stash: VecDeque<Delivery>,
    receive_timeout: Option<Duration>,
}

impl Mailbox {
    fn new(
        node: NodeId,
        lane: Lane,
        receiver: mpsc::UnboundedReceiver<Envelope>,
        receive_timeout: Option<Duration>,
    ) -> Self {
        Self {
            node,
            lane,
            receiver,
            stash: VecDeque::new(),
            receive_timeout,
        }
    }

    /// Receives the next message from any sender.
    ///
    /// # Errors
    ///
    /// - `NetworkError::ReceiveTimeout` - If this is a reply lane with a
    ///   timeout configured and it elapses
    /// - `NetworkError::Decode` - If a frame cannot be decoded
    pub async fn recv_any(&mut self) -> Result<Delivery, NetworkError> {
        self.recv_matching(|_| true).await
    }

    /// Receives the next message of `kind` sent by `origin`.
    ///
    /// # Errors
    ///
    /// - `NetworkError::ReceiveTimeout` - If this is a reply lane with a
    ///   timeout configured and it elapses
    /// - `NetworkError::Decode` - If a frame cannot be decoded
    pub async fn recv_from(
        &mut self,
        origin: NodeId,
        kind: MessageKind,
    ) -> Result<Message, NetworkError> {
        let delivery = self
            .recv_matching(|delivery| delivery.origin == origin && delivery.message.kind() == kind)
            .await?;
        Ok(delivery.message)
    }

    /// Number of received messages still waiting for a matching receive.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    async fn recv_matching<F>(&mut self, matches: F) -> Result<Delivery, NetworkError>
    where
        F: Fn(&Delivery) -> bool,
    {
        if let Some(position) = self.stash.iter().position(&matches) {
            if let Some(delivery) = self.stash.remove(position) {
                return Ok(delivery);
            }
        }

        loop {
            let envelope = self.next_envelope().await?;
            let delivery = Delivery {
                origin: envelope.origin,
                message: MessageCodec::decode(&envelope.frame)?,
            };
            if matches(&delivery) {
                return Ok(delivery);
            }
            self.stash.push_back(delivery);
        }
    }

    async fn next_envelope(&mut self) -> Result<Envelope, NetworkError> {
        let next = match self.receive_timeout {
            Some(waited) => tokio::time::timeout(waited, self.receiver.recv())
                .await
                .map_err(|_| NetworkError::ReceiveTimeout {
                    node: self.node,
                    lane: self.lane,
                    waited,
                })?,
            None => self.receiver.recv().await,
        };
        next.ok_or(NetworkError::Disconnected { node: self.node })
    }
}
