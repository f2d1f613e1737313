//! Core types and enumerations for the Shoal wire protocol

use std::fmt;

use serde::Serialize;

use super::{HASH_SIZE, MAX_FILE_NAME, REPLY_TOKEN_SIZE, WireError};

/// Identifier of a process taking part in the swarm.
///
/// Node 0 is always the tracker. Peers are numbered from 1 upwards and the
/// numbering doubles as the order in which the tracker consumes declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The rendezvous node holding the file catalog.
    pub const TRACKER: NodeId = NodeId(0);

    /// Creates a node identifier.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying identifier.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the tracker node.
    pub fn is_tracker(self) -> bool {
        self == Self::TRACKER
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validates a bounded text field shared by all fixed-capacity types.
fn bounded(value: String, field: &'static str, capacity: usize) -> Result<String, WireError> {
    if value.is_empty() {
        return Err(WireError::EmptyField { field });
    }
    if value.len() > capacity {
        return Err(WireError::FieldTooLong {
            field,
            length: value.len(),
            capacity,
        });
    }
    Ok(value)
}

/// Name of a distributed file, at most [`MAX_FILE_NAME`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileName(String);

impl FileName {
    /// Creates a file name.
    ///
    /// # Errors
    ///
    /// - `WireError::EmptyField` - If the name is empty
    /// - `WireError::FieldTooLong` - If the name exceeds the wire capacity
    pub fn new(name: impl Into<String>) -> Result<Self, WireError> {
        bounded(name.into(), "file name", MAX_FILE_NAME).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity token of one segment, at most [`HASH_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SegmentHash(String);

impl SegmentHash {
    /// Creates a segment hash token.
    ///
    /// # Errors
    ///
    /// - `WireError::EmptyField` - If the token is empty
    /// - `WireError::FieldTooLong` - If the token exceeds the wire capacity
    pub fn new(token: impl Into<String>) -> Result<Self, WireError> {
        bounded(token.into(), "segment hash", HASH_SIZE).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short fixed-capacity token used by acknowledgment replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyToken(String);

impl ReplyToken {
    /// Creates a reply token.
    ///
    /// # Errors
    ///
    /// - `WireError::EmptyField` - If the token is empty
    /// - `WireError::FieldTooLong` - If the token exceeds the wire capacity
    pub fn new(token: impl Into<String>) -> Result<Self, WireError> {
        bounded(token.into(), "reply token", REPLY_TOKEN_SIZE).map(Self)
    }

    /// The acknowledgment token sent at the end of the setup phase.
    pub fn ack() -> Self {
        Self(super::ACK_TOKEN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-based position of a segment within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentIndex(u32);

impl SegmentIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog entry for one file.
///
/// The segment count is always the length of the hash list, so the two can
/// never disagree. Descriptors are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    name: FileName,
    segments: Vec<SegmentHash>,
}

impl FileDescriptor {
    pub fn new(name: FileName, segments: Vec<SegmentHash>) -> Self {
        Self { name, segments }
    }

    pub fn name(&self) -> &FileName {
        &self.name
    }

    /// Ordered segment hash tokens.
    pub fn segments(&self) -> &[SegmentHash] {
        &self.segments
    }

    pub fn segment_count(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Returns true if `index` addresses a segment of this file.
    pub fn contains_segment(&self, index: SegmentIndex) -> bool {
        index.as_usize() < self.segments.len()
    }
}

/// Which receiving task of a node consumes a message kind.
///
/// Request kinds are serviced by the node's serving loop (the tracker control
/// loop, or a peer's upload agent). Reply kinds are awaited by whoever issued
/// the matching request (a peer's download agent or its bootstrap step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Requests,
    Replies,
}

/// Discriminant of every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    InitDeclare = 0,
    InitAck = 1,
    JoinSwarm = 2,
    SwarmReply = 3,
    SegmentList = 4,
    SegmentListReply = 5,
    Completed = 6,
    FileInfo = 7,
    FileInfoReply = 8,
    AvailabilityQuery = 9,
    AvailabilityReply = 10,
    WorkerDone = 12,
    Terminate = 13,
}

impl MessageKind {
    /// Wire tag of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a wire tag back to its kind.
    ///
    /// # Errors
    ///
    /// - `WireError::UnknownKind` - If no kind uses `tag`
    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        let kind = match tag {
            0 => Self::InitDeclare,
            1 => Self::InitAck,
            2 => Self::JoinSwarm,
            3 => Self::SwarmReply,
            4 => Self::SegmentList,
            5 => Self::SegmentListReply,
            6 => Self::Completed,
            7 => Self::FileInfo,
            8 => Self::FileInfoReply,
            9 => Self::AvailabilityQuery,
            10 => Self::AvailabilityReply,
            12 => Self::WorkerDone,
            13 => Self::Terminate,
            _ => return Err(WireError::UnknownKind { tag }),
        };
        Ok(kind)
    }

    pub fn lane(self) -> Lane {
        match self {
            Self::InitAck
            | Self::SwarmReply
            | Self::SegmentListReply
            | Self::FileInfoReply
            | Self::AvailabilityReply => Lane::Replies,
            Self::InitDeclare
            | Self::JoinSwarm
            | Self::SegmentList
            | Self::Completed
            | Self::FileInfo
            | Self::AvailabilityQuery
            | Self::WorkerDone
            | Self::Terminate => Lane::Requests,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Messages exchanged between the tracker and peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Peer declares the files it owns at startup
    InitDeclare { files: Vec<FileDescriptor> },
    /// Tracker confirms a declaration was consumed
    InitAck { token: ReplyToken },
    /// Peer asks for the segment count of a file
    FileInfo { name: FileName },
    /// Segment count, 0 when the file is unknown
    FileInfoReply { segment_count: u32 },
    /// Peer joins a file's swarm and asks for its members
    JoinSwarm { name: FileName },
    /// Swarm members in insertion order
    SwarmReply { peers: Vec<NodeId> },
    /// Peer asks for the hash list of a file
    SegmentList { name: FileName },
    /// One hash token; a full list is sent as one message per segment
    SegmentListReply { hash: SegmentHash },
    /// Peer reports it holds a complete copy of a file
    Completed { name: FileName },
    /// Peer asks another peer whether it can serve a segment
    AvailabilityQuery {
        name: FileName,
        segment: SegmentIndex,
    },
    /// Answer to an availability query
    AvailabilityReply { available: bool },
    /// Peer finished every wanted file
    WorkerDone { node: NodeId },
    /// Tracker tells every peer to stop serving
    Terminate,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::InitDeclare { .. } => MessageKind::InitDeclare,
            Message::InitAck { .. } => MessageKind::InitAck,
            Message::FileInfo { .. } => MessageKind::FileInfo,
            Message::FileInfoReply { .. } => MessageKind::FileInfoReply,
            Message::JoinSwarm { .. } => MessageKind::JoinSwarm,
            Message::SwarmReply { .. } => MessageKind::SwarmReply,
            Message::SegmentList { .. } => MessageKind::SegmentList,
            Message::SegmentListReply { .. } => MessageKind::SegmentListReply,
            Message::Completed { .. } => MessageKind::Completed,
            Message::AvailabilityQuery { .. } => MessageKind::AvailabilityQuery,
            Message::AvailabilityReply { .. } => MessageKind::AvailabilityReply,
            Message::WorkerDone { .. } => MessageKind::WorkerDone,
            Message::Terminate => MessageKind::Terminate,
        }
    }
}
