//! Shoal wire protocol: message kinds, bounded field types and framing.
//!
//! Every exchange between the tracker and peers is one of a fixed set of
//! message kinds. Text fields have a fixed capacity on the wire and are
//! validated when constructed, so an oversized name or hash can never reach
//! the codec.

pub mod codec;
pub mod types;

pub use codec::MessageCodec;
pub use types::{
    FileDescriptor, FileName, Lane, Message, MessageKind, NodeId, ReplyToken, SegmentHash,
    SegmentIndex,
};

/// Capacity of a file name field in bytes.
pub const MAX_FILE_NAME: usize = 15;
/// Capacity of a segment hash token in bytes.
pub const HASH_SIZE: usize = 32;
/// Capacity of acknowledgment and availability reply tokens in bytes.
pub const REPLY_TOKEN_SIZE: usize = 8;

/// Token the tracker sends once a peer's declaration is consumed.
pub const ACK_TOKEN: &str = "ACK";
/// Availability reply meaning "segment present".
pub const AVAILABLE_TOKEN: &str = "D";
/// Availability reply meaning "segment absent".
pub const UNAVAILABLE_TOKEN: &str = "N";
/// Payload carried by the termination broadcast.
pub const TERMINATE_TOKEN: u32 = 1;

/// Errors raised while validating fields or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} is {length} bytes, capacity is {capacity}")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        capacity: usize,
    },

    #[error("Frame truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("Unknown message kind: {tag}")]
    UnknownKind { tag: u8 },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("Unexpected {field} token: {token}")]
    UnexpectedToken { field: &'static str, token: String },

    #[error("{count} trailing bytes after {kind} frame")]
    TrailingBytes { kind: MessageKind, count: usize },
}
