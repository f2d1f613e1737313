//! Message framing for the Shoal wire protocol
//!
//! A frame is one kind byte followed by the payload. Integers are big-endian
//! `u32`. Text fields occupy a fixed capacity: a one-byte length, the bytes
//! themselves, then zero padding up to the capacity.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::{
    FileDescriptor, FileName, Message, MessageKind, NodeId, ReplyToken, SegmentHash, SegmentIndex,
};
use super::{
    AVAILABLE_TOKEN, HASH_SIZE, MAX_FILE_NAME, REPLY_TOKEN_SIZE, TERMINATE_TOKEN,
    UNAVAILABLE_TOKEN, WireError,
};

/// Message serialization utilities for the Shoal wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes a message into a single frame.
    pub fn encode(message: &Message) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(message.kind().tag());

        match message {
            Message::InitDeclare { files } => {
                buf.put_u32(files.len() as u32);
                for file in files {
                    put_text(&mut buf, file.name().as_str(), MAX_FILE_NAME);
                    buf.put_u32(file.segment_count());
                    for hash in file.segments() {
                        put_text(&mut buf, hash.as_str(), HASH_SIZE);
                    }
                }
            }
            Message::InitAck { token } => {
                put_text(&mut buf, token.as_str(), REPLY_TOKEN_SIZE);
            }
            Message::FileInfo { name }
            | Message::JoinSwarm { name }
            | Message::SegmentList { name }
            | Message::Completed { name } => {
                put_text(&mut buf, name.as_str(), MAX_FILE_NAME);
            }
            Message::FileInfoReply { segment_count } => {
                buf.put_u32(*segment_count);
            }
            Message::SwarmReply { peers } => {
                buf.put_u32(peers.len() as u32);
                for peer in peers {
                    buf.put_u32(peer.as_u32());
                }
            }
            Message::SegmentListReply { hash } => {
                put_text(&mut buf, hash.as_str(), HASH_SIZE);
            }
            Message::AvailabilityQuery { name, segment } => {
                put_text(&mut buf, name.as_str(), MAX_FILE_NAME);
                buf.put_u32(segment.as_u32());
            }
            Message::AvailabilityReply { available } => {
                let token = if *available {
                    AVAILABLE_TOKEN
                } else {
                    UNAVAILABLE_TOKEN
                };
                put_text(&mut buf, token, REPLY_TOKEN_SIZE);
            }
            Message::WorkerDone { node } => {
                buf.put_u32(node.as_u32());
            }
            Message::Terminate => {
                buf.put_u32(TERMINATE_TOKEN);
            }
        }

        buf.freeze()
    }

    /// Deserializes a single frame.
    ///
    /// # Errors
    ///
    /// - `WireError::UnknownKind` - If the kind byte is not a known tag
    /// - `WireError::Truncated` - If the frame ends inside a field
    /// - `WireError::FieldTooLong` - If a text length exceeds its capacity
    /// - `WireError::UnexpectedToken` - If a fixed token has the wrong value
    /// - `WireError::TrailingBytes` - If bytes remain after the payload
    pub fn decode(frame: &[u8]) -> Result<Message, WireError> {
        let mut buf = frame;
        let kind = MessageKind::from_tag(read_u8(&mut buf, "message kind")?)?;

        let message = match kind {
            MessageKind::InitDeclare => {
                let file_count = read_u32(&mut buf, "file count")?;
                let mut files = Vec::new();
                for _ in 0..file_count {
                    let name = read_name(&mut buf)?;
                    let segment_count = read_u32(&mut buf, "segment count")?;
                    let mut segments = Vec::new();
                    for _ in 0..segment_count {
                        segments.push(read_hash(&mut buf)?);
                    }
                    files.push(FileDescriptor::new(name, segments));
                }
                Message::InitDeclare { files }
            }
            MessageKind::InitAck => {
                let token = read_text(&mut buf, "reply token", REPLY_TOKEN_SIZE)?;
                Message::InitAck {
                    token: ReplyToken::new(token)?,
                }
            }
            MessageKind::FileInfo => Message::FileInfo {
                name: read_name(&mut buf)?,
            },
            MessageKind::JoinSwarm => Message::JoinSwarm {
                name: read_name(&mut buf)?,
            },
            MessageKind::SegmentList => Message::SegmentList {
                name: read_name(&mut buf)?,
            },
            MessageKind::Completed => Message::Completed {
                name: read_name(&mut buf)?,
            },
            MessageKind::FileInfoReply => Message::FileInfoReply {
                segment_count: read_u32(&mut buf, "segment count")?,
            },
            MessageKind::SwarmReply => {
                let peer_count = read_u32(&mut buf, "peer count")?;
                let mut peers = Vec::new();
                for _ in 0..peer_count {
                    peers.push(NodeId::new(read_u32(&mut buf, "peer id")?));
                }
                Message::SwarmReply { peers }
            }
            MessageKind::SegmentListReply => Message::SegmentListReply {
                hash: read_hash(&mut buf)?,
            },
            MessageKind::AvailabilityQuery => {
                let name = read_name(&mut buf)?;
                let segment = SegmentIndex::new(read_u32(&mut buf, "segment index")?);
                Message::AvailabilityQuery { name, segment }
            }
            MessageKind::AvailabilityReply => {
                let token = read_text(&mut buf, "availability", REPLY_TOKEN_SIZE)?;
                let available = match token.as_str() {
                    AVAILABLE_TOKEN => true,
                    UNAVAILABLE_TOKEN => false,
                    _ => {
                        return Err(WireError::UnexpectedToken {
                            field: "availability",
                            token,
                        });
                    }
                };
                Message::AvailabilityReply { available }
            }
            MessageKind::WorkerDone => Message::WorkerDone {
                node: NodeId::new(read_u32(&mut buf, "node id")?),
            },
            MessageKind::Terminate => {
                let token = read_u32(&mut buf, "terminate token")?;
                if token != TERMINATE_TOKEN {
                    return Err(WireError::UnexpectedToken {
                        field: "terminate",
                        token: token.to_string(),
                    });
                }
                Message::Terminate
            }
        };

        if buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                kind,
                count: buf.remaining(),
            });
        }

        Ok(message)
    }
}

// Callers pass text already validated against `capacity`.
fn put_text(buf: &mut BytesMut, text: &str, capacity: usize) {
    buf.put_u8(text.len() as u8);
    buf.put_slice(text.as_bytes());
    buf.put_bytes(0, capacity - text.len());
}

fn read_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u32())
}

fn read_text(buf: &mut &[u8], field: &'static str, capacity: usize) -> Result<String, WireError> {
    let length = read_u8(buf, field)? as usize;
    if length > capacity {
        return Err(WireError::FieldTooLong {
            field,
            length,
            capacity,
        });
    }
    if buf.remaining() < capacity {
        return Err(WireError::Truncated { field });
    }

    let text = std::str::from_utf8(&buf.chunk()[..length])
        .map_err(|_| WireError::InvalidUtf8 { field })?
        .to_string();
    buf.advance(capacity);
    Ok(text)
}

fn read_name(buf: &mut &[u8]) -> Result<FileName, WireError> {
    FileName::new(read_text(buf, "file name", MAX_FILE_NAME)?)
}

fn read_hash(buf: &mut &[u8]) -> Result<SegmentHash, WireError> {
    SegmentHash::new(read_text(buf, "segment hash", HASH_SIZE)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Lane;

    fn name(value: &str) -> FileName {
        FileName::new(value).unwrap()
    }

    fn hash(value: &str) -> SegmentHash {
        SegmentHash::new(value).unwrap()
    }

    #[test]
    fn test_availability_query_layout() {
        let frame = MessageCodec::encode(&Message::AvailabilityQuery {
            name: name("movie.mp4"),
            segment: SegmentIndex::new(7),
        });

        // kind + length byte + name capacity + index
        assert_eq!(frame.len(), 1 + 1 + MAX_FILE_NAME + 4);
        assert_eq!(frame[0], MessageKind::AvailabilityQuery.tag());
        assert_eq!(frame[1] as usize, "movie.mp4".len());
        assert_eq!(&frame[2..11], b"movie.mp4");
        assert!(frame[11..2 + MAX_FILE_NAME].iter().all(|&b| b == 0));
        assert_eq!(&frame[frame.len() - 4..], &7u32.to_be_bytes());
    }

    #[test]
    fn test_init_declare_preserves_file_and_segment_order() {
        let files = vec![
            FileDescriptor::new(name("b.bin"), vec![hash("h1"), hash("h0")]),
            FileDescriptor::new(name("a.bin"), vec![hash("x")]),
        ];
        let message = Message::InitDeclare {
            files: files.clone(),
        };

        let decoded = MessageCodec::decode(&MessageCodec::encode(&message)).unwrap();
        let Message::InitDeclare { files: decoded } = decoded else {
            panic!("expected InitDeclare");
        };
        assert_eq!(decoded, files);
        assert_eq!(decoded[0].segments()[0].as_str(), "h1");
    }

    #[test]
    fn test_availability_reply_tokens() {
        let yes = MessageCodec::encode(&Message::AvailabilityReply { available: true });
        let no = MessageCodec::encode(&Message::AvailabilityReply { available: false });

        assert_eq!(&yes[2..3], AVAILABLE_TOKEN.as_bytes());
        assert_eq!(&no[2..3], UNAVAILABLE_TOKEN.as_bytes());
        assert_eq!(
            MessageCodec::decode(&no).unwrap(),
            Message::AvailabilityReply { available: false }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_availability_token() {
        let mut frame = MessageCodec::encode(&Message::AvailabilityReply { available: true }).to_vec();
        frame[2] = b'Q';

        let result = MessageCodec::decode(&frame);
        assert!(matches!(
            result,
            Err(WireError::UnexpectedToken { field: "availability", .. })
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        assert_eq!(
            MessageCodec::decode(&[11]),
            Err(WireError::UnknownKind { tag: 11 })
        );
    }

    #[test]
    fn test_decode_truncated_frame() {
        let frame = MessageCodec::encode(&Message::FileInfo {
            name: name("a.txt"),
        });

        let result = MessageCodec::decode(&frame[..frame.len() - 3]);
        assert_eq!(result, Err(WireError::Truncated { field: "file name" }));
        assert_eq!(
            MessageCodec::decode(&[]),
            Err(WireError::Truncated {
                field: "message kind"
            })
        );
    }

    #[test]
    fn test_decode_rejects_length_beyond_capacity() {
        let mut frame = MessageCodec::encode(&Message::Completed {
            name: name("a.txt"),
        })
        .to_vec();
        frame[1] = (MAX_FILE_NAME + 1) as u8;

        assert!(matches!(
            MessageCodec::decode(&frame),
            Err(WireError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut frame = MessageCodec::encode(&Message::Terminate).to_vec();
        frame.push(0);

        assert_eq!(
            MessageCodec::decode(&frame),
            Err(WireError::TrailingBytes {
                kind: MessageKind::Terminate,
                count: 1
            })
        );
    }

    #[test]
    fn test_terminate_token_is_checked() {
        let mut frame = MessageCodec::encode(&Message::Terminate).to_vec();
        frame[4] = 9;

        assert!(matches!(
            MessageCodec::decode(&frame),
            Err(WireError::UnexpectedToken { field: "terminate", .. })
        ));
    }

    #[test]
    fn test_oversized_fields_are_rejected_at_construction() {
        assert!(FileName::new("a-very-long-file-name.bin").is_err());
        assert!(SegmentHash::new("x".repeat(HASH_SIZE + 1)).is_err());
        assert!(SegmentHash::new("x".repeat(HASH_SIZE)).is_ok());
        assert_eq!(
            FileName::new(""),
            Err(WireError::EmptyField { field: "file name" })
        );
    }

    #[test]
    fn test_kind_lanes() {
        assert_eq!(MessageKind::AvailabilityQuery.lane(), Lane::Requests);
        assert_eq!(MessageKind::Terminate.lane(), Lane::Requests);
        assert_eq!(MessageKind::AvailabilityReply.lane(), Lane::Replies);
        assert_eq!(MessageKind::InitAck.lane(), Lane::Replies);
    }
}
