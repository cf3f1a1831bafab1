//! Peer-wire message framing.
//!
//! After the handshake, peers exchange a stream of length-prefixed frames: a
//! 4-byte big-endian length `N` followed by `N` bytes of payload. `N == 0` is
//! a keepalive with no payload. Otherwise `payload[0]` is the message type
//! and `payload[1..]` is type-specific.
use super::ProtocolError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Frames larger than this are rejected before allocation, guarding against a
/// misbehaving or malicious peer forcing an unbounded read.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

pub const CHUNK_SIZE: u32 = 1 << 14;

/// A single peer-wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Unknown { id: u8, payload: Vec<u8> },
}

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

impl Message {
    /// Reads one frame from `reader`, blocking until a full frame arrives.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
        let len = reader.read_u32::<BigEndian>()?;
        if len == 0 {
            return Ok(Message::KeepAlive);
        }
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { len });
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        let id = payload[0];
        let body = &payload[1..];

        Ok(match id {
            ID_CHOKE => Message::Choke,
            ID_UNCHOKE => Message::Unchoke,
            ID_INTERESTED => Message::Interested,
            ID_NOT_INTERESTED => Message::NotInterested,
            ID_HAVE => {
                if body.len() != 4 {
                    return Err(ProtocolError::MalformedMessage {
                        id,
                        reason: "have payload must be 4 bytes",
                    });
                }
                Message::Have {
                    piece_index: u32::from_be_bytes(body.try_into().unwrap()),
                }
            }
            ID_BITFIELD => Message::Bitfield(body.to_vec()),
            ID_REQUEST => {
                let (index, begin, length) = parse_triplet(body, id)?;
                Message::Request { index, begin, length }
            }
            ID_PIECE => {
                if body.len() < 8 {
                    return Err(ProtocolError::MalformedMessage {
                        id,
                        reason: "piece payload must be at least 8 bytes",
                    });
                }
                let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
                Message::Piece {
                    index,
                    begin,
                    block: body[8..].to_vec(),
                }
            }
            ID_CANCEL => {
                let (index, begin, length) = parse_triplet(body, id)?;
                Message::Cancel { index, begin, length }
            }
            other => Message::Unknown {
                id: other,
                payload: body.to_vec(),
            },
        })
    }

    /// Writes this message as a length-prefixed frame to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        match self {
            Message::KeepAlive => writer.write_u32::<BigEndian>(0)?,
            Message::Choke => write_frame(writer, ID_CHOKE, &[])?,
            Message::Unchoke => write_frame(writer, ID_UNCHOKE, &[])?,
            Message::Interested => write_frame(writer, ID_INTERESTED, &[])?,
            Message::NotInterested => write_frame(writer, ID_NOT_INTERESTED, &[])?,
            Message::Have { piece_index } => {
                write_frame(writer, ID_HAVE, &piece_index.to_be_bytes())?
            }
            Message::Bitfield(bits) => write_frame(writer, ID_BITFIELD, bits)?,
            Message::Request { index, begin, length } => {
                write_frame(writer, ID_REQUEST, &triplet_bytes(*index, *begin, *length))?
            }
            Message::Piece { index, begin, block } => {
                let mut payload = Vec::with_capacity(8 + block.len());
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
                write_frame(writer, ID_PIECE, &payload)?
            }
            Message::Cancel { index, begin, length } => {
                write_frame(writer, ID_CANCEL, &triplet_bytes(*index, *begin, *length))?
            }
            Message::Unknown { id, payload } => write_frame(writer, *id, payload)?,
        }
        Ok(())
    }
}

fn parse_triplet(body: &[u8], id: u8) -> Result<(u32, u32, u32), ProtocolError> {
    if body.len() != 12 {
        return Err(ProtocolError::MalformedMessage {
            id,
            reason: "request/cancel payload must be 12 bytes",
        });
    }
    let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
    let length = u32::from_be_bytes(body[8..12].try_into().unwrap());
    Ok((index, begin, length))
}

fn triplet_bytes(index: u32, begin: u32, length: u32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&index.to_be_bytes());
    buf[4..8].copy_from_slice(&begin.to_be_bytes());
    buf[8..12].copy_from_slice(&length.to_be_bytes());
    buf
}

fn write_frame<W: Write>(writer: &mut W, id: u8, body: &[u8]) -> Result<(), ProtocolError> {
    let len = 1 + body.len() as u32;
    writer.write_u32::<BigEndian>(len)?;
    writer.write_u8(id)?;
    writer.write_all(body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(msg: Message) {
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = Message::read_from(&mut cursor).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(Message::KeepAlive);
        roundtrip(Message::Choke);
        roundtrip(Message::Unchoke);
        roundtrip(Message::Interested);
        roundtrip(Message::NotInterested);
        roundtrip(Message::Have { piece_index: 7 });
        roundtrip(Message::Bitfield(vec![0xFF, 0x00]));
        roundtrip(Message::Request { index: 1, begin: 16384, length: 16384 });
        roundtrip(Message::Piece { index: 2, begin: 0, block: vec![1, 2, 3] });
        roundtrip(Message::Cancel { index: 1, begin: 0, length: 16384 });
    }

    #[test]
    fn decodes_unknown_message_type_without_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 99, &[1, 2, 3]).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = Message::read_from(&mut cursor).unwrap();
        assert_eq!(
            decoded,
            Message::Unknown {
                id: 99,
                payload: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn rejects_frame_exceeding_max_length() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_FRAME_LEN + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            Message::read_from(&mut cursor),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_malformed_have_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, ID_HAVE, &[1, 2]).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            Message::read_from(&mut cursor),
            Err(ProtocolError::MalformedMessage { id: ID_HAVE, .. })
        ));
    }
}
