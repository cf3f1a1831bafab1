//! The BitTorrent peer handshake: the first 68 bytes exchanged on a new
//! peer connection, establishing protocol identity and the torrent both
//! sides are talking about.
use super::ProtocolError;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A parsed 68-byte handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into its fixed 68-byte wire form.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads a handshake from a blocking reader. Does not check the
    /// info-hash against an expectation; see [`Handshake::read_and_validate`].
    #[instrument(level = "trace", skip(reader))]
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut buf = [0u8; 68];
        reader.read_exact(&mut buf)?;

        if buf[0] != 19 || &buf[1..20] != PROTOCOL {
            return Err(ProtocolError::HandshakeMismatch);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Reads a handshake and checks its info-hash against `expected_info_hash`.
    pub fn read_and_validate<R: Read>(
        reader: &mut R,
        expected_info_hash: [u8; 20],
    ) -> Result<Self, ProtocolError> {
        let handshake = Self::read(reader)?;
        if handshake.info_hash != expected_info_hash {
            return Err(ProtocolError::HandshakeMismatch);
        }
        Ok(handshake)
    }

    /// Dials `peer_addr`, exchanges handshakes, and returns the connected
    /// stream plus the peer's handshake (already validated against
    /// `info_hash`).
    #[instrument(level = "debug", skip(peer_id))]
    pub fn connect(
        peer_addr: &str,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake), ProtocolError> {
        let mut stream = TcpStream::connect(peer_addr)?;
        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize())?;
        let theirs = Handshake::read_and_validate(&mut stream, info_hash)?;
        Ok((stream, theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn serializes_to_68_bytes_in_the_documented_layout() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];
        let bytes = Handshake::new(info_hash, peer_id).serialize();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &info_hash);
        assert_eq!(&bytes[48..68], &peer_id);
    }

    #[test]
    fn roundtrips_through_read() {
        let info_hash = [9u8; 20];
        let peer_id = [8u8; 20];
        let bytes = Handshake::new(info_hash, peer_id).serialize();
        let mut cursor = Cursor::new(bytes);
        let parsed = Handshake::read(&mut cursor).unwrap();
        assert_eq!(parsed.info_hash, info_hash);
        assert_eq!(parsed.peer_id, peer_id);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new([0u8; 20], [0u8; 20]).serialize();
        bytes[1] = b'X';
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            Handshake::read(&mut cursor),
            Err(ProtocolError::HandshakeMismatch)
        ));
    }

    #[test]
    fn read_and_validate_rejects_info_hash_mismatch() {
        let bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            Handshake::read_and_validate(&mut cursor, [9u8; 20]),
            Err(ProtocolError::HandshakeMismatch)
        ));
    }
}
