//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements communication with BitTorrent trackers, including:
//! - Announce requests and responses
//! - Peer parsing (compact and dictionary-model)
//! - Peer ID generation and percent-encoding helpers
//!
//! The tracker reply is bencoded, so it is decoded with the same
//! [`crate::bencode`] component used for metainfo files rather than a second
//! parser.
use crate::bencode::decoder::decode;
use crate::bencode::{BencodeError, BencodeValue};
use crate::torrent::TorrentFile;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Errors produced while announcing to a tracker or interpreting its reply.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker reported failure: {0}")]
    Failure(String),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("root value is not a dictionary")]
    RootNotDict,

    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("invalid data type for field: {0}")]
    InvalidFieldType(&'static str),

    #[error("compact peers string length ({0}) is not a multiple of 6")]
    InvalidCompactPeersLength(usize),

    #[error("dictionary-model peer has an unparseable ip: {0}")]
    InvalidPeerIp(String),

    #[error("dictionary-model peer port {0} is outside the valid range 1..=65535")]
    InvalidPeerPort(i64),

    #[error("request to tracker failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("announce URL is invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A client communicating with a BitTorrent tracker.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
    http: reqwest::blocking::Client,
}

/// The parameters for a tracker announce request.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub compact: bool,
    pub left: i64,
}

/// A peer received from the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

/// The parsed response from a tracker announce request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

impl Client {
    pub fn new(port: u16) -> TrackerResult<Self> {
        Ok(Self {
            peer_id: generate_peer_id(),
            port,
            http: reqwest::blocking::Client::new(),
        })
    }

    /// The 20-byte peer id this client presents to trackers, also suitable
    /// for the peer-wire handshake so both sides of the protocol see the
    /// same identity.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker and returns the peer list.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub fn announce(&self, torrent: &TorrentFile) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash: torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            compact: true,
            left: torrent.total_length(),
        };

        let mut url = url::Url::parse(&torrent.announce)?;
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            percent_encode(&request.info_hash),
            percent_encode(&request.peer_id),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
            request.compact as i32,
        );
        url.set_query(Some(&query));

        tracing::debug!(%url, "making announce request to tracker");
        let response = self.http.get(url).send()?;
        let response_bytes = response.bytes()?;
        parse_announce_response(&response_bytes)
    }
}

/// Parses the bencoded body of a tracker announce response.
///
/// Handles both peer encodings specified by the BitTorrent protocol:
/// - **Compact**: the `peers` value is a byte string, 6 bytes per peer (4
///   bytes of IPv4 address, 2 bytes big-endian port).
/// - **Dictionary model**: `peers` is a list of dictionaries each with `ip`
///   and `port`.
fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
    let root = decode(bytes)?;
    let dict = root.as_dict().ok_or(TrackerError::RootNotDict)?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()) {
        let reason = reason
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| "<non-string failure reason>".to_string());
        return Err(TrackerError::Failure(reason));
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or(TrackerError::MissingField("interval"))?;

    let peers = match dict.get(b"peers".as_slice()) {
        Some(BencodeValue::String(bytes)) => parse_compact_peers(bytes)?,
        Some(BencodeValue::List(list)) => parse_dictionary_peers(list)?,
        Some(_) => return Err(TrackerError::InvalidFieldType("peers")),
        None => return Err(TrackerError::MissingField("peers")),
    };

    Ok(AnnounceResponse { interval, peers })
}

fn parse_compact_peers(bytes: &[u8]) -> TrackerResult<Vec<Peer>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::InvalidCompactPeersLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Peer {
                ip: IpAddr::V4(ip),
                port,
            }
        })
        .collect())
}

fn parse_dictionary_peers(list: &[BencodeValue]) -> TrackerResult<Vec<Peer>> {
    list.iter()
        .map(|entry| {
            let dict = entry.as_dict().ok_or(TrackerError::InvalidFieldType("peers[]"))?;
            let ip_bytes = dict
                .get(b"ip".as_slice())
                .and_then(BencodeValue::as_bytes)
                .ok_or(TrackerError::MissingField("peers[].ip"))?;
            let ip_str = String::from_utf8_lossy(ip_bytes).into_owned();
            let ip = ip_str
                .parse::<IpAddr>()
                .map_err(|_| TrackerError::InvalidPeerIp(ip_str))?;
            let port = dict
                .get(b"port".as_slice())
                .and_then(BencodeValue::as_integer)
                .ok_or(TrackerError::MissingField("peers[].port"))?;
            if port < 1 || port > 65535 {
                return Err(TrackerError::InvalidPeerPort(port));
            }
            Ok(Peer {
                ip,
                port: port as u16,
            })
        })
        .collect()
}

/// Generates a peer ID: the 8-byte client prefix `-RT0001-` followed by 12
/// random bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// Percent-encodes `bytes` per RFC 3986, passing the unreserved set
/// (`A-Za-z0-9-._~`) through unchanged.
///
/// `info_hash` and `peer_id` are raw 20-byte values, not necessarily valid
/// UTF-8, so they are encoded manually here rather than through
/// [`url::Url::query_pairs_mut`], which assumes its inputs are already valid
/// strings and would double-encode or mangle non-UTF-8 bytes.
fn percent_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}
