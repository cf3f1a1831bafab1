//! Torrent metainfo parsing and error handling.
//!
//! This module interprets a decoded [`crate::bencode::BencodeValue`] as a
//! typed single-file torrent description, including the info-hash.
use thiserror::Error;

pub mod file;
pub mod info_hash;

pub use file::TorrentFile;

/// Errors produced while interpreting a decoded bencode value as a torrent
/// metainfo file.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("root value is not a dictionary")]
    RootNotDict,

    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("invalid data type for field: {0}")]
    InvalidFieldType(&'static str),

    #[error("field {field} is not valid UTF-8: {source}")]
    NotUtf8 {
        field: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("pieces length ({len}) is not a positive multiple of 20")]
    InvalidPiecesHashLength { len: usize },

    #[error("piece length must be positive, got {0}")]
    NonPositivePieceLength(i64),

    #[error("multi-file torrents are not supported")]
    MultiFileUnsupported,

    #[error(
        "total length {length} is inconsistent with {num_pieces} piece(s) of {piece_length} bytes"
    )]
    LengthPieceMismatch {
        length: i64,
        num_pieces: usize,
        piece_length: i64,
    },
}

pub type MetainfoResult<T> = std::result::Result<T, MetainfoError>;
