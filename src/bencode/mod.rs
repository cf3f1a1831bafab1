//! Bencoding: the self-delimited encoding used by `.torrent` files and tracker
//! replies.
//!
//! Strings are length-prefixed base ten followed by a colon and the string,
//! e.g. `4:spam` is `spam`. Integers are `i<digits>e`, e.g. `i3e` is `3` and
//! `i-3e` is `-3`; `i-0e` and any leading zero other than a lone `i0e` are
//! invalid. Lists are `l<value>*e`. Dictionaries are `d(<string><value>)*e`
//! with keys that must be strings, unique, and in ascending byte order.
use std::collections::HashMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// The maximum nesting depth a decoded value may have. Guards against stack
/// exhaustion on adversarial input (deeply nested lists/dicts).
pub const MAX_DEPTH: usize = 256;

/// A decoded bencode value.
///
/// Bencoding has four shapes: byte strings, integers, ordered lists, and
/// string-keyed dictionaries. Strings are kept as raw bytes rather than `str`
/// because bencoded strings (hashes, in particular) are not generally valid
/// UTF-8.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Errors produced while decoding or encoding bencoded data.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected byte {byte:#04x} at position {pos}")]
    UnexpectedByte { pos: usize, byte: u8 },

    #[error("invalid integer at position {pos}: {reason}")]
    InvalidInteger { pos: usize, reason: &'static str },

    #[error("string length prefix at position {pos} exceeds remaining input")]
    LengthOverflow { pos: usize },

    #[error("dictionary key at position {pos} is not a byte string")]
    NonStringKey { pos: usize },

    #[error("duplicate dictionary key {key:?} at position {pos}")]
    DuplicateKey { pos: usize, key: Vec<u8> },

    #[error("dictionary keys out of order at position {pos}: {previous:?} >= {key:?}")]
    KeysOutOfOrder {
        pos: usize,
        previous: Vec<u8>,
        key: Vec<u8>,
    },

    #[error("recursion limit ({MAX_DEPTH}) exceeded at position {pos}")]
    RecursionLimitExceeded { pos: usize },

    #[error("trailing garbage after top-level value, {remaining} byte(s) unconsumed")]
    TrailingGarbage { remaining: usize },

    #[error("cannot encode: {0}")]
    CannotEncodeType(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
