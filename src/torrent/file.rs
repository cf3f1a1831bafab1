//! The `TorrentFile` type: a parsed single-file `.torrent` metainfo.
use super::info_hash::sha1_of;
use super::{MetainfoError, MetainfoResult};
use crate::bencode::decoder::decode_top_level_with_span;
use crate::bencode::BencodeValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A parsed single-file torrent metainfo file.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub announce: String,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub encoding: Option<String>,
    pub creation_date: Option<SystemTime>,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
}

/// The `info` sub-dictionary of a single-file torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: i64,
    pub length: i64,
    pub pieces: Vec<[u8; 20]>,
}

fn require_dict<'a>(
    dict: &'a std::collections::HashMap<Vec<u8>, BencodeValue>,
    key: &'static str,
) -> MetainfoResult<&'a BencodeValue> {
    dict.get(key.as_bytes()).ok_or(MetainfoError::MissingField(key))
}

fn as_string(value: &BencodeValue, field: &'static str) -> MetainfoResult<String> {
    let bytes = value
        .as_bytes()
        .ok_or(MetainfoError::InvalidFieldType(field))?
        .to_vec();
    String::from_utf8(bytes).map_err(|source| MetainfoError::NotUtf8 { field, source })
}

fn as_integer(value: &BencodeValue, field: &'static str) -> MetainfoResult<i64> {
    value.as_integer().ok_or(MetainfoError::InvalidFieldType(field))
}

/// Splits the `pieces` byte string into its 20-byte SHA-1 hashes.
fn parse_pieces(pieces_bytes: &[u8]) -> MetainfoResult<Vec<[u8; 20]>> {
    if pieces_bytes.is_empty() || pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidPiecesHashLength {
            len: pieces_bytes.len(),
        });
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| chunk.try_into().expect("chunks_exact(20) yields 20-byte slices"))
        .collect())
}

impl TorrentFile {
    /// Parses a `.torrent` file's raw bytes into a `TorrentFile`.
    ///
    /// The info-hash is computed from the exact byte span of the `info`
    /// sub-dictionary in `data`, not from a decode/re-encode round trip (see
    /// [`super::info_hash`]).
    #[tracing::instrument(skip(data), level = "debug")]
    pub fn parse(data: &[u8]) -> MetainfoResult<TorrentFile> {
        let (root, info_span) = decode_top_level_with_span(data, b"info")?;
        let BencodeValue::Dict(root) = root else {
            return Err(MetainfoError::RootNotDict);
        };

        let announce = as_string(require_dict(&root, "announce")?, "announce")?;

        let comment = match root.get(b"comment".as_slice()) {
            Some(v) => Some(as_string(v, "comment")?),
            None => None,
        };
        let created_by = match root.get(b"created by".as_slice()) {
            Some(v) => Some(as_string(v, "created by")?),
            None => None,
        };
        let encoding = match root.get(b"encoding".as_slice()) {
            Some(v) => Some(as_string(v, "encoding")?),
            None => None,
        };
        let creation_date = match root.get(b"creation date".as_slice()) {
            Some(v) => {
                let secs = as_integer(v, "creation date")?;
                let secs: u64 = secs
                    .try_into()
                    .map_err(|_| MetainfoError::InvalidFieldType("creation date"))?;
                Some(UNIX_EPOCH + Duration::from_secs(secs))
            }
            None => None,
        };

        let info_value = require_dict(&root, "info")?;
        let BencodeValue::Dict(info_map) = info_value else {
            return Err(MetainfoError::InvalidFieldType("info"));
        };

        let name = as_string(require_dict(info_map, "name")?, "name")?;
        let piece_length = as_integer(require_dict(info_map, "piece length")?, "piece length")?;
        if piece_length <= 0 {
            return Err(MetainfoError::NonPositivePieceLength(piece_length));
        }
        let pieces_bytes = require_dict(info_map, "pieces")?
            .as_bytes()
            .ok_or(MetainfoError::InvalidFieldType("pieces"))?;
        let pieces = parse_pieces(pieces_bytes)?;

        if info_map.contains_key(b"files".as_slice()) {
            return Err(MetainfoError::MultiFileUnsupported);
        }
        let length = as_integer(require_dict(info_map, "length")?, "length")?;

        let num_pieces = pieces.len();
        let full_pieces_length = (num_pieces as i64 - 1) * piece_length;
        if !(full_pieces_length < length && length <= num_pieces as i64 * piece_length) {
            return Err(MetainfoError::LengthPieceMismatch {
                length,
                num_pieces,
                piece_length,
            });
        }

        // `info_span` is always `Some` here: `require_dict` above already
        // confirmed the `info` key is present in the root dictionary, and
        // `decode_top_level_with_span` records the span of every occurrence
        // of the nominated key while walking the same dictionary.
        let info_span = info_span.expect("info key presence already validated above");
        let info_hash = sha1_of(&data[info_span]);

        Ok(TorrentFile {
            announce,
            comment,
            created_by,
            encoding,
            creation_date,
            info: InfoDict {
                name,
                piece_length,
                length,
                pieces,
            },
            info_hash,
        })
    }

    /// Total length of the single file, in bytes.
    pub fn total_length(&self) -> i64 {
        self.info.length
    }

    /// Number of pieces, derived from the length of `pieces`.
    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len()
    }

    /// Length of piece `index`: `piece_length` for all but the last piece,
    /// the residual for the last. Returns 0 for an out-of-range index.
    pub fn piece_length(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index + 1 < self.num_pieces() {
            self.info.piece_length
        } else {
            self.total_length() - index as i64 * self.info.piece_length
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_torrent(content: &[u8]) -> Vec<u8> {
        let hash = sha1_of(content);
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi");
        info.extend_from_slice(content.len().to_string().as_bytes());
        info.extend_from_slice(b"e4:name4:test12:piece lengthi16384e6:pieces20:");
        info.extend_from_slice(&hash);
        info.extend_from_slice(b"e");

        let mut torrent = Vec::new();
        torrent.extend_from_slice(b"d8:announce20:http://tracker.test/4:info");
        torrent.extend_from_slice(&info);
        torrent.extend_from_slice(b"e");
        torrent
    }

    #[test]
    fn parses_minimal_single_file_torrent() {
        let content = b"hello world";
        let data = sample_torrent(content);
        let tf = TorrentFile::parse(&data).unwrap();
        assert_eq!(tf.announce, "http://tracker.test/");
        assert_eq!(tf.info.name, "test");
        assert_eq!(tf.total_length(), content.len() as i64);
        assert_eq!(tf.num_pieces(), 1);
        assert_eq!(tf.info.pieces[0], sha1_of(content));
    }

    #[test]
    fn info_hash_matches_exact_span_not_a_reencoding() {
        let content = b"payload";
        let data = sample_torrent(content);
        let tf = TorrentFile::parse(&data).unwrap();

        // Recover the info dict span the same way the parser did, and check
        // the hash is over those literal bytes.
        let (_, span) = decode_top_level_with_span(&data, b"info").unwrap();
        let span = span.unwrap();
        assert_eq!(tf.info_hash, sha1_of(&data[span]));
    }

    #[test]
    fn rejects_multi_file_torrents() {
        let data = b"d8:announce4:http4:infod4:name4:test12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaa5:filesleee";
        assert!(matches!(
            TorrentFile::parse(data),
            Err(MetainfoError::MultiFileUnsupported)
        ));
    }

    #[test]
    fn rejects_pieces_length_not_multiple_of_20() {
        let data = b"d8:announce4:http4:infod4:name4:test12:piece lengthi16384e6:pieces3:abc6:lengthi1eee";
        assert!(matches!(
            TorrentFile::parse(data),
            Err(MetainfoError::InvalidPiecesHashLength { .. })
        ));
    }

    #[test]
    fn last_piece_length_is_the_residual() {
        let content = vec![7u8; 20_000];
        let hash0 = sha1_of(&content[0..16384]);
        let hash1 = sha1_of(&content[16384..]);
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi20000e4:name4:test12:piece lengthi16384e6:pieces40:");
        info.extend_from_slice(&hash0);
        info.extend_from_slice(&hash1);
        info.extend_from_slice(b"e");
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce4:http4:info");
        data.extend_from_slice(&info);
        data.extend_from_slice(b"e");

        let tf = TorrentFile::parse(&data).unwrap();
        assert_eq!(tf.num_pieces(), 2);
        assert_eq!(tf.piece_length(0), 16384);
        assert_eq!(tf.piece_length(1), 20_000 - 16384);
    }
}
