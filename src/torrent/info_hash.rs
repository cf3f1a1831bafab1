//! SHA-1 hashing of the raw info dictionary bytes.
//!
//! Deliberately does *not* take a decoded [`crate::bencode::BencodeValue`] and
//! re-encode it: for a non-canonical input (out-of-order keys, a leading
//! zero) that would silently "fix" the bytes before hashing them, producing
//! an info-hash that does not match what every other client on the swarm
//! computed. [`super::file::TorrentFile::parse`] instead slices the exact
//! substring of the original file that the `info` dictionary occupied (via
//! [`crate::bencode::decoder::decode_top_level_with_span`]) and hashes that.
use sha1::{Digest, Sha1};

/// SHA-1 of `data`, as the 20-byte info-hash.
pub fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_vector() {
        // SHA-1("") is the well-known empty-input digest.
        let got = sha1_of(b"");
        let expected = hex::decode("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert_eq!(got.to_vec(), expected);
    }
}
