//! Recursive-descent bencode decoder.
//!
//! The decoder operates on a byte slice with an explicit cursor rather than a
//! `Read` stream: the metainfo parser needs the exact byte span of the `info`
//! sub-dictionary to compute a faithful info-hash (see
//! [`decode_top_level_with_span`]), which is only cheap to recover if the
//! cursor position is addressable throughout the walk.
use super::{BencodeError, BencodeResult, BencodeValue, MAX_DEPTH};
use std::collections::HashMap;
use std::ops::Range;
use tracing::instrument;

/// A cursor over a byte slice being decoded as bencoding.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    /// Current byte offset of the cursor into the original input.
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.data.get(self.pos).copied().ok_or(BencodeError::UnexpectedEof)
    }

    fn advance(&mut self) -> BencodeResult<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_until(&mut self, delimiter: u8) -> BencodeResult<&'a [u8]> {
        let start = self.pos;
        loop {
            if self.peek()? == delimiter {
                let slice = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(slice);
            }
            self.pos += 1;
        }
    }

    /// Decodes a bencode byte string: `<length>:<bytes>`.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let start = self.pos;
        let len_bytes = self.read_until(b':')?;
        if len_bytes.is_empty() {
            return Err(BencodeError::InvalidInteger {
                pos: start,
                reason: "empty length prefix",
            });
        }
        if len_bytes.len() > 1 && len_bytes[0] == b'0' {
            return Err(BencodeError::InvalidInteger {
                pos: start,
                reason: "length prefix has a leading zero",
            });
        }
        if !len_bytes.iter().all(u8::is_ascii_digit) {
            return Err(BencodeError::InvalidInteger {
                pos: start,
                reason: "length prefix is not numeric",
            });
        }
        let len_str = std::str::from_utf8(len_bytes).expect("validated ASCII digits");
        let len: usize = len_str.parse().map_err(|_| BencodeError::InvalidInteger {
            pos: start,
            reason: "length prefix does not fit in usize",
        })?;
        if self.data.len() - self.pos < len {
            return Err(BencodeError::LengthOverflow { pos: start });
        }
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    /// Decodes a bencode integer: `i<digits>e`, with an optional leading `-`.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_integer(&mut self) -> BencodeResult<i64> {
        let tag_pos = self.pos;
        let tag = self.advance()?;
        if tag != b'i' {
            return Err(BencodeError::UnexpectedByte { pos: tag_pos, byte: tag });
        }
        let digits_pos = self.pos;
        let num_bytes = self.read_until(b'e')?;
        let num_str = std::str::from_utf8(num_bytes).map_err(|_| BencodeError::InvalidInteger {
            pos: digits_pos,
            reason: "integer is not valid UTF-8",
        })?;

        let (negative, digits) = match num_str.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, num_str),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BencodeError::InvalidInteger {
                pos: digits_pos,
                reason: "empty or non-digit integer",
            });
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(BencodeError::InvalidInteger {
                pos: digits_pos,
                reason: "leading zero",
            });
        }
        if negative && digits == "0" {
            return Err(BencodeError::InvalidInteger {
                pos: digits_pos,
                reason: "negative zero",
            });
        }
        num_str.parse::<i64>().map_err(|_| BencodeError::InvalidInteger {
            pos: digits_pos,
            reason: "integer overflows a 64-bit signed value",
        })
    }

    /// Decodes a bencode list: `l<value>*e`.
    #[instrument(skip(self), level = "trace")]
    fn decode_list(&mut self, depth: usize) -> BencodeResult<Vec<BencodeValue>> {
        let tag_pos = self.pos;
        let tag = self.advance()?;
        if tag != b'l' {
            return Err(BencodeError::UnexpectedByte { pos: tag_pos, byte: tag });
        }
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.decode_value_at_depth(depth + 1)?);
        }
    }

    /// Decodes the entries of a bencode dictionary: `d(<string><value>)*e`.
    ///
    /// Keys must be byte strings in strictly ascending order with no
    /// duplicates. When `capture_key` is given and a key equal to it is seen,
    /// the byte range of its value (relative to the original input) is
    /// returned alongside the map.
    #[instrument(skip(self, capture_key), level = "trace")]
    fn decode_dict_entries(
        &mut self,
        depth: usize,
        capture_key: Option<&[u8]>,
    ) -> BencodeResult<(HashMap<Vec<u8>, BencodeValue>, Option<Range<usize>>)> {
        let tag_pos = self.pos;
        let tag = self.advance()?;
        if tag != b'd' {
            return Err(BencodeError::UnexpectedByte { pos: tag_pos, byte: tag });
        }
        let mut map = HashMap::new();
        let mut last_key: Option<Vec<u8>> = None;
        let mut captured = None;
        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok((map, captured));
            }
            let key_pos = self.pos;
            match self.peek()? {
                b'0'..=b'9' => {}
                _ => return Err(BencodeError::NonStringKey { pos: key_pos }),
            }
            let key = self.decode_string()?;
            if let Some(previous) = &last_key {
                if key == *previous {
                    return Err(BencodeError::DuplicateKey { pos: key_pos, key });
                }
                if &key < previous {
                    return Err(BencodeError::KeysOutOfOrder {
                        pos: key_pos,
                        previous: previous.clone(),
                        key,
                    });
                }
            }
            let value_start = self.pos;
            let value = self.decode_value_at_depth(depth + 1)?;
            let value_end = self.pos;
            if capture_key == Some(key.as_slice()) {
                captured = Some(value_start..value_end);
            }
            last_key = Some(key.clone());
            map.insert(key, value);
        }
    }

    fn decode_value_at_depth(&mut self, depth: usize) -> BencodeResult<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::RecursionLimitExceeded { pos: self.pos });
        }
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list(depth).map(BencodeValue::List),
            b'd' => self
                .decode_dict_entries(depth, None)
                .map(|(map, _)| BencodeValue::Dict(map)),
            byte => Err(BencodeError::UnexpectedByte { pos: self.pos, byte }),
        }
    }

    /// Decodes one top-level value, without requiring the cursor to reach the
    /// end of input. Used internally; callers should prefer [`decode`].
    #[instrument(skip(self), level = "trace")]
    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        self.decode_value_at_depth(0)
    }
}

/// Decodes one top-level bencoded value, requiring that the entire input be
/// consumed.
#[instrument(skip(data), level = "debug")]
pub fn decode(data: &[u8]) -> BencodeResult<BencodeValue> {
    let mut decoder = Decoder::new(data);
    let value = decoder.decode_value()?;
    if decoder.pos() != data.len() {
        return Err(BencodeError::TrailingGarbage {
            remaining: data.len() - decoder.pos(),
        });
    }
    Ok(value)
}

/// Decodes a top-level bencoded dictionary, also recovering the exact byte
/// span of `capture_key`'s value as it appeared in `data`.
///
/// This is how the metainfo parser computes a faithful info-hash: instead of
/// decoding the `info` sub-dictionary and re-encoding it (which would silently
/// "fix" a non-canonical input before hashing it), the original bytes are
/// sliced out directly.
#[instrument(skip(data, capture_key), level = "debug")]
pub fn decode_top_level_with_span(
    data: &[u8],
    capture_key: &[u8],
) -> BencodeResult<(BencodeValue, Option<Range<usize>>)> {
    let mut decoder = Decoder::new(data);
    let tag_pos = decoder.pos();
    let tag = decoder.peek()?;
    if tag != b'd' {
        return Err(BencodeError::UnexpectedByte { pos: tag_pos, byte: tag });
    }
    let (map, span) = decoder.decode_dict_entries(0, Some(capture_key))?;
    if decoder.pos() != data.len() {
        return Err(BencodeError::TrailingGarbage {
            remaining: data.len() - decoder.pos(),
        });
    }
    Ok((BencodeValue::Dict(map), span))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_positive_and_negative_integers() {
        assert_eq!(decode(b"i42e").unwrap(), BencodeValue::Integer(42));
        assert_eq!(decode(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn rejects_malformed_integers() {
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"ie").is_err());
        assert!(decode(b"i-e").is_err());
        assert!(decode(b"i42").is_err());
    }

    #[test]
    fn decodes_strings() {
        assert_eq!(
            decode(b"5:hello").unwrap(),
            BencodeValue::String(b"hello".to_vec())
        );
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::String(Vec::new()));
    }

    #[test]
    fn rejects_string_length_overflow() {
        assert!(matches!(
            decode(b"10:short"),
            Err(BencodeError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn decodes_list() {
        let BencodeValue::List(items) = decode(b"li2ei3ee").unwrap() else {
            panic!("expected a list");
        };
        assert_eq!(items, vec![BencodeValue::Integer(2), BencodeValue::Integer(3)]);
    }

    #[test]
    fn decodes_dict_with_sorted_keys() {
        let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        let BencodeValue::Dict(map) = value else {
            panic!("expected a dict");
        };
        assert_eq!(map.get(b"cow".as_slice()).unwrap().as_bytes(), Some(b"moo".as_slice()));
        assert_eq!(map.get(b"spam".as_slice()).unwrap().as_bytes(), Some(b"eggs".as_slice()));
    }

    #[test]
    fn rejects_out_of_order_and_duplicate_keys() {
        assert!(matches!(
            decode(b"d4:spam4:eggs3:cow3:mooe"),
            Err(BencodeError::KeysOutOfOrder { .. })
        ));
        assert!(matches!(
            decode(b"d3:cow3:moo3:cow3:baae"),
            Err(BencodeError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn rejects_non_string_dict_keys() {
        assert!(matches!(
            decode(b"di1e3:fooe"),
            Err(BencodeError::NonStringKey { .. })
        ));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(matches!(
            decode(b"i1egarbage"),
            Err(BencodeError::TrailingGarbage { .. })
        ));
    }

    #[test]
    fn bounds_recursion_depth() {
        let nested: String = "l".repeat(300) + &"e".repeat(300);
        assert!(matches!(
            decode(nested.as_bytes()),
            Err(BencodeError::RecursionLimitExceeded { .. })
        ));
    }

    #[test]
    fn captures_span_of_nominated_key() {
        let input = b"d4:infod4:name4:spame6:numberi9ee";
        let (_, span) = decode_top_level_with_span(input, b"info").unwrap();
        let span = span.expect("info key present");
        assert_eq!(&input[span], &b"d4:name4:spame"[..]);
    }
}
