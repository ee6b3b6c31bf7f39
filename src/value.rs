//! The ISC control-channel value model and its serialised form.
//!
//! A value on the wire is a 1-byte type tag, a 4-byte big-endian length,
//! and `length` bytes of body. Map bodies are sequences of entries, each
//! a 1-byte key length, the key bytes, and a nested value.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use indexmap::IndexMap;

use crate::Error;

/// An ordered collection of `(key, value)` pairs.
///
/// Insertion order is preserved and significant: the canonical
/// serialisation (and therefore the HMAC each side computes) depends on
/// it.
pub type Map = IndexMap<Vec<u8>, Value>;

const TYPE_MAP: u8 = 0x00;
const TYPE_BYTES: u8 = 0x01;
const TYPE_LIST: u8 = 0x02;

/// Map keys carry a single-byte length prefix on the wire.
const MAX_KEY_LEN: usize = 255;

/// Nesting bound on parse. RNDC payloads are at most a few levels
/// deep; the cap keeps a hostile peer from driving the parser into
/// unbounded recursion.
const MAX_DEPTH: usize = 32;

/// A single node in a control-channel message tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An opaque sequence of bytes (leaf).
    ///
    /// Text is UTF-8 where meaningful, but the wire form is byte-exact.
    Bytes(Vec<u8>),

    /// An ordered map of byte-string keys to nested values.
    Map(Map),

    /// A sequence of values.
    ///
    /// Lists exist in the wider ISC format and are accepted on parse;
    /// the client never emits one.
    List(Vec<Value>),
}

impl Value {
    /// Returns the byte-string payload, or `None` for maps and lists.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the nested map, or `None` for leaves and lists.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Bytes(v.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Self::Map(v)
    }
}

/// A bounds-checked reader over an in-memory buffer.
///
/// Unlike a `Cursor` + `ReadBytesExt` combination this never surfaces an
/// `std::io::Error`: overrunning the buffer is a protocol error, not a
/// transport error, and the two must not be conflated (I/O errors are
/// retryable, protocol errors are not).
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(len).ok_or(Error::InvalidLength)?;
        if end > self.buf.len() {
            return Err(Error::InvalidLength);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Reads one `(key, value)` map entry from `r`.
fn read_entry<'a>(r: &mut Reader<'a>, depth: usize) -> Result<(&'a [u8], Value), Error> {
    let key_len = r.take_u8()? as usize;
    let key = r.take(key_len)?;
    let value = read_value(r, depth)?;
    Ok((key, value))
}

/// Reads one typed value from `r`.
fn read_value(r: &mut Reader<'_>, depth: usize) -> Result<Value, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidLength);
    }

    let tag = r.take_u8()?;
    let len = r.take_u32()? as usize;
    let body = r.take(len)?;

    match tag {
        TYPE_BYTES => Ok(Value::Bytes(body.to_vec())),
        TYPE_MAP => Ok(Value::Map(read_map(body, depth + 1)?)),
        TYPE_LIST => {
            let mut items = Vec::new();
            let mut inner = Reader::new(body);
            while !inner.is_empty() {
                items.push(read_value(&mut inner, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        v => Err(Error::InvalidTypeTag(v)),
    }
}

/// Parses a map body: `(key_length, key, value)` triples until the body
/// is exhausted.
pub(crate) fn read_map_body(body: &[u8]) -> Result<Map, Error> {
    read_map(body, 0)
}

fn read_map(body: &[u8], depth: usize) -> Result<Map, Error> {
    let mut r = Reader::new(body);
    let mut map = Map::new();

    while !r.is_empty() {
        let (key, value) = read_entry(&mut r, depth)?;
        if map.insert(key.to_vec(), value).is_some() {
            return Err(Error::DuplicateKey(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
    }

    Ok(map)
}

/// Serialises one map entry (key length prefix, key, value) into `buf`.
pub(crate) fn write_entry<W: Write>(buf: &mut W, key: &[u8], value: &Value) -> Result<(), Error> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidLength);
    }
    buf.write_u8(key.len() as u8)?;
    buf.write_all(key)?;
    write_value(buf, value)
}

/// Serialises one typed value into `buf`.
pub(crate) fn write_value<W: Write>(buf: &mut W, value: &Value) -> Result<(), Error> {
    match value {
        Value::Bytes(b) => {
            buf.write_u8(TYPE_BYTES)?;
            buf.write_u32::<BigEndian>(b.len() as u32)?;
            buf.write_all(b)?;
        }
        Value::Map(m) => {
            let body = write_map_body(m)?;
            buf.write_u8(TYPE_MAP)?;
            buf.write_u32::<BigEndian>(body.len() as u32)?;
            buf.write_all(&body)?;
        }
        Value::List(items) => {
            let mut body = Vec::new();
            for item in items {
                write_value(&mut body, item)?;
            }
            buf.write_u8(TYPE_LIST)?;
            buf.write_u32::<BigEndian>(body.len() as u32)?;
            buf.write_all(&body)?;
        }
    }

    Ok(())
}

/// Serialises a map body (the entry sequence, without a type header).
pub(crate) fn write_map_body(map: &Map) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    for (key, value) in map {
        write_entry(&mut body, key, value)?;
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    fn parse_value(buf: &[u8]) -> Result<Value, Error> {
        let mut r = Reader::new(buf);
        let v = read_value(&mut r, 0)?;
        assert!(r.is_empty(), "value did not consume the whole buffer");
        Ok(v)
    }

    fn serialise_value(v: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        write_value(&mut buf, v).unwrap();
        buf
    }

    #[test]
    fn test_bytes_value_wire_form() {
        let v = Value::from("status");
        // type 0x01, length 6, "status"
        assert_eq!(serialise_value(&v), hex!("01 00000006 737461747573"));
    }

    #[test]
    fn test_map_value_wire_form() {
        let mut m = Map::new();
        m.insert(b"_ser".to_vec(), Value::from("1"));

        // type 0x00, length 11, then key_len 4, "_ser", type 0x01,
        // length 1, "1".
        let raw = hex!("00 0000000b 04 5f736572 01 00000001 31");
        assert_eq!(serialise_value(&Value::Map(m.clone())), raw);
        assert_eq!(parse_value(&raw).unwrap(), Value::Map(m));
    }

    #[test]
    fn test_list_recognised_on_parse() {
        // type 0x02, length 12, two byte-string elements "a" and "b".
        let raw = hex!("02 0000000c 01 00000001 61 01 00000001 62");

        let got = parse_value(&raw).unwrap();
        assert_eq!(
            got,
            Value::List(vec![Value::from("a"), Value::from("b")])
        );

        // Lists round-trip even though the client never emits them.
        assert_eq!(serialise_value(&got), raw);
    }

    #[test]
    fn test_nested_map_round_trip() {
        let mut inner = Map::new();
        inner.insert(b"k".to_vec(), Value::Bytes(b"v".to_vec()));

        let mut outer = Map::new();
        outer.insert(b"msg".to_vec(), Value::from("hello"));
        outer.insert(b"nested".to_vec(), Value::Map(inner));

        let v = Value::Map(outer);
        assert_eq!(parse_value(&serialise_value(&v)).unwrap(), v);
    }

    #[test]
    fn test_unknown_type_tag() {
        let raw = hex!("07 00000000");
        assert_eq!(parse_value(&raw).unwrap_err(), Error::InvalidTypeTag(0x07));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        // Map with "a" twice.
        let raw = hex!("00 00000010 01 61 01 00000001 78 01 61 01 00000001 79");
        assert_eq!(
            parse_value(&raw).unwrap_err(),
            Error::DuplicateKey("a".to_owned())
        );
    }

    #[test]
    fn test_key_length_overruns_body() {
        // Map whose entry declares a 5-byte key but only 1 byte remains.
        let raw = hex!("00 00000002 05 61");
        assert_eq!(parse_value(&raw).unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn test_value_length_overruns_body() {
        let raw = hex!("01 000000ff 61");
        assert_eq!(parse_value(&raw).unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn test_every_truncation_fails() {
        let mut inner = Map::new();
        inner.insert(b"k".to_vec(), Value::from("v"));

        let mut m = Map::new();
        m.insert(b"msg".to_vec(), Value::from("hello"));
        m.insert(b"nested".to_vec(), Value::Map(inner));

        let raw = serialise_value(&Value::Map(m));
        for i in 0..raw.len() {
            assert!(
                parse_value(&raw[..i]).is_err(),
                "prefix of {i} bytes must not parse"
            );
        }
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        // An empty byte string wrapped in 64 layers of single-entry
        // maps, well past the cap.
        let mut value = hex!("01 00000000").to_vec();
        for _ in 0..64 {
            let mut body = vec![1_u8, b'k'];
            body.extend_from_slice(&value);

            let mut wrapped = vec![0x00];
            wrapped.extend_from_slice(&(body.len() as u32).to_be_bytes());
            wrapped.extend_from_slice(&body);
            value = wrapped;
        }

        assert_eq!(parse_value(&value).unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn test_oversized_key_rejected_on_serialise() {
        let mut buf = Vec::new();
        let err = write_entry(&mut buf, &[b'k'; 256], &Value::from("v")).unwrap_err();
        assert_eq!(err, Error::InvalidLength);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes);
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop::collection::btree_map(prop::collection::vec(any::<u8>(), 1..8), inner, 0..4)
                .prop_map(|m| Value::Map(m.into_iter().collect()))
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(v in arb_value()) {
            let buf = serialise_value(&v);
            prop_assert_eq!(parse_value(&buf).unwrap(), v);
        }

        #[test]
        fn prop_truncation_fails(v in arb_value(), cut in 0..usize::MAX) {
            let buf = serialise_value(&v);
            let cut = cut % buf.len().max(1);
            prop_assert!(parse_value(&buf[..cut]).is_err());
        }
    }
}
