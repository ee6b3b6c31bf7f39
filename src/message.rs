//! The top-level control-channel message and its framed transport.
//!
//! A message body is the concatenation of the `_auth`, `_ctrl` and
//! `_data` map entries in that order, *without* an enclosing map header.
//! On the wire each body is preceded by an 8-byte header: a 4-byte
//! big-endian total length (the version word plus the body, i.e.
//! `len(body) + 4`) followed by a 4-byte big-endian protocol version.

use std::io::{Read, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::{
    value::{read_map_body, write_entry},
    Error, Map, Value,
};

/// The control-channel protocol version this crate speaks.
pub const FRAME_VERSION: u32 = 1;

/// Upper bound on an inbound frame's advertised length.
///
/// BIND responses top out far below this; see [`Error::FrameTooLarge`].
const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

const AUTH_KEY: &[u8] = b"_auth";
const CTRL_KEY: &[u8] = b"_ctrl";
const DATA_KEY: &[u8] = b"_data";

/// Selects between the two serialised forms of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialiseMode {
    /// The complete message, signature included.
    Full,

    /// The canonical form used for HMAC computation: identical to
    /// [`Full`](Self::Full) except that the `_auth` entry's body is
    /// replaced by an empty map.
    Signing,
}

/// A top-level control-channel message.
///
/// Outbound messages are built with [`Message::new`] (which starts with
/// an empty `_auth` section, as required at the moment the signature is
/// computed) and completed with [`Message::set_auth`]. Inbound messages
/// come from [`Message::parse`], which preserves section order so that
/// re-serialising in [`SerialiseMode::Signing`] reproduces the exact
/// bytes the peer signed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sections: Map,
}

impl Message {
    /// Constructs an outbound message with the given control and data
    /// sections and an empty `_auth` section.
    pub fn new(ctrl: Map, data: Map) -> Self {
        let mut sections = Map::new();
        sections.insert(AUTH_KEY.to_vec(), Value::Map(Map::new()));
        sections.insert(CTRL_KEY.to_vec(), Value::Map(ctrl));
        sections.insert(DATA_KEY.to_vec(), Value::Map(data));
        Self { sections }
    }

    /// Installs the signature map produced by [`crate::auth::sign`].
    ///
    /// The `_auth` entry keeps its position (first) in the section
    /// order.
    pub fn set_auth(&mut self, auth: Map) {
        self.sections.insert(AUTH_KEY.to_vec(), Value::Map(auth));
    }

    /// Parses a message body: a sequence of `(key_length, key, value)`
    /// triples until the body is exhausted.
    ///
    /// All bytes must be consumed; surplus or truncation is an error.
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            sections: read_map_body(body)?,
        })
    }

    /// Serialises this message.
    ///
    /// In [`SerialiseMode::Signing`] the `_auth` entry is emitted with
    /// an empty map body; the HMAC is computed over exactly those bytes
    /// on both sides of the channel.
    pub fn serialise(&self, mode: SerialiseMode) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        for (key, value) in &self.sections {
            if mode == SerialiseMode::Signing && key.as_slice() == AUTH_KEY {
                write_entry(&mut buf, key, &Value::Map(Map::new()))?;
            } else {
                write_entry(&mut buf, key, value)?;
            }
        }

        Ok(buf)
    }

    /// The `_auth` section.
    pub fn auth(&self) -> Result<&Map, Error> {
        self.section("_auth")
    }

    /// The `_ctrl` section.
    pub fn ctrl(&self) -> Result<&Map, Error> {
        self.section("_ctrl")
    }

    /// The `_data` section.
    pub fn data(&self) -> Result<&Map, Error> {
        self.section("_data")
    }

    fn section(&self, name: &'static str) -> Result<&Map, Error> {
        self.sections
            .get(name.as_bytes())
            .and_then(Value::as_map)
            .ok_or(Error::InvalidSection(name))
    }
}

/// Writes one framed message body to `w`.
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> Result<(), Error> {
    let total = u32::try_from(body.len())
        .ok()
        .and_then(|v| v.checked_add(4))
        .ok_or(Error::FrameTooLarge(u32::MAX))?;
    if total > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(total));
    }

    w.write_u32::<BigEndian>(total)?;
    w.write_u32::<BigEndian>(FRAME_VERSION)?;
    w.write_all(body)?;
    w.flush()?;

    Ok(())
}

/// Reads one complete framed message body from `r`, blocking until it
/// arrives or the transport fails.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, Error> {
    let mut word = [0_u8; 4];

    r.read_exact(&mut word)?;
    let total = u32::from_be_bytes(word);
    if total < 4 {
        return Err(Error::IncompleteHeader);
    }
    if total > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(total));
    }

    r.read_exact(&mut word)?;
    let version = u32::from_be_bytes(word);
    if version != FRAME_VERSION {
        return Err(Error::InvalidVersion(version));
    }

    let mut body = vec![0_u8; (total - 4) as usize];
    r.read_exact(&mut body)?;

    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use hex_literal::hex;

    use super::*;

    fn ctrl_ser_1() -> Map {
        let mut ctrl = Map::new();
        ctrl.insert(b"_ser".to_vec(), Value::from("1"));
        ctrl
    }

    #[test]
    fn test_message_wire_form() {
        let msg = Message::new(ctrl_ser_1(), Map::new());

        // _auth: empty map; _ctrl: { _ser: "1" }; _data: empty map.
        // No enclosing map header around the three entries.
        let want = hex!(
            "05 5f61757468 00 00000000
             05 5f6374726c 00 0000000b 04 5f736572 01 00000001 31
             05 5f64617461 00 00000000"
        );

        assert_eq!(msg.serialise(SerialiseMode::Full).unwrap(), want);
        assert_eq!(Message::parse(&want).unwrap(), msg);
    }

    #[test]
    fn test_round_trip_with_nested_data() {
        let mut nested = Map::new();
        nested.insert(b"k".to_vec(), Value::Bytes(b"v".to_vec()));

        let mut data = Map::new();
        data.insert(b"msg".to_vec(), Value::from("hello"));
        data.insert(b"nested".to_vec(), Value::Map(nested));

        let mut auth = Map::new();
        auth.insert(b"token".to_vec(), Value::Bytes(b"abc".to_vec()));

        let mut msg = Message::new(ctrl_ser_1(), data);
        msg.set_auth(auth);

        let buf = msg.serialise(SerialiseMode::Full).unwrap();
        let got = Message::parse(&buf).unwrap();

        assert_eq!(got, msg);
        assert_eq!(
            got.data().unwrap().get(b"msg".as_slice()),
            Some(&Value::from("hello"))
        );
        assert_eq!(
            got.auth().unwrap().get(b"token".as_slice()),
            Some(&Value::Bytes(b"abc".to_vec()))
        );
    }

    #[test]
    fn test_signing_mode_empties_auth() {
        let mut signed = Message::new(ctrl_ser_1(), Map::new());
        let mut auth = Map::new();
        auth.insert(b"hsha".to_vec(), Value::Bytes(vec![0xa5; 89]));
        signed.set_auth(auth);

        let unsigned = Message::new(ctrl_ser_1(), Map::new());

        assert_eq!(
            signed.serialise(SerialiseMode::Signing).unwrap(),
            unsigned.serialise(SerialiseMode::Full).unwrap(),
        );
        assert_ne!(
            signed.serialise(SerialiseMode::Full).unwrap(),
            signed.serialise(SerialiseMode::Signing).unwrap(),
        );
    }

    #[test]
    fn test_parsed_message_resigns_to_same_canonical_bytes() {
        // The canonical serialisation of a parsed message must be
        // byte-identical to what the sender signed, whatever the
        // section order was.
        let mut msg = Message::new(ctrl_ser_1(), Map::new());
        let canonical = msg.serialise(SerialiseMode::Signing).unwrap();

        let mut auth = Map::new();
        auth.insert(b"hsha".to_vec(), Value::Bytes(vec![1; 89]));
        msg.set_auth(auth);

        let parsed = Message::parse(&msg.serialise(SerialiseMode::Full).unwrap()).unwrap();
        assert_eq!(parsed.serialise(SerialiseMode::Signing).unwrap(), canonical);
    }

    #[test]
    fn test_missing_section() {
        let msg = Message::parse(&hex!("05 5f61757468 00 00000000")).unwrap();
        assert_eq!(msg.ctrl().unwrap_err(), Error::InvalidSection("_ctrl"));
    }

    #[test]
    fn test_section_not_a_map() {
        let msg = Message::parse(&hex!("05 5f64617461 01 00000002 6869")).unwrap();
        assert_eq!(msg.data().unwrap_err(), Error::InvalidSection("_data"));
    }

    #[test]
    fn test_parse_incomplete_body() {
        assert!(Message::parse(b"\x05short").is_err());
    }

    #[test]
    fn test_frame_round_trip() {
        let msg = Message::new(ctrl_ser_1(), Map::new());
        let body = msg.serialise(SerialiseMode::Full).unwrap();

        let mut wire = Vec::new();
        write_frame(&mut wire, &body).unwrap();

        // 4-byte total (body + version word), 4-byte version 1.
        assert_eq!(wire.len(), body.len() + 8);
        assert_eq!(wire[..4], ((body.len() + 4) as u32).to_be_bytes());
        assert_eq!(wire[4..8], 1_u32.to_be_bytes());

        let got = read_frame(&mut Cursor::new(wire)).unwrap();
        assert_eq!(got, body);
    }

    #[test]
    fn test_read_frame_rejects_wrong_version() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&8_u32.to_be_bytes());
        wire.extend_from_slice(&2_u32.to_be_bytes());
        wire.extend_from_slice(&[0; 4]);

        assert_eq!(
            read_frame(&mut Cursor::new(wire)).unwrap_err(),
            Error::InvalidVersion(2)
        );
    }

    #[test]
    fn test_read_frame_rejects_oversized_length() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&u32::MAX.to_be_bytes());
        wire.extend_from_slice(&1_u32.to_be_bytes());

        assert_eq!(
            read_frame(&mut Cursor::new(wire)).unwrap_err(),
            Error::FrameTooLarge(u32::MAX)
        );
    }

    #[test]
    fn test_read_frame_short_body_is_io_error() {
        // Header advertises 16 bytes of payload; the peer hangs up
        // after the version word. This is a transport failure, so it
        // must classify as retryable.
        let mut wire = Vec::new();
        wire.extend_from_slice(&20_u32.to_be_bytes());
        wire.extend_from_slice(&1_u32.to_be_bytes());

        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(err.is_retryable(), "short read must be retryable: {err}");
    }

    #[test]
    fn test_read_frame_truncated_header_is_io_error() {
        let err = read_frame(&mut Cursor::new(vec![0_u8, 0])).unwrap_err();
        assert!(err.is_retryable());
    }
}
