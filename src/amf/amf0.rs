//! AMF0 encoder and decoder
//!
//! AMF0 is the Action Message Format used for every RTMP command and data
//! message this crate produces.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (32-bit count + key-value pairs until 0x000009)
//! 0x09 - Object End
//! 0x0A - Strict Array (32-bit count + values)
//! 0x0B - Date (double + timezone), decoded as a number
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported, decoded as undefined
//! 0x0F - XML Document, decoded as a string
//! 0x10 - Typed Object, decoded as a plain object
//! 0x11 - AVM+ (switch to AMF3 for the rest of the message)
//! ```
//!
//! The decoder is a cursor: once it meets the AVM+ marker in front of a value
//! it stays in AMF3 mode until the buffer is exhausted. Every typed read
//! checks the leading marker and fails on a mismatch.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::amf3::Amf3Reader;
use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

const MAX_NESTING_DEPTH: usize = 64;

/// Wire dialect the decoder is currently reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmfVersion {
    Amf0,
    Amf3,
}

/// Cursor-based AMF decoder
pub struct AmfDecoder {
    buf: Bytes,
    version: AmfVersion,
    amf3: Amf3Reader,
    /// AMF0 reference table (objects and arrays in order of appearance)
    references: Vec<AmfValue>,
    depth: usize,
}

impl AmfDecoder {
    /// Start decoding `buf` in AMF0 mode
    pub fn new(buf: Bytes) -> Self {
        Self::with_version(buf, AmfVersion::Amf0)
    }

    /// Start decoding in an explicit dialect (command type 17 starts in AMF0
    /// after a leading format byte, so callers normally want `Amf0`)
    pub fn with_version(buf: Bytes, version: AmfVersion) -> Self {
        Self {
            buf,
            version,
            amf3: Amf3Reader::new(),
            references: Vec::new(),
            depth: 0,
        }
    }

    pub fn version(&self) -> AmfVersion {
        self.version
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes not consumed yet
    pub fn rest(&self) -> Bytes {
        self.buf.clone()
    }

    /// Consume an AVM+ marker if one is next; the switch is permanent
    fn check_switch(&mut self) {
        if self.version == AmfVersion::Amf0 && self.buf.first() == Some(&MARKER_AVMPLUS) {
            tracing::trace!("entering AMF3 mode");
            self.buf.advance(1);
            self.version = AmfVersion::Amf3;
        }
    }

    fn peek(&mut self) -> Result<u8, AmfError> {
        self.check_switch();
        self.buf.first().copied().ok_or(AmfError::UnexpectedEof)
    }

    /// Decode the next value of any type
    pub fn read_value(&mut self) -> Result<AmfValue, AmfError> {
        self.check_switch();
        if self.version == AmfVersion::Amf3 {
            return self.amf3.read_value(&mut self.buf);
        }
        if self.buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }
        let marker = self.buf.get_u8();
        let result = self.read_amf0_body(marker);
        self.depth -= 1;
        result
    }

    /// Decode every remaining value
    pub fn read_all(&mut self) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while !self.buf.is_empty() {
            values.push(self.read_value()?);
        }
        Ok(values)
    }

    /// Decode a value that must be a string
    pub fn read_string(&mut self) -> Result<String, AmfError> {
        let marker = self.peek()?;
        if self.version == AmfVersion::Amf3 {
            return self.amf3.read_typed_string(&mut self.buf);
        }
        match marker {
            MARKER_STRING => {
                self.buf.advance(1);
                read_utf8(&mut self.buf)
            }
            MARKER_LONG_STRING => {
                self.buf.advance(1);
                read_utf8_long(&mut self.buf)
            }
            found => Err(AmfError::TypeMismatch {
                expected: "string",
                found,
            }),
        }
    }

    /// Decode a value that must be a number
    pub fn read_number(&mut self) -> Result<f64, AmfError> {
        let marker = self.peek()?;
        if self.version == AmfVersion::Amf3 {
            return self.amf3.read_typed_number(&mut self.buf);
        }
        if marker != MARKER_NUMBER {
            return Err(AmfError::TypeMismatch {
                expected: "number",
                found: marker,
            });
        }
        self.buf.advance(1);
        read_f64(&mut self.buf)
    }

    /// Decode a value that must be a boolean
    pub fn read_bool(&mut self) -> Result<bool, AmfError> {
        let marker = self.peek()?;
        let value = match (self.version, marker) {
            (AmfVersion::Amf0, MARKER_BOOLEAN) => self.read_value()?,
            (AmfVersion::Amf3, 0x02 | 0x03) => self.read_value()?,
            (_, found) => {
                return Err(AmfError::TypeMismatch {
                    expected: "boolean",
                    found,
                })
            }
        };
        value.as_bool().ok_or(AmfError::TypeMismatch {
            expected: "boolean",
            found: marker,
        })
    }

    fn read_amf0_body(&mut self, marker: u8) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => read_f64(&mut self.buf).map(AmfValue::Number),
            MARKER_BOOLEAN => {
                if self.buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(self.buf.get_u8() != 0))
            }
            MARKER_STRING => read_utf8(&mut self.buf).map(AmfValue::String),
            MARKER_LONG_STRING | MARKER_XML_DOCUMENT => {
                read_utf8_long(&mut self.buf).map(AmfValue::String)
            }
            MARKER_OBJECT => {
                let slot = self.reserve_reference();
                let map = self.read_properties()?;
                Ok(self.fill_reference(slot, AmfValue::Object(map)))
            }
            MARKER_TYPED_OBJECT => {
                let _class_name = read_utf8(&mut self.buf)?;
                let slot = self.reserve_reference();
                let map = self.read_properties()?;
                Ok(self.fill_reference(slot, AmfValue::Object(map)))
            }
            MARKER_ECMA_ARRAY => {
                if self.buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // count is a hint only; the key list is terminated like an object
                let _count = self.buf.get_u32();
                let slot = self.reserve_reference();
                let map = self.read_properties()?;
                Ok(self.fill_reference(slot, AmfValue::EcmaArray(map)))
            }
            MARKER_STRICT_ARRAY => {
                if self.buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                let count = self.buf.get_u32() as usize;
                let slot = self.reserve_reference();
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(self.fill_reference(slot, AmfValue::StrictArray(items)))
            }
            MARKER_DATE => {
                if self.buf.remaining() < 10 {
                    return Err(AmfError::UnexpectedEof);
                }
                let millis = self.buf.get_f64();
                let _timezone = self.buf.get_i16();
                Ok(AmfValue::Number(millis))
            }
            MARKER_REFERENCE => {
                if self.buf.remaining() < 2 {
                    return Err(AmfError::UnexpectedEof);
                }
                let index = self.buf.get_u16() as u32;
                self.references
                    .get(index as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(index))
            }
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// Read `key value` pairs up to the empty key and end marker
    fn read_properties(&mut self) -> Result<AmfObject, AmfError> {
        let mut map = AmfObject::new();
        loop {
            let key = read_utf8(&mut self.buf)?;
            if key.is_empty() {
                if self.buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                if self.buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidObjectEnd);
                }
                return Ok(map);
            }
            let value = self.read_value()?;
            map.insert(key, value);
        }
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    fn fill_reference(&mut self, slot: usize, value: AmfValue) -> AmfValue {
        self.references[slot] = value.clone();
        value
    }
}

fn read_f64(buf: &mut Bytes) -> Result<f64, AmfError> {
    if buf.remaining() < 8 {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.get_f64())
}

/// UTF-8 string with 16-bit length prefix
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// UTF-8 string with 32-bit length prefix
fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder appending to a growing buffer
#[derive(Debug, Default)]
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append one value
    pub fn encode(&mut self, value: &AmfValue) -> &mut Self {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(*b as u8);
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Integer(i) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*i as f64);
            }
            AmfValue::String(s) => {
                if s.len() > 0xFFFF {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::StrictArray(items) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(items.len() as u32);
                for item in items {
                    self.encode(item);
                }
            }
        }
        self
    }

    pub fn encode_all(&mut self, values: &[AmfValue]) -> &mut Self {
        for value in values {
            self.encode(value);
        }
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.encode(&AmfValue::String(s.to_string()))
    }

    pub fn number(&mut self, n: f64) -> &mut Self {
        self.encode(&AmfValue::Number(n))
    }

    pub fn boolean(&mut self, b: bool) -> &mut Self {
        self.encode(&AmfValue::Boolean(b))
    }

    pub fn null(&mut self) -> &mut Self {
        self.buf.put_u8(MARKER_NULL);
        self
    }

    fn write_properties(&mut self, props: &AmfObject) {
        for (key, value) in props {
            self.write_key(key);
            self.encode(value);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Key without a type marker
    fn write_key(&mut self, s: &str) {
        let len = s.len().min(0xFFFF);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

/// Encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    Amf0Encoder::new().encode(value).finish()
}

/// Encode a sequence of values back to back
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    Amf0Encoder::new().encode_all(values).finish()
}

/// Decode a single value
pub fn decode(data: Bytes) -> Result<AmfValue, AmfError> {
    AmfDecoder::new(data).read_value()
}

/// Decode every value in the buffer
pub fn decode_all(data: Bytes) -> Result<Vec<AmfValue>, AmfError> {
    AmfDecoder::new(data).read_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AmfValue) -> AmfValue {
        decode(encode(&value)).unwrap()
    }

    #[test]
    fn test_scalar_roundtrip() {
        for value in [
            AmfValue::Number(42.5),
            AmfValue::Number(-0.25),
            AmfValue::Boolean(true),
            AmfValue::Boolean(false),
            AmfValue::String("hello world".into()),
            AmfValue::String(String::new()),
            AmfValue::Null,
            AmfValue::Undefined,
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn test_integer_widens_to_number() {
        assert_eq!(roundtrip(AmfValue::Integer(-7)), AmfValue::Number(-7.0));
    }

    #[test]
    fn test_nested_collections_roundtrip() {
        let mut inner = AmfValue::ecma_array();
        inner.set("width", 1280.0);
        inner.set("height", 720.0);

        let value = AmfValue::object_from([
            ("level", AmfValue::from("status")),
            ("code", "NetStream.Play.Start".into()),
            ("meta", inner),
            (
                "list",
                AmfValue::StrictArray(vec![
                    1.0.into(),
                    AmfValue::object_from([("deep", true)]),
                    AmfValue::StrictArray(vec![]),
                ]),
            ),
        ]);

        let decoded = roundtrip(value.clone());
        assert_eq!(decoded, value);

        // ordered map keeps the producer's key order
        let keys: Vec<&String> = decoded.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["level", "code", "meta", "list"]);
    }

    #[test]
    fn test_long_string() {
        let s = "x".repeat(70_000);
        let encoded = encode(&AmfValue::String(s.clone()));
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode(encoded).unwrap(), AmfValue::String(s));
    }

    #[test]
    fn test_command_sequence() {
        let bytes = Amf0Encoder::new()
            .string("_result")
            .number(1.0)
            .null()
            .boolean(true)
            .finish();

        let mut decoder = AmfDecoder::new(bytes);
        assert_eq!(decoder.read_string().unwrap(), "_result");
        assert_eq!(decoder.read_number().unwrap(), 1.0);
        assert_eq!(decoder.read_value().unwrap(), AmfValue::Null);
        assert!(decoder.read_bool().unwrap());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_typed_read_mismatch() {
        let mut decoder = AmfDecoder::new(encode(&AmfValue::Number(1.0)));
        assert_eq!(
            decoder.read_string(),
            Err(AmfError::TypeMismatch {
                expected: "string",
                found: MARKER_NUMBER
            })
        );
    }

    #[test]
    fn test_truncated_input() {
        let encoded = encode(&AmfValue::String("truncated".into()));
        let cut = encoded.slice(..encoded.len() - 3);
        assert_eq!(decode(cut), Err(AmfError::UnexpectedEof));

        assert_eq!(decode(Bytes::new()), Err(AmfError::UnexpectedEof));
        assert_eq!(
            decode(Bytes::from_static(&[MARKER_NUMBER, 0x40])),
            Err(AmfError::UnexpectedEof)
        );
    }

    #[test]
    fn test_missing_object_end() {
        // {"a": null} then a bad end marker
        let data = Bytes::from_static(&[MARKER_OBJECT, 0, 1, b'a', MARKER_NULL, 0, 0, 0x07]);
        assert_eq!(decode(data), Err(AmfError::InvalidObjectEnd));
    }

    #[test]
    fn test_unknown_marker() {
        assert_eq!(
            decode(Bytes::from_static(&[0x04])),
            Err(AmfError::UnknownMarker(0x04))
        );
    }

    #[test]
    fn test_switch_to_amf3_is_permanent() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&AmfValue::String("onStatus".into())));
        buf.put_u8(MARKER_AVMPLUS);
        buf.put_u8(0x06); // AMF3 string "ok"
        buf.put_u8((2 << 1) | 1);
        buf.put_slice(b"ok");
        buf.put_u8(0x04); // AMF3 integer 5, no second switch marker
        buf.put_u8(5);
        buf.put_u8(0x03); // AMF3 true

        let mut decoder = AmfDecoder::new(buf.freeze());
        assert_eq!(decoder.read_string().unwrap(), "onStatus");
        assert_eq!(decoder.version(), AmfVersion::Amf0);
        assert_eq!(decoder.read_string().unwrap(), "ok");
        assert_eq!(decoder.version(), AmfVersion::Amf3);
        assert_eq!(decoder.read_number().unwrap(), 5.0);
        assert!(decoder.read_bool().unwrap());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_reference_resolves_earlier_object() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&AmfValue::object_from([("k", 1.0)])));
        buf.put_u8(MARKER_REFERENCE);
        buf.put_u16(0);
        let values = decode_all(buf.freeze()).unwrap();
        assert_eq!(values[0], values[1]);

        let bad = Bytes::from_static(&[MARKER_REFERENCE, 0, 3]);
        assert_eq!(decode(bad), Err(AmfError::InvalidReference(3)));
    }

    #[test]
    fn test_date_decodes_as_number() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_DATE);
        buf.put_f64(1_000.0);
        buf.put_i16(0);
        assert_eq!(decode(buf.freeze()).unwrap(), AmfValue::Number(1_000.0));
    }
}
