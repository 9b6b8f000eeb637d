//! AMF3 reader
//!
//! Commands and metadata are written in AMF0, but a peer may emit the AVM+
//! marker (0x11) mid-message, after which every remaining value of that
//! message is AMF3. This reader handles that tail. Nothing in the crate
//! writes AMF3.
//!
//! Type Markers:
//! ```text
//! 0x00 - Undefined
//! 0x01 - Null
//! 0x02 - Boolean false
//! 0x03 - Boolean true
//! 0x04 - Integer (29-bit signed)
//! 0x05 - Double
//! 0x06 - String
//! 0x07 - XML Document (legacy)
//! 0x08 - Date
//! 0x09 - Array
//! 0x0A - Object
//! 0x0B - XML
//! 0x0C - ByteArray (rejected)
//! ```

use bytes::{Buf, Bytes};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_UNDEFINED: u8 = 0x00;
const MARKER_NULL: u8 = 0x01;
const MARKER_FALSE: u8 = 0x02;
const MARKER_TRUE: u8 = 0x03;
const MARKER_INTEGER: u8 = 0x04;
const MARKER_DOUBLE: u8 = 0x05;
const MARKER_STRING: u8 = 0x06;
const MARKER_XML_DOC: u8 = 0x07;
const MARKER_DATE: u8 = 0x08;
const MARKER_ARRAY: u8 = 0x09;
const MARKER_OBJECT: u8 = 0x0A;
const MARKER_XML: u8 = 0x0B;

const MAX_NESTING_DEPTH: usize = 64;

/// Class definition carried by inline object traits
#[derive(Clone, Debug)]
struct TraitDef {
    is_dynamic: bool,
    sealed: Vec<String>,
}

/// Reference tables for one AMF3 message tail
#[derive(Debug, Default)]
pub struct Amf3Reader {
    string_refs: Vec<String>,
    object_refs: Vec<AmfValue>,
    trait_refs: Vec<TraitDef>,
    depth: usize,
}

impl Amf3Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peek the marker of the next value without consuming it
    pub fn peek_marker(buf: &Bytes) -> Result<u8, AmfError> {
        buf.first().copied().ok_or(AmfError::UnexpectedEof)
    }

    /// Decode one AMF3 value
    pub fn read_value(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = match marker {
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_FALSE => Ok(AmfValue::Boolean(false)),
            MARKER_TRUE => Ok(AmfValue::Boolean(true)),
            MARKER_INTEGER => self.read_integer(buf),
            MARKER_DOUBLE => {
                if buf.remaining() < 8 {
                    Err(AmfError::UnexpectedEof)
                } else {
                    Ok(AmfValue::Number(buf.get_f64()))
                }
            }
            MARKER_STRING => self.read_string(buf).map(AmfValue::String),
            MARKER_DATE => self.read_date(buf),
            MARKER_ARRAY => self.read_array(buf),
            MARKER_OBJECT => self.read_object(buf),
            MARKER_XML | MARKER_XML_DOC => self.read_xml(buf),
            other => Err(AmfError::UnknownMarker(other)),
        };
        self.depth -= 1;
        result
    }

    /// Decode a value that must be a string
    pub fn read_typed_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        let marker = Self::peek_marker(buf)?;
        if marker != MARKER_STRING {
            return Err(AmfError::TypeMismatch {
                expected: "string",
                found: marker,
            });
        }
        buf.advance(1);
        self.read_string(buf)
    }

    /// Decode a value that must be numeric (integer or double)
    pub fn read_typed_number(&mut self, buf: &mut Bytes) -> Result<f64, AmfError> {
        let marker = Self::peek_marker(buf)?;
        match marker {
            MARKER_INTEGER | MARKER_DOUBLE => {
                let value = self.read_value(buf)?;
                value.as_number().ok_or(AmfError::TypeMismatch {
                    expected: "number",
                    found: marker,
                })
            }
            found => Err(AmfError::TypeMismatch {
                expected: "number",
                found,
            }),
        }
    }

    fn read_integer(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let value = read_u29(buf)?;
        // sign-extend from 29 bits
        let signed = if value & 0x1000_0000 != 0 {
            (value as i32) | !0x1FFF_FFFF
        } else {
            value as i32
        };
        Ok(AmfValue::Integer(signed))
    }

    fn object_ref(&self, header: u32) -> Result<AmfValue, AmfError> {
        let idx = header >> 1;
        self.object_refs
            .get(idx as usize)
            .cloned()
            .ok_or(AmfError::InvalidReference(idx))
    }

    fn read_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            return self.object_ref(header);
        }
        if buf.remaining() < 8 {
            return Err(AmfError::UnexpectedEof);
        }
        let value = AmfValue::Number(buf.get_f64());
        self.object_refs.push(value.clone());
        Ok(value)
    }

    fn read_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            return self.object_ref(header);
        }

        let dense_count = (header >> 1) as usize;
        let slot = self.object_refs.len();
        self.object_refs.push(AmfValue::Null);

        let mut assoc = AmfObject::new();
        loop {
            let key = self.read_string(buf)?;
            if key.is_empty() {
                break;
            }
            let value = self.read_value(buf)?;
            assoc.insert(key, value);
        }

        let mut dense = Vec::with_capacity(dense_count.min(1024));
        for _ in 0..dense_count {
            dense.push(self.read_value(buf)?);
        }

        let value = if assoc.is_empty() {
            AmfValue::StrictArray(dense)
        } else {
            for (i, v) in dense.into_iter().enumerate() {
                assoc.insert(i.to_string(), v);
            }
            AmfValue::EcmaArray(assoc)
        };
        self.object_refs[slot] = value.clone();
        Ok(value)
    }

    fn read_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            return self.object_ref(header);
        }

        let slot = self.object_refs.len();
        self.object_refs.push(AmfValue::Null);

        let traits = if header & 2 == 0 {
            let idx = header >> 2;
            self.trait_refs
                .get(idx as usize)
                .cloned()
                .ok_or(AmfError::InvalidReference(idx))?
        } else {
            let is_dynamic = header & 8 != 0;
            let sealed_count = (header >> 4) as usize;
            // class name is dropped, typed objects decode as plain objects
            let _class_name = self.read_string(buf)?;
            let mut sealed = Vec::with_capacity(sealed_count.min(256));
            for _ in 0..sealed_count {
                sealed.push(self.read_string(buf)?);
            }
            let def = TraitDef { is_dynamic, sealed };
            self.trait_refs.push(def.clone());
            def
        };

        let mut props = AmfObject::new();
        for name in &traits.sealed {
            let value = self.read_value(buf)?;
            props.insert(name.clone(), value);
        }
        if traits.is_dynamic {
            loop {
                let key = self.read_string(buf)?;
                if key.is_empty() {
                    break;
                }
                let value = self.read_value(buf)?;
                props.insert(key, value);
            }
        }

        let value = AmfValue::Object(props);
        self.object_refs[slot] = value.clone();
        Ok(value)
    }

    fn read_xml(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            return self.object_ref(header);
        }
        let len = (header >> 1) as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }
        let bytes = buf.copy_to_bytes(len);
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;
        let value = AmfValue::String(s);
        self.object_refs.push(value.clone());
        Ok(value)
    }

    /// String body (after the marker) with reference handling
    fn read_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            let idx = header >> 1;
            return self
                .string_refs
                .get(idx as usize)
                .cloned()
                .ok_or(AmfError::InvalidReference(idx));
        }

        let len = (header >> 1) as usize;
        if len == 0 {
            return Ok(String::new());
        }
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }

        let bytes = buf.copy_to_bytes(len);
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;
        // empty strings are never referenced
        self.string_refs.push(s.clone());
        Ok(s)
    }
}

/// Read a U29 variable-length integer
pub(crate) fn read_u29(buf: &mut Bytes) -> Result<u32, AmfError> {
    let mut value: u32 = 0;
    for i in 0..4 {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        let byte = buf.get_u8();
        if i < 3 {
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                break;
            }
        } else {
            // fourth byte contributes all 8 bits
            value = (value << 8) | byte as u32;
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn put_u29(buf: &mut BytesMut, value: u32) {
        let value = value & 0x1FFF_FFFF;
        if value < 0x80 {
            buf.put_u8(value as u8);
        } else if value < 0x4000 {
            buf.put_u8(((value >> 7) | 0x80) as u8);
            buf.put_u8((value & 0x7F) as u8);
        } else if value < 0x20_0000 {
            buf.put_u8(((value >> 14) | 0x80) as u8);
            buf.put_u8(((value >> 7) | 0x80) as u8);
            buf.put_u8((value & 0x7F) as u8);
        } else {
            buf.put_u8(((value >> 22) | 0x80) as u8);
            buf.put_u8(((value >> 15) | 0x80) as u8);
            buf.put_u8(((value >> 8) | 0x80) as u8);
            buf.put_u8((value & 0xFF) as u8);
        }
    }

    fn put_str(buf: &mut BytesMut, s: &str) {
        put_u29(buf, ((s.len() as u32) << 1) | 1);
        buf.put_slice(s.as_bytes());
    }

    #[test]
    fn test_u29_ranges() {
        let values = [0u32, 127, 128, 16383, 16384, 2_097_151, 2_097_152, 0x0FFF_FFFF];
        let mut buf = BytesMut::new();
        for v in values {
            put_u29(&mut buf, v);
        }
        let mut bytes = buf.freeze();
        for v in values {
            assert_eq!(read_u29(&mut bytes).unwrap(), v);
        }
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_negative_integer() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_INTEGER);
        put_u29(&mut buf, 0x1FFF_FFFF); // -1 in 29-bit two's complement
        let mut bytes = buf.freeze();
        let value = Amf3Reader::new().read_value(&mut bytes).unwrap();
        assert_eq!(value, AmfValue::Integer(-1));
    }

    #[test]
    fn test_string_reference() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_STRING);
        put_str(&mut buf, "hello");
        buf.put_u8(MARKER_STRING);
        put_u29(&mut buf, 0); // reference to index 0
        let mut bytes = buf.freeze();

        let mut reader = Amf3Reader::new();
        assert_eq!(reader.read_typed_string(&mut bytes).unwrap(), "hello");
        assert_eq!(reader.read_typed_string(&mut bytes).unwrap(), "hello");
    }

    #[test]
    fn test_dynamic_object() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_OBJECT);
        put_u29(&mut buf, 0x0B); // inline, traits inline, dynamic, 0 sealed
        put_str(&mut buf, ""); // anonymous class
        put_str(&mut buf, "level");
        buf.put_u8(MARKER_STRING);
        put_str(&mut buf, "status");
        put_str(&mut buf, "count");
        buf.put_u8(MARKER_INTEGER);
        put_u29(&mut buf, 3);
        put_u29(&mut buf, 1); // end of dynamic members
        let mut bytes = buf.freeze();

        let value = Amf3Reader::new().read_value(&mut bytes).unwrap();
        assert_eq!(value.get_string("level"), Some("status"));
        assert_eq!(value.get_number("count"), Some(3.0));
    }

    #[test]
    fn test_dense_array() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_ARRAY);
        put_u29(&mut buf, (2 << 1) | 1);
        put_u29(&mut buf, 1); // no associative part
        buf.put_u8(MARKER_TRUE);
        buf.put_u8(MARKER_NULL);
        let mut bytes = buf.freeze();

        let value = Amf3Reader::new().read_value(&mut bytes).unwrap();
        assert_eq!(
            value,
            AmfValue::StrictArray(vec![AmfValue::Boolean(true), AmfValue::Null])
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut bytes = Bytes::from_static(&[MARKER_TRUE]);
        let err = Amf3Reader::new().read_typed_string(&mut bytes).unwrap_err();
        assert_eq!(
            err,
            AmfError::TypeMismatch {
                expected: "string",
                found: MARKER_TRUE
            }
        );
    }

    #[test]
    fn test_byte_array_rejected() {
        let mut bytes = Bytes::from_static(&[0x0C, 0x01]);
        assert_eq!(
            Amf3Reader::new().read_value(&mut bytes),
            Err(AmfError::UnknownMarker(0x0C))
        );
    }

    #[test]
    fn test_truncated_double() {
        let mut bytes = Bytes::from_static(&[MARKER_DOUBLE, 0x40, 0x00]);
        assert_eq!(
            Amf3Reader::new().read_value(&mut bytes),
            Err(AmfError::UnexpectedEof)
        );
    }
}
