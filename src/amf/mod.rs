//! Action Message Format
//!
//! AMF0 is read and written; AMF3 is read only, after an AVM+ switch marker.

pub mod amf0;
pub mod amf3;
pub mod value;

pub use amf0::{decode, decode_all, encode, encode_all, Amf0Encoder, AmfDecoder, AmfVersion};
pub use value::{AmfObject, AmfValue};
