//! Command and data messages
//!
//! Command message body (AMF0, or AMF0 preceded by one 0x00 byte for the
//! AMF3 message types):
//!
//! ```text
//! name (string) | transaction id (number) | command object | arguments...
//! ```
//!
//! Data messages carry a name followed by values; a publisher wraps its
//! metadata as `@setDataFrame, "onMetaData", {...}`.

use bytes::Bytes;

use super::constants::*;
use super::packet::RtmpPacket;
use crate::amf::{Amf0Encoder, AmfDecoder, AmfValue};
use crate::error::{ProtocolError, Result};

/// Strip the format byte of AMF3-typed command/data messages
fn amf_payload(pkt: &RtmpPacket) -> Bytes {
    match pkt.type_id {
        MSG_CMD3 | MSG_DATA3 if pkt.body.first() == Some(&0) => pkt.body.slice(1..),
        _ => pkt.body.clone(),
    }
}

/// A decoded command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Usually an object for requests and null for replies
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
        }
    }

    pub fn object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn arg(mut self, value: impl Into<AmfValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    /// Decode a command message (type 17 or 20)
    pub fn parse(pkt: &RtmpPacket) -> Result<Self> {
        if !pkt.is_command() {
            return Err(ProtocolError::UnexpectedMessage(format!("type {} is not a command", pkt.type_id)).into());
        }
        let mut dec = AmfDecoder::new(amf_payload(pkt));
        let name = dec.read_string()?;
        let mut values = dec.read_all()?.into_iter();
        let mut next = values.next();
        // notifications such as onMetaData may omit the transaction id
        let transaction_id = match next.as_ref().and_then(AmfValue::as_number) {
            Some(id) => {
                next = values.next();
                id
            }
            None => 0.0,
        };
        let command_object = next.unwrap_or_default();
        let arguments = values.collect();
        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut enc = Amf0Encoder::new();
        enc.string(&self.name)
            .number(self.transaction_id)
            .encode(&self.command_object)
            .encode_all(&self.arguments);
        enc.finish()
    }

    /// Command message on `chunk_id`/`stream_id`
    pub fn to_packet(&self, chunk_id: u32, stream_id: u32) -> RtmpPacket {
        RtmpPacket::new(MSG_CMD, chunk_id, stream_id, 0, self.encode())
    }

    /// Status information carried by `onStatus`, `_result` and `_error`:
    /// the first object argument, else an object in the command object slot
    pub fn status(&self) -> Option<StatusInfo> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find(|v| v.as_object().is_some())
            .map(StatusInfo::from_value)
    }

    /// First argument as a number (createStream's stream id)
    pub fn number_arg(&self) -> Option<f64> {
        self.arguments.iter().find_map(AmfValue::as_number)
    }
}

/// `level`/`code`/`description` triple of a status object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusInfo {
    pub level: String,
    pub code: String,
    pub description: String,
}

impl StatusInfo {
    pub const LEVEL_STATUS: &'static str = "status";
    pub const LEVEL_WARNING: &'static str = "warning";
    pub const LEVEL_ERROR: &'static str = "error";

    pub fn from_value(value: &AmfValue) -> Self {
        let field = |key: &str| value.get_string(key).unwrap_or_default().to_string();
        Self {
            level: field("level"),
            code: field("code"),
            description: field("description"),
        }
    }

    pub fn is_status(&self) -> bool {
        self.level == Self::LEVEL_STATUS
    }

    /// `status` or `warning`; anything else ends the session
    pub fn is_benign(&self) -> bool {
        self.level == Self::LEVEL_STATUS || self.level == Self::LEVEL_WARNING
    }

    pub fn to_value(&self) -> AmfValue {
        AmfValue::object_from([
            ("level", self.level.as_str()),
            ("code", self.code.as_str()),
            ("description", self.description.as_str()),
        ])
    }
}

/// A decoded data message (type 15 or 18)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
}

impl DataMessage {
    pub fn parse(pkt: &RtmpPacket) -> Result<Self> {
        if !pkt.is_data() {
            return Err(ProtocolError::UnexpectedMessage(format!("type {} is not data", pkt.type_id)).into());
        }
        let mut dec = AmfDecoder::new(amf_payload(pkt));
        let name = dec.read_string()?;
        let values = dec.read_all()?;
        Ok(Self { name, values })
    }

    /// Metadata carried by `onMetaData` or `@setDataFrame onMetaData`
    pub fn metadata(&self) -> Option<&AmfValue> {
        match self.name.as_str() {
            CMD_ON_META_DATA => self.values.first(),
            CMD_SET_DATA_FRAME if self.values.first().and_then(AmfValue::as_str) == Some(CMD_ON_META_DATA) => {
                self.values.get(1)
            }
            _ => None,
        }
    }

    /// `@setDataFrame "onMetaData" metadata`, as a publisher sends it
    pub fn set_data_frame(metadata: &AmfValue, stream_id: u32) -> RtmpPacket {
        let body = Amf0Encoder::new()
            .string(CMD_SET_DATA_FRAME)
            .string(CMD_ON_META_DATA)
            .encode(metadata)
            .finish();
        RtmpPacket::new(MSG_DATA, CHUNK_CLIENT_REQUEST_AFTER, stream_id, 0, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::new(CMD_CONNECT, 1.0)
            .object(AmfValue::object_from([("app", "live"), ("tcUrl", "rtmp://h/live")]))
            .arg(AmfValue::Null)
            .arg(3.0);
        let pkt = cmd.to_packet(CHUNK_SYSTEM, 0);
        assert_eq!(pkt.type_id, MSG_CMD);
        assert_eq!(Command::parse(&pkt).unwrap(), cmd);
    }

    #[test]
    fn test_amf3_command_skips_format_byte() {
        let plain = Command::new(CMD_RESULT, 2.0).arg(1.0).encode();
        let mut body = vec![0u8];
        body.extend_from_slice(&plain);
        let pkt = RtmpPacket::new(MSG_CMD3, 3, 0, 0, Bytes::from(body));
        let cmd = Command::parse(&pkt).unwrap();
        assert_eq!(cmd.name, CMD_RESULT);
        assert_eq!(cmd.number_arg(), Some(1.0));
    }

    #[test]
    fn test_status_lookup() {
        let info = StatusInfo {
            level: "error".into(),
            code: "NetStream.Play.StreamNotFound".into(),
            description: "not found".into(),
        };
        let cmd = Command::new(CMD_ON_STATUS, 0.0).arg(info.to_value());
        let status = cmd.status().unwrap();
        assert_eq!(status, info);
        assert!(!status.is_benign());

        // connect results put the properties object first and the info second
        let connect = Command::new(CMD_RESULT, 1.0)
            .object(AmfValue::object_from([("fmsVer", "FMS/3,0,1,123")]))
            .arg(AmfValue::object_from([("level", "status"), ("code", "NetConnection.Connect.Success")]));
        assert_eq!(connect.arguments[0].get_string("level"), Some("status"));
        assert!(Command::new(CMD_RESULT, 1.0).arg(1.0).status().is_none());
    }

    #[test]
    fn test_truncated_command() {
        let body = Amf0Encoder::new().string("onBWDone").finish();
        let cmd = Command::parse(&RtmpPacket::new(MSG_CMD, 3, 0, 0, body)).unwrap();
        assert_eq!(cmd.transaction_id, 0.0);
        assert!(cmd.arguments.is_empty());

        let bad = RtmpPacket::new(MSG_CMD, 3, 0, 0, Bytes::from_static(&[0x00, 0x40]));
        assert!(Command::parse(&bad).is_err());

        let meta = AmfValue::object_from([("width", 640.0)]);
        let body = Amf0Encoder::new().string(CMD_ON_META_DATA).encode(&meta).finish();
        let cmd = Command::parse(&RtmpPacket::new(MSG_CMD, 3, 1, 0, body)).unwrap();
        assert_eq!(cmd.transaction_id, 0.0);
        assert_eq!(cmd.command_object, meta);
        let video = RtmpPacket::video(1, 0, Bytes::from_static(&[0x17]));
        assert!(Command::parse(&video).is_err());
    }

    #[test]
    fn test_data_metadata_forms() {
        let meta = AmfValue::object_from([("width", 1280.0)]);
        let pkt = DataMessage::set_data_frame(&meta, 1);
        let data = DataMessage::parse(&pkt).unwrap();
        assert_eq!(data.name, CMD_SET_DATA_FRAME);
        assert_eq!(data.metadata(), Some(&meta));

        let body = Amf0Encoder::new().string(CMD_ON_META_DATA).encode(&meta).finish();
        let plain = DataMessage::parse(&RtmpPacket::new(MSG_DATA, 5, 1, 0, body)).unwrap();
        assert_eq!(plain.metadata(), Some(&meta));

        let body = Amf0Encoder::new().string("|RtmpSampleAccess").boolean(true).finish();
        let other = DataMessage::parse(&RtmpPacket::new(MSG_DATA, 5, 1, 0, body)).unwrap();
        assert_eq!(other.metadata(), None);
    }
}
