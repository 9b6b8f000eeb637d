//! Protocol control and user control messages
//!
//! ```text
//! type 1 set chunk size     size(4)
//! type 2 abort              chunk stream id(4)
//! type 3 acknowledgement    sequence number(4)
//! type 4 user control       event(2) | data
//! type 5 window ack size    size(4)
//! type 6 set peer bandwidth size(4) | limit type(1)
//! ```
//!
//! All of these travel on chunk stream 2, message stream 0.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use super::packet::RtmpPacket;
use crate::error::{ProtocolError, Result};

/// User control event (message type 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControl {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    /// Event type this crate does not interpret
    Unknown(u16),
}

/// A parsed protocol control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControl),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
}

impl ControlMessage {
    /// Parse a type 1-6 message body
    pub fn parse(type_id: u8, body: &Bytes) -> Result<Self> {
        let mut buf = body.clone();
        let malformed = || ProtocolError::MalformedControl(type_id);

        let need = |buf: &Bytes, n: usize| {
            if buf.remaining() < n {
                Err(malformed())
            } else {
                Ok(())
            }
        };

        let msg = match type_id {
            MSG_SET_CHUNK => {
                need(&buf, 4)?;
                // top bit is reserved
                ControlMessage::SetChunkSize(buf.get_u32() & 0x7FFF_FFFF)
            }
            MSG_ABORT => {
                need(&buf, 4)?;
                ControlMessage::Abort(buf.get_u32())
            }
            MSG_ACK => {
                need(&buf, 4)?;
                ControlMessage::Acknowledgement(buf.get_u32())
            }
            MSG_WIN_SIZE => {
                need(&buf, 4)?;
                ControlMessage::WindowAckSize(buf.get_u32())
            }
            MSG_SET_PEER_BW => {
                need(&buf, 5)?;
                ControlMessage::SetPeerBandwidth {
                    size: buf.get_u32(),
                    limit_type: buf.get_u8(),
                }
            }
            MSG_USER_CONTROL => {
                need(&buf, 2)?;
                let event = buf.get_u16();
                ControlMessage::UserControl(parse_user_control(event, &mut buf)?)
            }
            _ => return Err(malformed().into()),
        };
        Ok(msg)
    }

    pub fn type_id(&self) -> u8 {
        match self {
            ControlMessage::SetChunkSize(_) => MSG_SET_CHUNK,
            ControlMessage::Abort(_) => MSG_ABORT,
            ControlMessage::Acknowledgement(_) => MSG_ACK,
            ControlMessage::UserControl(_) => MSG_USER_CONTROL,
            ControlMessage::WindowAckSize(_) => MSG_WIN_SIZE,
            ControlMessage::SetPeerBandwidth { .. } => MSG_SET_PEER_BW,
        }
    }

    /// Encode the body
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10);
        match *self {
            ControlMessage::SetChunkSize(v)
            | ControlMessage::Abort(v)
            | ControlMessage::Acknowledgement(v)
            | ControlMessage::WindowAckSize(v) => buf.put_u32(v),
            ControlMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(size);
                buf.put_u8(limit_type);
            }
            ControlMessage::UserControl(event) => encode_user_control(event, &mut buf),
        }
        buf.freeze()
    }

    /// Wrap as a packet on the network chunk stream
    pub fn to_packet(&self) -> RtmpPacket {
        RtmpPacket::new(self.type_id(), CHUNK_NETWORK, STREAM_CONTROL, 0, self.encode())
    }
}

fn parse_user_control(event: u16, buf: &mut Bytes) -> Result<UserControl> {
    let u32_arg = |buf: &mut Bytes| {
        if buf.remaining() < 4 {
            Err(ProtocolError::MalformedControl(MSG_USER_CONTROL))
        } else {
            Ok(buf.get_u32())
        }
    };

    let ev = match event {
        CONTROL_STREAM_BEGIN => {
            // some servers send a bare event here; treat as stream 0
            if buf.remaining() < 4 {
                tracing::warn!(len = buf.remaining(), "short stream begin event");
                UserControl::StreamBegin(0)
            } else {
                UserControl::StreamBegin(buf.get_u32())
            }
        }
        CONTROL_STREAM_EOF => UserControl::StreamEof(u32_arg(buf)?),
        CONTROL_STREAM_DRY => UserControl::StreamDry(u32_arg(buf)?),
        CONTROL_SETBUFFER => {
            let stream_id = u32_arg(buf)?;
            let buffer_ms = u32_arg(buf)?;
            UserControl::SetBufferLength {
                stream_id,
                buffer_ms,
            }
        }
        CONTROL_STREAM_IS_RECORDED => UserControl::StreamIsRecorded(u32_arg(buf)?),
        CONTROL_PING_REQUEST => UserControl::PingRequest(u32_arg(buf)?),
        CONTROL_PING_RESPONSE => UserControl::PingResponse(u32_arg(buf)?),
        other => UserControl::Unknown(other),
    };
    Ok(ev)
}

fn encode_user_control(event: UserControl, buf: &mut BytesMut) {
    match event {
        UserControl::StreamBegin(id) => {
            buf.put_u16(CONTROL_STREAM_BEGIN);
            buf.put_u32(id);
        }
        UserControl::StreamEof(id) => {
            buf.put_u16(CONTROL_STREAM_EOF);
            buf.put_u32(id);
        }
        UserControl::StreamDry(id) => {
            buf.put_u16(CONTROL_STREAM_DRY);
            buf.put_u32(id);
        }
        UserControl::SetBufferLength {
            stream_id,
            buffer_ms,
        } => {
            buf.put_u16(CONTROL_SETBUFFER);
            buf.put_u32(stream_id);
            buf.put_u32(buffer_ms);
        }
        UserControl::StreamIsRecorded(id) => {
            buf.put_u16(CONTROL_STREAM_IS_RECORDED);
            buf.put_u32(id);
        }
        UserControl::PingRequest(ts) => {
            buf.put_u16(CONTROL_PING_REQUEST);
            buf.put_u32(ts);
        }
        UserControl::PingResponse(ts) => {
            buf.put_u16(CONTROL_PING_RESPONSE);
            buf.put_u32(ts);
        }
        UserControl::Unknown(ev) => buf.put_u16(ev),
    }
}

/// Split an aggregate message (type 22) into its sub-messages.
///
/// Each sub-message is an FLV-style tag:
///
/// ```text
/// type(1) size(3) timestamp(3) timestamp ext(1) stream id(3) | body | back pointer(4)
/// ```
///
/// The first sub-message takes the aggregate's timestamp; later ones are
/// offset by their delta from the first. A trailing fragment that does not
/// fit is ignored.
pub fn split_aggregate(aggregate: &RtmpPacket) -> Result<Vec<RtmpPacket>> {
    const SUB_HEADER: usize = 11;
    const BACK_POINTER: usize = 4;

    let mut buf = aggregate.body.clone();
    let mut out = Vec::new();
    let mut timestamp = aggregate.timestamp;
    let mut latest: Option<u32> = None;

    while buf.len() > SUB_HEADER {
        let type_id = buf[0];
        let size = ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | buf[3] as usize;
        let ts = ((buf[7] as u32) << 24)
            | ((buf[4] as u32) << 16)
            | ((buf[5] as u32) << 8)
            | buf[6] as u32;
        if SUB_HEADER + size > buf.len() {
            break;
        }
        buf.advance(SUB_HEADER);

        if let Some(prev) = latest {
            timestamp = timestamp.wrapping_add(ts.wrapping_sub(prev));
        }
        latest = Some(ts);

        let body = buf.split_to(size);
        let mut sub = RtmpPacket::new(
            type_id,
            aggregate.chunk_id,
            aggregate.stream_id,
            timestamp,
            body,
        );
        sub.is_abs_stamp = true;
        out.push(sub);

        if buf.len() < BACK_POINTER {
            break;
        }
        buf.advance(BACK_POINTER);
    }

    if out.is_empty() && !aggregate.body.is_empty() {
        return Err(ProtocolError::InvalidAggregate.into());
    }
    Ok(out)
}
