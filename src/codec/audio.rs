//! Audio codecs that need no sequence header (G.711, Opus)

use bytes::{BufMut, BytesMut};

use super::frame::{CodecId, Frame, Track};
use super::registry::RtmpCodec;
use crate::error::{MediaError, Result};
use crate::media::flv::{audio_flags, AudioFormat};
use crate::protocol::constants::STREAM_MEDIA;
use crate::protocol::RtmpPacket;

/// Opus, 44 kHz slot, 16 bit, stereo
const OPUS_FLAGS: u8 = 0xDF;

/// One flags byte followed by the raw frame
pub struct SimpleAudioCodec {
    track: Track,
    flags: u8,
}

impl SimpleAudioCodec {
    pub fn new(track: Track) -> Self {
        let flags = match track.codec {
            CodecId::G711A | CodecId::G711U => {
                let format = if track.codec == CodecId::G711A {
                    AudioFormat::G711ALaw
                } else {
                    AudioFormat::G711MuLaw
                };
                audio_flags(format, track.sample_rate, 16, track.channels)
                    .or_else(|| audio_flags(format, 8000, 16, track.channels))
                    .unwrap_or((format as u8) << 4)
            }
            _ => OPUS_FLAGS,
        };
        Self { track, flags }
    }
}

impl RtmpCodec for SimpleAudioCodec {
    fn track(&self) -> &Track {
        &self.track
    }

    fn track_mut(&mut self) -> &mut Track {
        &mut self.track
    }

    fn config_packet(&self) -> Option<RtmpPacket> {
        None
    }

    fn encode(&mut self, frame: &Frame) -> Result<Option<RtmpPacket>> {
        if frame.data.is_empty() {
            return Ok(None);
        }
        let mut body = BytesMut::with_capacity(1 + frame.data.len());
        body.put_u8(self.flags);
        body.put_slice(&frame.data);
        Ok(Some(RtmpPacket::audio(STREAM_MEDIA, frame.dts, body.freeze())))
    }

    fn decode(&mut self, pkt: &RtmpPacket) -> Result<Vec<Frame>> {
        if pkt.body.is_empty() {
            return Err(MediaError::EmptyPayload.into());
        }
        if pkt.body.len() == 1 {
            return Ok(Vec::new());
        }
        Ok(vec![Frame::new(
            self.track.codec,
            pkt.timestamp,
            pkt.timestamp,
            pkt.body.slice(1..),
        )])
    }
}
