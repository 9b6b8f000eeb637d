//! AAC over RTMP

use bytes::{BufMut, BytesMut};

use super::frame::{CodecId, Frame, Track};
use super::registry::RtmpCodec;
use crate::error::{MediaError, Result};
use crate::media::aac::{AacPacketType, AdtsHeader};
use crate::protocol::constants::STREAM_MEDIA;
use crate::protocol::RtmpPacket;

/// AAC, 44 kHz slot, 16 bit, stereo: players ignore the rate/channel bits
/// and read the AudioSpecificConfig instead
const AAC_FLAGS: u8 = 0xAF;

pub struct AacCodec {
    track: Track,
}

impl AacCodec {
    pub fn new(track: Track) -> Self {
        Self { track }
    }

    fn packet(&self, packet_type: AacPacketType, timestamp: u32, data: &[u8]) -> RtmpPacket {
        let mut body = BytesMut::with_capacity(2 + data.len());
        body.put_u8(AAC_FLAGS);
        body.put_u8(packet_type as u8);
        body.put_slice(data);
        RtmpPacket::audio(STREAM_MEDIA, timestamp, body.freeze())
    }
}

impl RtmpCodec for AacCodec {
    fn track(&self) -> &Track {
        &self.track
    }

    fn track_mut(&mut self) -> &mut Track {
        &mut self.track
    }

    fn config_packet(&self) -> Option<RtmpPacket> {
        let config = self.track.audio_config.as_ref()?;
        Some(self.packet(AacPacketType::SequenceHeader, 0, config))
    }

    fn encode(&mut self, frame: &Frame) -> Result<Option<RtmpPacket>> {
        if frame.config {
            self.track.input_frame(frame);
            return Ok(None);
        }

        let mut data = frame.data.clone();
        if let Some(adts) = AdtsHeader::parse(&data) {
            if self.track.audio_config.is_none() {
                let config = adts.to_config()?;
                self.track
                    .input_frame(&Frame::new(CodecId::Aac, 0, 0, config.raw).config(true));
            }
            let end = adts.frame_len.min(data.len());
            data = data.slice(adts.header_len..end);
        }
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.packet(AacPacketType::Raw, frame.dts, &data)))
    }

    fn decode(&mut self, pkt: &RtmpPacket) -> Result<Vec<Frame>> {
        if pkt.body.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }
        let data = pkt.body.slice(2..);
        match AacPacketType::from_byte(pkt.body[1]) {
            Some(AacPacketType::SequenceHeader) => {
                let frame = Frame::new(CodecId::Aac, pkt.timestamp, pkt.timestamp, data).config(true);
                self.track.input_frame(&frame);
                Ok(vec![frame])
            }
            Some(AacPacketType::Raw) if data.is_empty() => Ok(Vec::new()),
            Some(AacPacketType::Raw) => Ok(vec![Frame::new(
                CodecId::Aac,
                pkt.timestamp,
                pkt.timestamp,
                data,
            )]),
            None => Err(MediaError::InvalidAacPacket.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::aac::{adts_header, AudioSpecificConfig};

    #[test]
    fn test_aac_roundtrip() {
        let mut encoder = AacCodec::new(Track::new(CodecId::Aac));
        assert!(encoder.config_packet().is_none());
        let asc = Frame::new(CodecId::Aac, 0, 0, Bytes::from_static(&[0x12, 0x10])).config(true);
        assert_eq!(encoder.encode(&asc).unwrap(), None);

        let config = encoder.config_packet().unwrap();
        assert_eq!(&config.body[..], &[0xAF, 0, 0x12, 0x10]);
        assert!(config.is_config_frame());

        let mut decoder = AacCodec::new(Track::new(CodecId::Aac));
        assert_eq!(decoder.decode(&config).unwrap(), vec![asc.clone()]);
        assert_eq!(decoder.track().sample_rate, 44100);

        let frame = Frame::new(CodecId::Aac, 23, 23, Bytes::from_static(&[0x21, 0x10, 0x05]));
        let pkt = encoder.encode(&frame).unwrap().unwrap();
        assert_eq!(&pkt.body[..2], &[0xAF, 1]);
        assert_eq!(decoder.decode(&pkt).unwrap(), vec![frame]);
    }

    #[test]
    fn test_adts_is_stripped_and_learned() {
        let mut codec = AacCodec::new(Track::new(CodecId::Aac));
        let config = AudioSpecificConfig::build(2, 48000, 1).unwrap();
        let raw = [0x21u8, 0x22, 0x23];
        let mut data = adts_header(&config, raw.len()).to_vec();
        data.extend_from_slice(&raw);

        let pkt = codec
            .encode(&Frame::new(CodecId::Aac, 0, 0, Bytes::from(data)))
            .unwrap()
            .unwrap();
        assert_eq!(&pkt.body[2..], &raw);
        assert_eq!(codec.track().audio_config.as_ref(), Some(&config.raw));
        assert_eq!(codec.track().sample_rate, 48000);
    }

    #[test]
    fn test_decode_errors() {
        let mut codec = AacCodec::new(Track::new(CodecId::Aac));
        assert!(codec.decode(&RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF]))).is_err());
        assert!(codec.decode(&RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 7]))).is_err());
        assert!(codec.decode(&RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 1]))).unwrap().is_empty());
    }
}
