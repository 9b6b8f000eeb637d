//! H.265 over RTMP (legacy codec id 12)

use bytes::{BufMut, Bytes, BytesMut};

use super::avc::video_header;
use super::frame::{CodecId, Frame, Track};
use super::registry::RtmpCodec;
use crate::error::{MediaError, Result};
use crate::media::h264::{self, composition_time, AvcPacketType, NaluIterator};
use crate::media::h265::{self, HevcConfig};
use crate::protocol::constants::STREAM_MEDIA;
use crate::protocol::RtmpPacket;

const HEVC_CODEC_ID: u8 = 12;

/// Access unit delimiter
const NAL_AUD: u8 = 35;

pub struct HevcCodec {
    track: Track,
    nalu_length_size: u8,
}

impl HevcCodec {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            nalu_length_size: 4,
        }
    }
}

impl RtmpCodec for HevcCodec {
    fn track(&self) -> &Track {
        &self.track
    }

    fn track_mut(&mut self) -> &mut Track {
        &mut self.track
    }

    fn config_packet(&self) -> Option<RtmpPacket> {
        let config = HevcConfig::from_parameter_sets(
            self.track.vps.clone()?,
            self.track.sps.clone()?,
            self.track.pps.clone()?,
        )
        .ok()?;
        let record = config.to_bytes();
        let mut body = BytesMut::with_capacity(5 + record.len());
        video_header(&mut body, true, HEVC_CODEC_ID, AvcPacketType::SequenceHeader as u8, 0);
        body.put_slice(&record);
        Some(RtmpPacket::video(STREAM_MEDIA, 0, body.freeze()))
    }

    fn encode(&mut self, frame: &Frame) -> Result<Option<RtmpPacket>> {
        self.track.input_frame(frame);

        let mut key = frame.key;
        let mut payload: Vec<Bytes> = Vec::new();
        for nalu in h264::split_annexb(&frame.data) {
            let Some(&header) = nalu.first() else {
                continue;
            };
            let kind = h265::nal_type(header);
            if h265::is_parameter_set(kind) || kind == NAL_AUD {
                continue;
            }
            key |= h265::is_irap(kind);
            payload.push(nalu);
        }
        if payload.is_empty() {
            return Ok(None);
        }

        let cts = frame.pts.wrapping_sub(frame.dts) as i32;
        let mut body = BytesMut::with_capacity(5 + payload.iter().map(|n| n.len() + 4).sum::<usize>());
        video_header(&mut body, key, HEVC_CODEC_ID, AvcPacketType::Nalu as u8, cts);
        h264::write_avcc(&payload, &mut body);
        Ok(Some(RtmpPacket::video(STREAM_MEDIA, frame.dts, body.freeze())))
    }

    fn decode(&mut self, pkt: &RtmpPacket) -> Result<Vec<Frame>> {
        if pkt.body.len() < 5 {
            return Err(MediaError::InvalidHevcPacket.into());
        }
        match AvcPacketType::from_byte(pkt.body[1]) {
            Some(AvcPacketType::SequenceHeader) => {
                let config = HevcConfig::parse(pkt.body.slice(5..))?;
                self.nalu_length_size = config.nalu_length_size;
                let data = h264::join_annexb(config.vps.iter().chain(&config.sps).chain(&config.pps));
                let frame = Frame::new(CodecId::H265, pkt.timestamp, pkt.timestamp, data)
                    .key(true)
                    .config(true);
                self.track.input_frame(&frame);
                Ok(vec![frame])
            }
            Some(AvcPacketType::Nalu) => {
                let nalus: Vec<Bytes> =
                    NaluIterator::new(pkt.body.slice(5..), self.nalu_length_size).collect();
                if nalus.is_empty() {
                    return Ok(Vec::new());
                }
                let cts = composition_time(&pkt.body);
                let frame = Frame::new(
                    CodecId::H265,
                    pkt.timestamp,
                    pkt.timestamp.wrapping_add(cts as u32),
                    h264::join_annexb(&nalus),
                )
                .key(pkt.body[0] >> 4 == 1);
                self.track.input_frame(&frame);
                Ok(vec![frame])
            }
            Some(AvcPacketType::EndOfSequence) => Ok(Vec::new()),
            None => Err(MediaError::InvalidHevcPacket.into()),
        }
    }
}
