//! Codec-neutral frames and track descriptions

use std::fmt;

use bytes::Bytes;

use crate::media::h264::{self, NaluType, SpsInfo};
use crate::media::{aac::AudioSpecificConfig, h265};
use crate::protocol::constants::{MSG_AUDIO, MSG_VIDEO};

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    pub fn from_message_type(type_id: u8) -> Option<Self> {
        match type_id {
            MSG_VIDEO => Some(TrackType::Video),
            MSG_AUDIO => Some(TrackType::Audio),
            _ => None,
        }
    }

    pub fn message_type(&self) -> u8 {
        match self {
            TrackType::Video => MSG_VIDEO,
            TrackType::Audio => MSG_AUDIO,
        }
    }
}

/// Codecs the bridge can carry over RTMP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    H265,
    Aac,
    G711A,
    G711U,
    Opus,
}

impl CodecId {
    pub fn track_type(&self) -> TrackType {
        match self {
            CodecId::H264 | CodecId::H265 => TrackType::Video,
            _ => TrackType::Audio,
        }
    }

    /// FLV codec id (video low nibble / audio high nibble)
    pub fn flv_id(&self) -> u8 {
        match self {
            CodecId::H264 => 7,
            CodecId::H265 => 12,
            CodecId::Aac => 10,
            CodecId::G711A => 7,
            CodecId::G711U => 8,
            CodecId::Opus => 13,
        }
    }

    pub fn from_flv(track: TrackType, id: u8) -> Option<Self> {
        match (track, id) {
            (TrackType::Video, 7) => Some(CodecId::H264),
            (TrackType::Video, 12) => Some(CodecId::H265),
            (TrackType::Audio, 10) => Some(CodecId::Aac),
            (TrackType::Audio, 7) => Some(CodecId::G711A),
            (TrackType::Audio, 8) => Some(CodecId::G711U),
            (TrackType::Audio, 13) => Some(CodecId::Opus),
            _ => None,
        }
    }

    /// Codec from a metadata `videocodecid`/`audiocodecid` string
    pub fn from_fourcc(name: &str) -> Option<Self> {
        match name {
            "avc1" | "h264" => Some(CodecId::H264),
            "hvc1" | "hev1" | "h265" => Some(CodecId::H265),
            "mp4a" | "aac" => Some(CodecId::Aac),
            "alaw" => Some(CodecId::G711A),
            "ulaw" => Some(CodecId::G711U),
            "Opus" | "opus" => Some(CodecId::Opus),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::H264 => "H264",
            CodecId::H265 => "H265",
            CodecId::Aac => "AAC",
            CodecId::G711A => "PCMA",
            CodecId::G711U => "PCMU",
            CodecId::Opus => "opus",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One elementary-stream frame
///
/// Video data is an Annex B access unit (4-byte start codes); AAC data is a
/// raw access unit without ADTS. Configuration frames carry parameter sets
/// (video) or an AudioSpecificConfig (AAC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub codec: CodecId,
    /// Decode timestamp in milliseconds
    pub dts: u32,
    /// Presentation timestamp in milliseconds
    pub pts: u32,
    pub data: Bytes,
    /// Video key frame
    pub key: bool,
    /// Decoder configuration rather than media
    pub config: bool,
}

impl Frame {
    pub fn new(codec: CodecId, dts: u32, pts: u32, data: Bytes) -> Self {
        Self {
            codec,
            dts,
            pts,
            data,
            key: false,
            config: false,
        }
    }

    pub fn key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn config(mut self, config: bool) -> Self {
        self.config = config;
        self
    }

    pub fn track_type(&self) -> TrackType {
        self.codec.track_type()
    }
}

/// Track description plus the configuration learned from its frames
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub codec: CodecId,
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_bits: u32,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Bits per second, 0 when unknown
    pub bit_rate: u32,
    pub vps: Option<Bytes>,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
    /// AudioSpecificConfig for AAC
    pub audio_config: Option<Bytes>,
}

impl Track {
    pub fn new(codec: CodecId) -> Self {
        let (sample_rate, channels, sample_bits) = match codec {
            CodecId::H264 | CodecId::H265 => (0, 0, 0),
            CodecId::G711A | CodecId::G711U => (8000, 1, 16),
            CodecId::Opus => (48000, 2, 16),
            CodecId::Aac => (44100, 2, 16),
        };
        Self {
            codec,
            sample_rate,
            channels,
            sample_bits,
            width: 0,
            height: 0,
            fps: 0.0,
            bit_rate: 0,
            vps: None,
            sps: None,
            pps: None,
            audio_config: None,
        }
    }

    pub fn video(codec: CodecId, width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            ..Self::new(codec)
        }
    }

    pub fn audio(codec: CodecId, sample_rate: u32, channels: u32, sample_bits: u32) -> Self {
        Self {
            sample_rate,
            channels,
            sample_bits,
            ..Self::new(codec)
        }
    }

    pub fn track_type(&self) -> TrackType {
        self.codec.track_type()
    }

    /// Whether enough configuration is known to emit a sequence header
    pub fn is_ready(&self) -> bool {
        match self.codec {
            CodecId::H264 => self.sps.is_some() && self.pps.is_some(),
            CodecId::H265 => self.vps.is_some() && self.sps.is_some() && self.pps.is_some(),
            CodecId::Aac => self.audio_config.is_some(),
            CodecId::G711A | CodecId::G711U | CodecId::Opus => true,
        }
    }

    /// Learn configuration carried by `frame`.
    ///
    /// Returns `true` when a stored parameter set or config changed.
    pub fn input_frame(&mut self, frame: &Frame) -> bool {
        match self.codec {
            CodecId::H264 => {
                let mut changed = false;
                for nalu in h264::split_annexb(&frame.data) {
                    let Some(&header) = nalu.first() else {
                        continue;
                    };
                    match NaluType::from_byte(header) {
                        NaluType::Sps => {
                            if let Some(info) = SpsInfo::parse(&nalu) {
                                self.width = info.width;
                                self.height = info.height;
                            }
                            changed |= replace(&mut self.sps, nalu);
                        }
                        NaluType::Pps => changed |= replace(&mut self.pps, nalu),
                        _ => {}
                    }
                }
                changed
            }
            CodecId::H265 => {
                let mut changed = false;
                for nalu in h264::split_annexb(&frame.data) {
                    let Some(&header) = nalu.first() else {
                        continue;
                    };
                    match h265::nal_type(header) {
                        h265::NAL_VPS => changed |= replace(&mut self.vps, nalu),
                        h265::NAL_SPS => changed |= replace(&mut self.sps, nalu),
                        h265::NAL_PPS => changed |= replace(&mut self.pps, nalu),
                        _ => {}
                    }
                }
                changed
            }
            CodecId::Aac if frame.config => {
                if let Ok(asc) = AudioSpecificConfig::parse(frame.data.clone()) {
                    self.sample_rate = asc.sampling_frequency;
                    self.channels = asc.channel_configuration as u32;
                }
                replace(&mut self.audio_config, frame.data.clone())
            }
            _ => false,
        }
    }
}

fn replace(slot: &mut Option<Bytes>, value: Bytes) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}
