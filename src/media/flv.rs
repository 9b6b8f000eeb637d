//! FLV tag layout
//!
//! Every RTMP audio/video/data message body is an FLV tag body. This module
//! holds the codec-id tables shared by the packet model and codec bridge, and
//! the tag framing used by the FLV muxer.
//!
//! FLV file:
//! ```text
//! "FLV" | version=1 | flags (0x04 audio, 0x01 video) | header len=9 (u32)
//! PreviousTagSize0 = 0 (u32)
//! { Type(1) | DataSize(3) | Timestamp(3) | TimestampExt(1) | StreamID(3)=0 | Data(N) | PreviousTagSize(4) = N + 11 }*
//! ```
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +-----------+----------+----------+----------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  |
//! +-----------+----------+----------+----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::constants::{MSG_AUDIO, MSG_DATA, MSG_VIDEO};

/// FLV header length including the signature
pub const FLV_HEADER_SIZE: u32 = 9;

/// Tag header length (type + size + timestamp + stream id)
pub const FLV_TAG_HEADER_SIZE: u32 = 11;

pub const FLV_FLAG_AUDIO: u8 = 0x04;
pub const FLV_FLAG_VIDEO: u8 = 0x01;

/// FLV tag type; the byte values equal the RTMP message type ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

impl FlvTagType {
    /// Map an RTMP message type onto a tag type
    pub fn from_message_type(type_id: u8) -> Option<Self> {
        match type_id {
            MSG_AUDIO => Some(FlvTagType::Audio),
            MSG_VIDEO => Some(FlvTagType::Video),
            MSG_DATA => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265), legacy non-enhanced id
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    /// Opus, legacy non-enhanced id
    Opus = 13,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            13 => Some(AudioFormat::Opus),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Build an audio flags byte.
///
/// Returns `None` for rates FLV cannot signal. 8 kHz and 16 kHz share the
/// 5.5 kHz slot, as G.711 producers expect.
pub fn audio_flags(format: AudioFormat, sample_rate: u32, sample_bits: u32, channels: u32) -> Option<u8> {
    let rate = match sample_rate {
        44100 => 3,
        22050 => 2,
        11025 => 1,
        16000 | 8000 | 5512 => 0,
        _ => return None,
    };
    let bits = (sample_bits == 16) as u8;
    let stereo = (channels > 1) as u8;
    Some(((format as u8) << 4) | (rate << 2) | (bits << 1) | stereo)
}

/// One FLV tag ready for serialization
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Append tag header, body and trailing PreviousTagSize
    pub fn write_to(&self, out: &mut BytesMut) {
        let size = self.data.len() as u32;
        out.reserve(size as usize + FLV_TAG_HEADER_SIZE as usize + 4);
        out.put_u8(self.tag_type as u8);
        put_u24(out, size);
        put_u24(out, self.timestamp & 0x00FF_FFFF);
        out.put_u8((self.timestamp >> 24) as u8);
        put_u24(out, 0);
        out.put_slice(&self.data);
        out.put_u32(size + FLV_TAG_HEADER_SIZE);
    }
}

/// Append the 9-byte FLV header followed by PreviousTagSize0
pub fn write_file_header(out: &mut BytesMut, has_audio: bool, has_video: bool) {
    let mut flags = 0u8;
    if has_audio {
        flags |= FLV_FLAG_AUDIO;
    }
    if has_video {
        flags |= FLV_FLAG_VIDEO;
    }
    out.put_slice(b"FLV");
    out.put_u8(0x01);
    out.put_u8(flags);
    out.put_u32(FLV_HEADER_SIZE);
    out.put_u32(0);
}

pub(crate) fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}
