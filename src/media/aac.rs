//! AAC audio helpers
//!
//! RTMP transports AAC audio in raw format (without ADTS headers).
//!
//! AAC Audio Packet Structure:
//! ```text
//! +-----------+---------+----------+----------+---------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | (1 byte)|
//! +-----------+---------+----------+----------+---------+
//! ```
//!
//! AACPacketType:
//! - 0: AAC sequence header (AudioSpecificConfig)
//! - 1: AAC raw frame data

use bytes::Bytes;

use crate::error::{MediaError, Result};

/// Length of an ADTS header without CRC
pub const ADTS_HEADER_SIZE: usize = 7;

/// Standard sampling frequencies by index
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// Index of `rate` in the standard frequency table
pub fn frequency_index(rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == rate)
        .map(|i| i as u8)
}

/// AudioSpecificConfig (from sequence header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC)
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        // audioObjectType: 5 bits
        // samplingFrequencyIndex: 4 bits
        // if (samplingFrequencyIndex == 0xf) samplingFrequency: 24 bits
        // channelConfiguration: 4 bits
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, channel_configuration) = if sampling_frequency_index == 0x0F {
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            let channels = (data[4] >> 3) & 0x0F;
            ((f0 << 17) | (f1 << 9) | (f2 << 1) | f3, channels)
        } else {
            let freq = *SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .ok_or(MediaError::InvalidAacPacket)?;
            (freq, (b1 >> 3) & 0x0F)
        };

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            raw: data,
        })
    }

    /// Build a two-byte config from stream parameters
    pub fn build(audio_object_type: u8, sample_rate: u32, channels: u8) -> Result<Self> {
        let index = frequency_index(sample_rate).ok_or(MediaError::InvalidAacPacket)?;
        let b0 = (audio_object_type << 3) | (index >> 1);
        let b1 = ((index & 1) << 7) | ((channels & 0x0F) << 3);
        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index: index,
            sampling_frequency: sample_rate,
            channel_configuration: channels,
            raw: Bytes::copy_from_slice(&[b0, b1]),
        })
    }

    /// Samples per frame (1024 for AAC-LC)
    pub fn samples_per_frame(&self) -> u32 {
        if self.audio_object_type == 5 || self.audio_object_type == 29 {
            2048 // HE-AAC
        } else {
            1024
        }
    }
}

/// Fixed part of an ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type (profile + 1)
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Header length (7, or 9 with CRC)
    pub header_len: usize,
    /// Frame length including the header
    pub frame_len: usize,
}

impl AdtsHeader {
    /// Parse an ADTS header; `None` if `data` does not start with one
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ADTS_HEADER_SIZE || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return None;
        }
        let protection_absent = data[1] & 0x01 == 1;
        let profile = (data[2] >> 6) & 0x03;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_len < header_len {
            return None;
        }
        Some(AdtsHeader {
            audio_object_type: profile + 1,
            sampling_frequency_index,
            channel_configuration,
            header_len,
            frame_len,
        })
    }

    /// AudioSpecificConfig equivalent to this header
    pub fn to_config(&self) -> Result<AudioSpecificConfig> {
        let rate = *SAMPLING_FREQUENCIES
            .get(self.sampling_frequency_index as usize)
            .ok_or(MediaError::InvalidAacPacket)?;
        AudioSpecificConfig::build(self.audio_object_type, rate, self.channel_configuration)
    }
}

/// Generate an ADTS header for a raw frame of `payload_len` bytes
pub fn adts_header(config: &AudioSpecificConfig, payload_len: usize) -> [u8; ADTS_HEADER_SIZE] {
    let frame_len = payload_len + ADTS_HEADER_SIZE;
    let profile = config.audio_object_type.saturating_sub(1) & 0x03;
    let freq = config.sampling_frequency_index & 0x0F;
    let ch = config.channel_configuration & 0x07;
    [
        0xFF,
        0xF1,
        (profile << 6) | (freq << 2) | (ch >> 2),
        ((ch & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03),
        (frame_len >> 3) as u8,
        (((frame_len & 0x07) as u8) << 5) | 0x1F,
        0xFC,
    ]
}
