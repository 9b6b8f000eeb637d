//! Codec plugin table
//!
//! Each supported codec contributes one [`RtmpCodec`] implementation that
//! turns frames into RTMP messages and back. The muxer and demuxer look the
//! plugin up by codec through a [`CodecRegistry`] instead of matching on
//! codec ids themselves.

use std::collections::HashMap;

use super::aac::AacCodec;
use super::audio::SimpleAudioCodec;
use super::avc::AvcCodec;
use super::frame::{CodecId, Frame, Track, TrackType};
use super::hevc::HevcCodec;
use crate::error::{MediaError, Result};
use crate::protocol::RtmpPacket;

/// Frame <-> RTMP message conversion for one track
pub trait RtmpCodec: Send {
    fn track(&self) -> &Track;

    fn track_mut(&mut self) -> &mut Track;

    fn codec(&self) -> CodecId {
        self.track().codec
    }

    /// Sequence header for the current configuration, if complete
    fn config_packet(&self) -> Option<RtmpPacket>;

    /// Encode one frame.
    ///
    /// Configuration carried by the frame is absorbed into the track; `None`
    /// means the frame produced no media message.
    fn encode(&mut self, frame: &Frame) -> Result<Option<RtmpPacket>>;

    /// Decode one audio/video message into frames
    fn decode(&mut self, pkt: &RtmpPacket) -> Result<Vec<Frame>>;
}

/// Builds a codec plugin for a track
pub type CodecFactory = fn(Track) -> Box<dyn RtmpCodec>;

/// Registry of codec plugins
#[derive(Clone)]
pub struct CodecRegistry {
    factories: HashMap<CodecId, CodecFactory>,
}

impl CodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in codec
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CodecId::H264, |t| Box::new(AvcCodec::new(t)));
        registry.register(CodecId::H265, |t| Box::new(HevcCodec::new(t)));
        registry.register(CodecId::Aac, |t| Box::new(AacCodec::new(t)));
        registry.register(CodecId::G711A, |t| Box::new(SimpleAudioCodec::new(t)));
        registry.register(CodecId::G711U, |t| Box::new(SimpleAudioCodec::new(t)));
        registry.register(CodecId::Opus, |t| Box::new(SimpleAudioCodec::new(t)));
        registry
    }

    pub fn register(&mut self, codec: CodecId, factory: CodecFactory) {
        self.factories.insert(codec, factory);
    }

    pub fn supports(&self, codec: CodecId) -> bool {
        self.factories.contains_key(&codec)
    }

    /// Plugin for `track`
    pub fn create(&self, track: Track) -> Result<Box<dyn RtmpCodec>> {
        let factory = self
            .factories
            .get(&track.codec)
            .ok_or(MediaError::UnsupportedCodec(track.codec.flv_id()))?;
        Ok(factory(track))
    }

    /// Plugin for the codec signalled by a media message's flags byte
    pub fn create_for_packet(&self, pkt: &RtmpPacket) -> Result<Box<dyn RtmpCodec>> {
        let track_type = TrackType::from_message_type(pkt.type_id).ok_or(MediaError::EmptyPayload)?;
        let id = pkt.media_codec_id().ok_or(MediaError::EmptyPayload)?;
        let codec = CodecId::from_flv(track_type, id).ok_or(MediaError::UnsupportedCodec(id))?;

        let track = match track_type {
            TrackType::Video => Track::new(codec),
            TrackType::Audio => {
                // the flags byte cannot express 8k or 48k
                let rate = match codec {
                    CodecId::G711A | CodecId::G711U => 8000,
                    CodecId::Opus => 48000,
                    _ => pkt.audio_sample_rate().unwrap_or(44100),
                };
                Track::audio(
                    codec,
                    rate,
                    pkt.audio_channels().unwrap_or(2),
                    pkt.audio_sample_bits().unwrap_or(16),
                )
            }
        };
        self.create(track)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_defaults_cover_all_codecs() {
        let registry = CodecRegistry::with_defaults();
        for codec in [
            CodecId::H264,
            CodecId::H265,
            CodecId::Aac,
            CodecId::G711A,
            CodecId::G711U,
            CodecId::Opus,
        ] {
            assert!(registry.supports(codec));
            assert_eq!(registry.create(Track::new(codec)).unwrap().codec(), codec);
        }
    }

    #[test]
    fn test_empty_registry_rejects() {
        let registry = CodecRegistry::new();
        let err = registry.create(Track::new(CodecId::H264)).err().unwrap();
        assert!(matches!(
            err,
            crate::Error::Media(MediaError::UnsupportedCodec(7))
        ));
    }

    #[test]
    fn test_create_for_packet() {
        let registry = CodecRegistry::with_defaults();
        let video = RtmpPacket::video(1, 0, Bytes::from_static(&[0x1C, 1, 0, 0, 0]));
        assert_eq!(registry.create_for_packet(&video).unwrap().codec(), CodecId::H265);

        // G.711 A-law, 5.5k slot, 16 bit, mono
        let audio = RtmpPacket::audio(1, 0, Bytes::from_static(&[0x72, 0xD5]));
        let codec = registry.create_for_packet(&audio).unwrap();
        assert_eq!(codec.codec(), CodecId::G711A);
        assert_eq!(codec.track().channels, 1);

        // VP6 has no plugin
        let vp6 = RtmpPacket::video(1, 0, Bytes::from_static(&[0x14, 0]));
        assert!(registry.create_for_packet(&vp6).is_err());
        assert!(registry.create_for_packet(&RtmpPacket::video(1, 0, Bytes::new())).is_err());
    }
}
