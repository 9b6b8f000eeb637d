//! Frames to a live source
//!
//! The muxer owns one codec plugin per track. Media frames are held back
//! until their track is configured; the sequence header goes out before the
//! first media message of a track, and again whenever the configuration
//! changes mid-stream.

use std::sync::Arc;

use bytes::Bytes;

use super::frame::{Frame, Track, TrackType};
use super::registry::{CodecRegistry, RtmpCodec};
use crate::amf::AmfValue;
use crate::error::Result;
use crate::media::MediaSource;

struct MuxTrack {
    plugin: Box<dyn RtmpCodec>,
    /// Body of the last sequence header written
    sent_config: Option<Bytes>,
}

pub struct RtmpMuxer {
    source: Arc<MediaSource>,
    registry: Arc<CodecRegistry>,
    video: Option<MuxTrack>,
    audio: Option<MuxTrack>,
    dropped: u64,
}

impl RtmpMuxer {
    pub fn new(source: Arc<MediaSource>, registry: Arc<CodecRegistry>) -> Self {
        Self {
            source,
            registry,
            video: None,
            audio: None,
            dropped: 0,
        }
    }

    pub fn source(&self) -> &Arc<MediaSource> {
        &self.source
    }

    /// Add (or replace) the track of `track`'s type
    pub fn add_track(&mut self, track: Track) -> Result<()> {
        let track_type = track.track_type();
        let plugin = self.registry.create(track)?;
        tracing::debug!(codec = %plugin.codec(), "muxer track added");
        let slot = MuxTrack {
            plugin,
            sent_config: None,
        };
        match track_type {
            TrackType::Video => self.video = Some(slot),
            TrackType::Audio => self.audio = Some(slot),
        }
        Ok(())
    }

    /// All tracks are added: publish metadata describing them
    pub fn add_track_completed(&mut self) {
        self.source.set_metadata(self.metadata());
    }

    pub fn reset_tracks(&mut self) {
        self.video = None;
        self.audio = None;
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .map(|t| t.plugin.track().clone())
            .collect()
    }

    /// Frames discarded because their track was not yet configured
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Feed one frame.
    ///
    /// Returns `true` when a media message was written to the source.
    pub fn input_frame(&mut self, frame: &Frame) -> Result<bool> {
        let has_video = self.video.is_some();
        let slot = match frame.track_type() {
            TrackType::Video => self.video.as_mut(),
            TrackType::Audio => self.audio.as_mut(),
        };
        let Some(slot) = slot else {
            return Ok(false);
        };
        if slot.plugin.codec() != frame.codec {
            tracing::warn!(expected = %slot.plugin.codec(), got = %frame.codec, "frame codec mismatch");
            return Ok(false);
        }

        let encoded = slot.plugin.encode(frame)?;
        if !slot.plugin.track().is_ready() {
            if encoded.is_some() {
                self.dropped += 1;
            }
            return Ok(false);
        }

        if let Some(mut config) = slot.plugin.config_packet() {
            if slot.sent_config.as_ref() != Some(&config.body) {
                tracing::debug!(codec = %frame.codec, "sequence header updated");
                slot.sent_config = Some(config.body.clone());
                config.timestamp = frame.dts;
                config.ts_field = frame.dts;
                self.source.write(config, false);
            }
        }

        let Some(pkt) = encoded else {
            return Ok(false);
        };
        let boundary = match frame.track_type() {
            TrackType::Video => pkt.is_video_key_frame(),
            TrackType::Audio => !has_video,
        };
        self.source.write(pkt, boundary);
        Ok(true)
    }

    /// onMetaData describing the current tracks
    pub fn metadata(&self) -> AmfValue {
        let mut meta = AmfValue::object();
        meta.set("duration", 0.0);
        if let Some(video) = &self.video {
            let track = video.plugin.track();
            if track.width > 0 && track.height > 0 {
                meta.set("width", track.width);
                meta.set("height", track.height);
            }
            if track.fps > 0.0 {
                meta.set("framerate", track.fps);
            }
            if track.bit_rate > 0 {
                meta.set("videodatarate", (track.bit_rate / 1024) as f64);
            }
            meta.set("videocodecid", track.codec.flv_id() as f64);
        }
        if let Some(audio) = &self.audio {
            let track = audio.plugin.track();
            if track.bit_rate > 0 {
                meta.set("audiodatarate", (track.bit_rate / 1024) as f64);
            }
            meta.set("audiosamplerate", track.sample_rate);
            meta.set("audiosamplesize", track.sample_bits);
            meta.set("stereo", track.channels > 1);
            meta.set("audiocodecid", track.codec.flv_id() as f64);
        }
        meta
    }
}

impl std::fmt::Debug for RtmpMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmpMuxer")
            .field("source", &self.source.key())
            .field("tracks", &self.tracks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::media::h264::{self, tests::sps_1080p};
    use crate::media::ReaderItem;
    use crate::registry::{SourceConfig, StreamKey};

    fn setup() -> (Arc<MediaSource>, RtmpMuxer) {
        let source = MediaSource::new(StreamKey::new("live", "mux"), SourceConfig::default());
        let muxer = RtmpMuxer::new(Arc::clone(&source), Arc::new(CodecRegistry::with_defaults()));
        (source, muxer)
    }

    fn pps() -> Bytes {
        Bytes::from_static(&[0x68, 0xEE, 0x3C, 0x80])
    }

    fn idr(dts: u32) -> Frame {
        Frame::new(CodecId::H264, dts, dts, h264::join_annexb([&Bytes::from_static(&[0x65, 0x88])])).key(true)
    }

    fn packets(reader: &mut crate::media::SourceReader) -> Vec<crate::protocol::RtmpPacket> {
        let mut out = Vec::new();
        while let Some(item) = reader.try_recv() {
            if let ReaderItem::Packet(pkt) = item {
                out.push(pkt);
            }
        }
        out
    }

    #[test]
    fn test_media_held_until_configured() {
        let (source, mut muxer) = setup();
        muxer.add_track(Track::new(CodecId::H264)).unwrap();
        let mut reader = source.attach();

        assert!(!muxer.input_frame(&idr(0)).unwrap());
        assert_eq!(muxer.dropped_frames(), 1);
        assert!(packets(&mut reader).is_empty());

        let params = Frame::new(CodecId::H264, 40, 40, h264::join_annexb([&sps_1080p(), &pps()])).config(true);
        muxer.input_frame(&params).unwrap();
        assert!(muxer.input_frame(&idr(80)).unwrap());

        let written = packets(&mut reader);
        assert_eq!(written.len(), 2);
        assert!(written[0].is_config_frame());
        assert!(written[1].is_video_key_frame());
        assert_eq!(written[1].timestamp, 80);
        assert_eq!(source.config_frames().len(), 1);
    }

    #[test]
    fn test_in_band_parameter_sets_sent_once() {
        let (source, mut muxer) = setup();
        muxer.add_track(Track::new(CodecId::H264)).unwrap();
        let mut reader = source.attach();

        let slice = Bytes::from_static(&[0x65, 0x88]);
        let au = h264::join_annexb([&sps_1080p(), &pps(), &slice]);
        for dts in [0, 40] {
            muxer.input_frame(&Frame::new(CodecId::H264, dts, dts, au.clone())).unwrap();
        }
        let written = packets(&mut reader);
        assert_eq!(written.iter().filter(|p| p.is_config_frame()).count(), 1);
        assert_eq!(written.len(), 3);
    }

    #[test]
    fn test_metadata_and_audio_only_boundaries() {
        let (source, mut muxer) = setup();
        muxer.add_track(Track::audio(CodecId::G711A, 8000, 1, 16)).unwrap();
        muxer.add_track_completed();

        let meta = source.metadata().unwrap();
        assert_eq!(meta.get_number("audiocodecid"), Some(7.0));
        assert_eq!(meta.get("stereo"), Some(&AmfValue::Boolean(false)));
        assert!(meta.get("videocodecid").is_none());
        assert!(source.have_audio());
        assert!(!source.have_video());

        for dts in [0, 20, 40] {
            let frame = Frame::new(CodecId::G711A, dts, dts, Bytes::from_static(&[0xD5; 160]));
            assert!(muxer.input_frame(&frame).unwrap());
        }
        // every audio packet is a rewind point without video
        assert_eq!(source.cached_packets(), 3);
    }

    #[test]
    fn test_frames_without_track_ignored() {
        let (_source, mut muxer) = setup();
        assert!(!muxer.input_frame(&idr(0)).unwrap());
        muxer.add_track(Track::new(CodecId::H265)).unwrap();
        assert!(!muxer.input_frame(&idr(0)).unwrap());
        assert_eq!(muxer.tracks().len(), 1);
        muxer.reset_tracks();
        assert!(muxer.tracks().is_empty());
    }
}
