//! RTMP messages to frames
//!
//! Tracks come from `onMetaData` when it names codecs; otherwise each track
//! is created from the flags byte of the first message of its type. A
//! track type is only tried once either way.
//!
//! Without metadata the track set is unknown: readiness waits for both an
//! audio and a video track, or for a single track to have been alone for
//! [`DEFAULT_ADD_TRACK_WAIT_MS`] of stream time.

use std::sync::Arc;

use super::frame::{CodecId, Frame, Track, TrackType};
use super::registry::{CodecRegistry, RtmpCodec};
use crate::amf::AmfValue;
use crate::error::Result;
use crate::protocol::RtmpPacket;

type ReadyCallback = Box<dyn FnOnce(&[Track]) + Send>;

/// Stream time a lone track waits for a second one when metadata named none
pub const DEFAULT_ADD_TRACK_WAIT_MS: u32 = 3000;

pub struct RtmpDemuxer {
    registry: Arc<CodecRegistry>,
    video: Option<Box<dyn RtmpCodec>>,
    audio: Option<Box<dyn RtmpCodec>>,
    tried_video: bool,
    tried_audio: bool,
    /// Track set fixed by metadata
    tracks_completed: bool,
    duration: f64,
    /// Timestamp of the first packet that created a track
    first_track_stamp: Option<u32>,
    add_track_wait_ms: u32,
    ready: bool,
    on_ready: Option<ReadyCallback>,
}

impl RtmpDemuxer {
    pub fn new(registry: Arc<CodecRegistry>) -> Self {
        Self {
            registry,
            video: None,
            audio: None,
            tried_video: false,
            tried_audio: false,
            tracks_completed: false,
            duration: 0.0,
            first_track_stamp: None,
            add_track_wait_ms: DEFAULT_ADD_TRACK_WAIT_MS,
            ready: false,
            on_ready: None,
        }
    }

    /// How long a single packet-created track waits for a second one
    pub fn with_add_track_wait(mut self, wait_ms: u32) -> Self {
        self.add_track_wait_ms = wait_ms;
        self
    }

    /// Create tracks from `onMetaData`.
    ///
    /// Returns `true` when the metadata named at least one codec; the track
    /// set is then considered complete.
    pub fn load_metadata(&mut self, metadata: &AmfValue) -> bool {
        if let Some(duration) = metadata.get_number("duration") {
            self.duration = duration;
        }
        let number = |key: &str| metadata.get_number(key).unwrap_or(0.0) as u32;
        let channels = match metadata.get("stereo") {
            Some(v) if v.is_truthy() => 2,
            Some(_) => 1,
            None => 0,
        };

        let mut named = false;
        if let Some(id) = metadata.get("videocodecid") {
            named = true;
            if let Some(codec) = codec_from_amf(TrackType::Video, id) {
                let mut track = Track::new(codec);
                track.bit_rate = number("videodatarate") * 1024;
                track.width = number("width");
                track.height = number("height");
                track.fps = metadata.get_number("framerate").unwrap_or(0.0);
                self.make_track(track);
            }
        }
        if let Some(id) = metadata.get("audiocodecid") {
            named = true;
            if let Some(codec) = codec_from_amf(TrackType::Audio, id) {
                let defaults = Track::new(codec);
                let mut track = Track::audio(
                    codec,
                    nonzero(number("audiosamplerate"), defaults.sample_rate),
                    nonzero(channels, defaults.channels),
                    nonzero(number("audiosamplesize"), defaults.sample_bits),
                );
                track.bit_rate = number("audiodatarate") * 1024;
                self.make_track(track);
            }
        }

        if named {
            self.tracks_completed = true;
            tracing::debug!(
                video = self.video.is_some(),
                audio = self.audio.is_some(),
                "tracks loaded from metadata"
            );
        }
        named
    }

    fn make_track(&mut self, track: Track) {
        let track_type = track.track_type();
        let codec = track.codec;
        match self.registry.create(track) {
            Ok(plugin) => match track_type {
                TrackType::Video => {
                    self.video = Some(plugin);
                    self.tried_video = true;
                }
                TrackType::Audio => {
                    self.audio = Some(plugin);
                    self.tried_audio = true;
                }
            },
            Err(e) => tracing::warn!(%codec, error = %e, "no rtmp codec for track"),
        }
    }

    /// Decode one message; non-media messages yield nothing
    pub fn input_packet(&mut self, pkt: &RtmpPacket) -> Result<Vec<Frame>> {
        let Some(track_type) = TrackType::from_message_type(pkt.type_id) else {
            return Ok(Vec::new());
        };
        if pkt.body.is_empty() {
            return Ok(Vec::new());
        }

        let tried = match track_type {
            TrackType::Video => &mut self.tried_video,
            TrackType::Audio => &mut self.tried_audio,
        };
        if !*tried {
            *tried = true;
            match self.registry.create_for_packet(pkt) {
                Ok(plugin) => {
                    tracing::debug!(codec = %plugin.codec(), "track created from first packet");
                    self.first_track_stamp.get_or_insert(pkt.timestamp);
                    match track_type {
                        TrackType::Video => self.video = Some(plugin),
                        TrackType::Audio => self.audio = Some(plugin),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "unsupported media track ignored"),
            }
        }

        let plugin = match track_type {
            TrackType::Video => self.video.as_mut(),
            TrackType::Audio => self.audio.as_mut(),
        };
        let Some(plugin) = plugin else {
            return Ok(Vec::new());
        };
        let frames = plugin.decode(pkt)?;
        self.check_ready(pkt.timestamp);
        Ok(frames)
    }

    fn check_ready(&mut self, timestamp: u32) {
        if self.ready || !self.is_ready() {
            return;
        }
        if !self.tracks_completed && !(self.tried_video && self.tried_audio) {
            let waited = self
                .first_track_stamp
                .map_or(0, |first| timestamp.wrapping_sub(first));
            if waited < self.add_track_wait_ms {
                return;
            }
            tracing::debug!(waited, "no second track, going ahead with one");
        }
        self.ready = true;
        if let Some(cb) = self.on_ready.take() {
            cb(&self.tracks());
        }
    }

    /// Every track created so far is configured
    pub fn is_ready(&self) -> bool {
        let plugins: Vec<&dyn RtmpCodec> =
            self.video.iter().chain(self.audio.iter()).map(|p| p.as_ref()).collect();
        if plugins.is_empty() {
            return false;
        }
        plugins.iter().all(|p| p.track().is_ready())
    }

    pub fn tracks_completed(&self) -> bool {
        self.tracks_completed
    }

    /// Called once when all expected tracks are ready
    pub fn on_ready(&mut self, callback: impl FnOnce(&[Track]) + Send + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    /// Duration in seconds from metadata (0 for live)
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .map(|p| p.track().clone())
            .collect()
    }

    pub fn track(&self, track_type: TrackType) -> Option<&Track> {
        match track_type {
            TrackType::Video => self.video.as_ref().map(|p| p.track()),
            TrackType::Audio => self.audio.as_ref().map(|p| p.track()),
        }
    }
}

fn nonzero(v: u32, default: u32) -> u32 {
    if v == 0 {
        default
    } else {
        v
    }
}

/// Codec id from a metadata value: FLV number or FourCC string
fn codec_from_amf(track_type: TrackType, value: &AmfValue) -> Option<CodecId> {
    if let Some(n) = value.as_number() {
        return CodecId::from_flv(track_type, n as u8);
    }
    let codec = CodecId::from_fourcc(value.as_str()?)?;
    (codec.track_type() == track_type).then_some(codec)
}

impl std::fmt::Debug for RtmpDemuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmpDemuxer")
            .field("tracks", &self.tracks())
            .field("duration", &self.duration)
            .field("tracks_completed", &self.tracks_completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::avc::AvcCodec;
    use crate::media::h264::{self, tests::sps_1080p};

    fn demuxer() -> RtmpDemuxer {
        RtmpDemuxer::new(Arc::new(CodecRegistry::with_defaults()))
    }

    fn avc_config_packet() -> RtmpPacket {
        let mut codec = AvcCodec::new(Track::new(CodecId::H264));
        let pps = Bytes::from_static(&[0x68, 0xEE, 0x3C, 0x80]);
        codec
            .encode(&Frame::new(CodecId::H264, 0, 0, h264::join_annexb([&sps_1080p(), &pps])))
            .unwrap();
        codec.config_packet().unwrap()
    }

    #[test]
    fn test_metadata_creates_tracks() {
        let mut demuxer = demuxer();
        let meta = AmfValue::object_from([
            ("duration", AmfValue::Number(12.5)),
            ("videocodecid", AmfValue::Number(7.0)),
            ("videodatarate", AmfValue::Number(2000.0)),
            ("audiocodecid", AmfValue::String("mp4a".into())),
            ("audiosamplerate", AmfValue::Number(48000.0)),
            ("stereo", AmfValue::Boolean(false)),
        ]);
        assert!(demuxer.load_metadata(&meta));
        assert!(demuxer.tracks_completed());
        assert_eq!(demuxer.duration(), 12.5);

        let video = demuxer.track(TrackType::Video).unwrap();
        assert_eq!(video.codec, CodecId::H264);
        assert_eq!(video.bit_rate, 2000 * 1024);
        let audio = demuxer.track(TrackType::Audio).unwrap();
        assert_eq!(audio.codec, CodecId::Aac);
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.channels, 1);
    }

    #[test]
    fn test_metadata_without_codecs() {
        let mut demuxer = demuxer();
        let meta = AmfValue::object_from([("duration", AmfValue::Number(0.0))]);
        assert!(!demuxer.load_metadata(&meta));
        assert!(!demuxer.tracks_completed());
        assert!(demuxer.tracks().is_empty());
    }

    fn aac_config_packet() -> RtmpPacket {
        RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 0, 0x12, 0x10]))
    }

    fn ready_counts(demuxer: &mut RtmpDemuxer) -> Arc<parking_lot::Mutex<Vec<usize>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        demuxer.on_ready(move |tracks| sink.lock().push(tracks.len()));
        seen
    }

    #[test]
    fn test_lazy_tracks_ready_once_both_configured() {
        let mut demuxer = demuxer();
        let seen = ready_counts(&mut demuxer);

        let frames = demuxer.input_packet(&avc_config_packet()).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].config);
        assert!(demuxer.is_ready());
        assert_eq!(demuxer.track(TrackType::Video).unwrap().width, 1920);
        // a second track may still show up
        assert!(seen.lock().is_empty());

        demuxer.input_packet(&aac_config_packet()).unwrap();
        assert_eq!(*seen.lock(), vec![2]);

        demuxer.input_packet(&avc_config_packet()).unwrap();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_single_track_ready_after_wait() {
        let mut demuxer = demuxer().with_add_track_wait(1000);
        let seen = ready_counts(&mut demuxer);

        demuxer.input_packet(&avc_config_packet()).unwrap();
        let mut early = avc_config_packet();
        early.timestamp = 999;
        demuxer.input_packet(&early).unwrap();
        assert!(seen.lock().is_empty());

        let mut late = avc_config_packet();
        late.timestamp = 1000;
        demuxer.input_packet(&late).unwrap();
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_metadata_track_set_ready_without_wait() {
        let mut demuxer = demuxer();
        let seen = ready_counts(&mut demuxer);
        let meta = AmfValue::object_from([("videocodecid", AmfValue::Number(7.0))]);
        assert!(demuxer.load_metadata(&meta));

        demuxer.input_packet(&avc_config_packet()).unwrap();
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_unsupported_track_tried_once() {
        let mut demuxer = demuxer();
        let vp6 = RtmpPacket::video(1, 0, Bytes::from_static(&[0x14, 0, 1, 2]));
        assert!(demuxer.input_packet(&vp6).unwrap().is_empty());
        assert!(demuxer.track(TrackType::Video).is_none());

        // a later H.264 packet does not create the track either
        assert!(demuxer.input_packet(&avc_config_packet()).unwrap().is_empty());
        assert!(demuxer.track(TrackType::Video).is_none());
    }

    #[test]
    fn test_non_media_ignored() {
        let mut demuxer = demuxer();
        let data = RtmpPacket::new(18, 5, 1, 0, Bytes::from_static(&[2, 0, 0]));
        assert!(demuxer.input_packet(&data).unwrap().is_empty());
        assert!(!demuxer.is_ready());
    }
}
