//! Live media source
//!
//! A [`MediaSource`] is the meeting point between one writer (a player
//! relaying a remote stream, a muxer fed by an encoder) and any number of
//! readers (pushers, FLV sinks, sessions). It keeps three things a late
//! joiner needs to start decoding at once:
//!
//! ```text
//!  metadata        single onMetaData object, last write wins
//!  config frames   one per message type (AVC/HEVC sequence header, AAC config)
//!  GOP cache       packets since the oldest retained key frame
//! ```
//!
//! Attach takes a snapshot of all three and registers the reader under the
//! same lock the writer uses, so the reader sees the cached history followed
//! by every later write, with no gap and no duplicate.
//!
//! Each reader owns an unbounded channel. A slow or dropped reader never
//! blocks the writer or the other readers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::gop::GopCache;
use crate::amf::AmfValue;
use crate::codec::TrackType;
use crate::protocol::constants::SERVER_NAME;
use crate::protocol::packet::RtmpPacket;
use crate::registry::{SourceConfig, StreamKey};

/// Item delivered to a reader
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderItem {
    /// Stream metadata, sent once on attach when the source has any
    Metadata(AmfValue),
    /// A config frame or media/data packet
    Packet(RtmpPacket),
}

/// Callback fired when the last reader detaches
pub type NoReaderCallback = Arc<dyn Fn(&MediaSource) + Send + Sync>;

struct SourceState {
    metadata: Option<AmfValue>,
    /// Keyed by message type id, so attach order is audio then video
    config_frames: BTreeMap<u8, RtmpPacket>,
    gop: GopCache<RtmpPacket>,
    readers: HashMap<u64, mpsc::UnboundedSender<ReaderItem>>,
    /// Last written timestamp per track, indexed by [`track_index`]
    track_stamps: [u32; 2],
    track_bytes: [u64; 2],
    have_video: bool,
    have_audio: bool,
    closed: bool,
}

/// Cached, multi-reader live stream
pub struct MediaSource {
    key: StreamKey,
    config: SourceConfig,
    state: Mutex<SourceState>,
    on_no_reader: Mutex<Option<NoReaderCallback>>,
    next_reader_id: AtomicU64,
    total_bytes: AtomicU64,
}

impl MediaSource {
    pub fn new(key: StreamKey, config: SourceConfig) -> Arc<Self> {
        let gop = GopCache::new(config.max_groups)
            .with_max_bytes(config.max_bytes)
            .with_enabled(config.gop_cache);
        Arc::new(Self {
            key,
            config,
            state: Mutex::new(SourceState {
                metadata: None,
                config_frames: BTreeMap::new(),
                gop,
                readers: HashMap::new(),
                track_stamps: [0; 2],
                track_bytes: [0; 2],
                have_video: false,
                have_audio: false,
                closed: false,
            }),
            on_no_reader: Mutex::new(None),
            next_reader_id: AtomicU64::new(1),
            total_bytes: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Replace the metadata object.
    ///
    /// Adds a `server` field and derives track presence from
    /// `videocodecid`/`audiocodecid`.
    pub fn set_metadata(&self, metadata: AmfValue) {
        let mut metadata = match metadata {
            AmfValue::Object(_) | AmfValue::EcmaArray(_) => metadata,
            _ => AmfValue::object(),
        };
        metadata.set("server", SERVER_NAME);

        let mut state = self.state.lock();
        state.have_video = metadata.get("videocodecid").is_some_and(AmfValue::is_truthy);
        state.have_audio = metadata.get("audiocodecid").is_some_and(AmfValue::is_truthy);
        tracing::debug!(
            stream = %self.key,
            video = state.have_video,
            audio = state.have_audio,
            "metadata set"
        );
        state.metadata = Some(metadata);
    }

    /// Replace the metadata object verbatim, keeping track flags
    pub fn update_metadata(&self, metadata: AmfValue) {
        self.state.lock().metadata = Some(metadata);
    }

    pub fn metadata(&self) -> Option<AmfValue> {
        self.state.lock().metadata.clone()
    }

    /// Cached config frames, one per message type
    pub fn config_frames(&self) -> Vec<RtmpPacket> {
        self.state.lock().config_frames.values().cloned().collect()
    }

    pub fn have_video(&self) -> bool {
        self.state.lock().have_video
    }

    pub fn have_audio(&self) -> bool {
        self.state.lock().have_audio
    }

    /// Write with the boundary derived from the packet: every video key
    /// frame, and every audio packet while the source has no video.
    pub fn write_packet(&self, pkt: RtmpPacket) {
        let boundary = {
            let state = self.state.lock();
            pkt.is_video_key_frame() || (pkt.is_audio() && !state.have_video)
        };
        self.write(pkt, boundary);
    }

    /// Append a packet and deliver it to every attached reader.
    ///
    /// `boundary` closes the current cache group. It opens a new rewind
    /// point when the packet is a video key frame, or always on a source
    /// without video.
    pub fn write(&self, pkt: RtmpPacket, boundary: bool) {
        let size = pkt.size();
        self.total_bytes.fetch_add(size as u64, Ordering::Relaxed);

        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        if let Some(track) = TrackType::from_message_type(pkt.type_id) {
            let idx = track_index(track);
            state.track_stamps[idx] = pkt.timestamp;
            state.track_bytes[idx] += size as u64;
            match track {
                TrackType::Video => state.have_video = true,
                TrackType::Audio => state.have_audio = true,
            }
        }

        let is_config = pkt.is_config_frame();
        if is_config {
            state.config_frames.insert(pkt.type_id, pkt.clone());
        }

        state.readers.retain(|_, tx| tx.send(ReaderItem::Packet(pkt.clone())).is_ok());

        if !is_config {
            let key = boundary && (pkt.is_video_key_frame() || !state.have_video);
            state.gop.push(pkt, size, boundary, key);
        }
    }

    /// Last write timestamp of `track`, or the smallest non-zero stamp
    /// across tracks for `None` (0 when nothing was written)
    pub fn timestamp(&self, track: Option<TrackType>) -> u32 {
        let state = self.state.lock();
        match track {
            Some(track) => state.track_stamps[track_index(track)],
            None => state
                .track_stamps
                .iter()
                .copied()
                .filter(|&s| s > 0)
                .min()
                .unwrap_or(0),
        }
    }

    /// Attach a reader.
    ///
    /// The reader first receives the metadata, then each config frame, then
    /// the cached GOP history, then every later write. Attaching to a closed
    /// source yields a reader that is already at its end.
    pub fn attach(self: &Arc<Self>) -> SourceReader {
        let id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock();
        if !state.closed {
            if let Some(meta) = &state.metadata {
                let _ = tx.send(ReaderItem::Metadata(meta.clone()));
            }
            for pkt in state.config_frames.values() {
                let _ = tx.send(ReaderItem::Packet(pkt.clone()));
            }
            state.gop.for_each(|pkt| {
                let _ = tx.send(ReaderItem::Packet(pkt.clone()));
            });
            state.readers.insert(id, tx);
            tracing::debug!(
                stream = %self.key,
                reader = id,
                readers = state.readers.len(),
                cached = state.gop.len(),
                "reader attached"
            );
        }
        drop(state);

        SourceReader {
            id,
            rx,
            source: Arc::downgrade(self),
        }
    }

    fn detach(&self, id: u64) {
        let now_idle = {
            let mut state = self.state.lock();
            state.readers.remove(&id).is_some() && state.readers.is_empty()
        };
        tracing::debug!(stream = %self.key, reader = id, "reader detached");

        if now_idle {
            let callback = self.on_no_reader.lock().clone();
            if let Some(callback) = callback {
                callback(self);
            }
        }
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Register the callback fired when the last reader detaches
    pub fn on_no_reader(&self, callback: impl Fn(&MediaSource) + Send + Sync + 'static) {
        *self.on_no_reader.lock() = Some(Arc::new(callback));
    }

    /// End the stream: detach every reader (their `recv` returns `None`)
    /// and ignore later writes
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let readers = state.readers.len();
        state.readers.clear();
        state.gop.clear();
        tracing::info!(stream = %self.key, readers, "source closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop the GOP history, keeping metadata and config frames
    pub fn clear_cache(&self) {
        self.state.lock().gop.clear();
    }

    /// Packets currently in the GOP cache
    pub fn cached_packets(&self) -> usize {
        self.state.lock().gop.len()
    }

    /// Bytes written since creation
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn track_bytes(&self, track: TrackType) -> u64 {
        self.state.lock().track_bytes[track_index(track)]
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("key", &self.key)
            .field("readers", &self.reader_count())
            .finish()
    }
}

fn track_index(track: TrackType) -> usize {
    match track {
        TrackType::Video => 0,
        TrackType::Audio => 1,
    }
}

/// Handle of one attached reader; dropping it detaches
#[derive(Debug)]
pub struct SourceReader {
    id: u64,
    rx: mpsc::UnboundedReceiver<ReaderItem>,
    source: Weak<MediaSource>,
}

impl SourceReader {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next item; `None` once the source is closed or dropped
    pub async fn recv(&mut self) -> Option<ReaderItem> {
        self.rx.recv().await
    }

    /// Next item if one is already queued
    pub fn try_recv(&mut self) -> Option<ReaderItem> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SourceReader {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::Bytes;

    use super::*;
    use crate::amf::AmfValue;

    fn source() -> Arc<MediaSource> {
        MediaSource::new(StreamKey::new("live", "test"), SourceConfig::default())
    }

    fn key_frame(ts: u32) -> RtmpPacket {
        RtmpPacket::video(1, ts, Bytes::from(vec![0x17, 0x01, 0, 0, 0, ts as u8]))
    }

    fn inter_frame(ts: u32) -> RtmpPacket {
        RtmpPacket::video(1, ts, Bytes::from(vec![0x27, 0x01, 0, 0, 0, ts as u8]))
    }

    fn video_config() -> RtmpPacket {
        RtmpPacket::video(1, 0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0, 1, 0x64]))
    }

    fn audio_config() -> RtmpPacket {
        RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]))
    }

    fn audio(ts: u32) -> RtmpPacket {
        RtmpPacket::audio(1, ts, Bytes::from(vec![0xAF, 0x01, ts as u8]))
    }

    fn drain(reader: &mut SourceReader) -> Vec<ReaderItem> {
        let mut out = Vec::new();
        while let Some(item) = reader.try_recv() {
            out.push(item);
        }
        out
    }

    fn packets(items: &[ReaderItem]) -> Vec<RtmpPacket> {
        items
            .iter()
            .filter_map(|i| match i {
                ReaderItem::Packet(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attach_replays_metadata_configs_then_gop() {
        let src = source();
        src.set_metadata(AmfValue::object_from([("videocodecid", 7.0), ("audiocodecid", 10.0)]));
        src.write(video_config(), false);
        src.write(audio_config(), false);
        for g in 0..3u32 {
            src.write(key_frame(g * 100), true);
            src.write(audio(g * 100 + 10), false);
            src.write(inter_frame(g * 100 + 40), false);
        }

        let mut reader = src.attach();
        let items = drain(&mut reader);

        let ReaderItem::Metadata(meta) = &items[0] else {
            panic!("metadata first");
        };
        assert_eq!(meta.get_string("server"), Some(SERVER_NAME));

        let pkts = packets(&items[1..]);
        assert_eq!(pkts.len(), 2 + 9);
        assert_eq!(pkts[0], audio_config());
        assert_eq!(pkts[1], video_config());
        assert!(pkts[2].is_video_key_frame());
        assert_eq!(pkts[2].timestamp, 0);
        assert!(pkts[2..].iter().all(|p| !p.is_config_frame()));

        // live writes follow with no gap or duplicate
        src.write(key_frame(300), true);
        let live = packets(&drain(&mut reader));
        assert_eq!(live, vec![key_frame(300)]);
    }

    #[test]
    fn test_attach_sees_each_write_exactly_once() {
        let src = source();
        src.write(video_config(), false);
        let mut early = src.attach();

        let mut late = None;
        for ts in 0..50u32 {
            let pkt = if ts % 10 == 0 { key_frame(ts) } else { inter_frame(ts) };
            src.write(pkt, ts % 10 == 0);
            if ts == 23 {
                late = Some(src.attach());
            }
        }

        let early_pkts = packets(&drain(&mut early));
        let stamps: Vec<u32> = early_pkts.iter().skip(1).map(|p| p.timestamp).collect();
        assert_eq!(stamps, (0..50).collect::<Vec<_>>());

        let mut late = late.unwrap();
        let late_pkts = packets(&drain(&mut late));
        assert!(late_pkts[0].is_config_frame());
        let stamps: Vec<u32> = late_pkts.iter().skip(1).map(|p| p.timestamp).collect();
        assert_eq!(stamps, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_group_cap_hides_evicted_group() {
        let config = SourceConfig::default().max_groups(500);
        let src = MediaSource::new(StreamKey::new("live", "cap"), config);
        for g in 0..501u32 {
            src.write(key_frame(g * 40), true);
            src.write(inter_frame(g * 40 + 20), false);
        }

        let mut reader = src.attach();
        let pkts = packets(&drain(&mut reader));
        assert_eq!(pkts.len(), 500 * 2);
        assert_eq!(pkts[0].timestamp, 40);
        assert!(pkts.iter().all(|p| p.timestamp >= 40));
    }

    #[test]
    fn test_packets_before_first_key_frame_are_live_only() {
        let src = source();
        let mut live = src.attach();
        src.write(inter_frame(0), false);
        src.write(inter_frame(40), false);
        assert_eq!(packets(&drain(&mut live)).len(), 2);
        assert_eq!(src.cached_packets(), 0);

        src.write(key_frame(80), true);
        assert_eq!(src.cached_packets(), 1);
    }

    #[test]
    fn test_audio_only_boundaries_are_rewind_points() {
        let config = SourceConfig::default().max_groups(3);
        let src = MediaSource::new(StreamKey::new("live", "radio"), config);
        for ts in 0..10u32 {
            src.write_packet(audio(ts * 23));
        }
        assert_eq!(src.cached_packets(), 3);
        assert!(!src.have_video());
        assert!(src.have_audio());
    }

    #[test]
    fn test_config_replacement_affects_future_attaches_only() {
        let src = source();
        src.write(audio_config(), false);
        let mut first = src.attach();

        let new_config = RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 0x00, 0x11, 0x90]));
        src.write(new_config.clone(), false);

        let first_pkts = packets(&drain(&mut first));
        assert_eq!(first_pkts, vec![audio_config(), new_config.clone()]);

        let mut second = src.attach();
        assert_eq!(packets(&drain(&mut second)), vec![new_config]);
    }

    #[test]
    fn test_timestamps_per_track() {
        let src = source();
        assert_eq!(src.timestamp(None), 0);
        src.write(key_frame(500), true);
        assert_eq!(src.timestamp(None), 500);
        src.write(audio(480), false);
        assert_eq!(src.timestamp(Some(TrackType::Video)), 500);
        assert_eq!(src.timestamp(Some(TrackType::Audio)), 480);
        assert_eq!(src.timestamp(None), 480);
        // discontinuities pass through untouched
        src.write(inter_frame(10), false);
        assert_eq!(src.timestamp(Some(TrackType::Video)), 10);
    }

    #[test]
    fn test_metadata_track_flags() {
        let src = source();
        src.set_metadata(AmfValue::object_from([("audiocodecid", 10.0), ("videocodecid", 0.0)]));
        assert!(src.have_audio());
        assert!(!src.have_video());

        src.set_metadata(AmfValue::Null);
        let meta = src.metadata().unwrap();
        assert_eq!(meta.get_string("server"), Some(SERVER_NAME));
    }

    #[test]
    fn test_no_reader_callback_fires_on_last_detach() {
        let src = source();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        src.on_no_reader(move |s| {
            assert_eq!(s.reader_count(), 0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let a = src.attach();
        let b = src.attach();
        assert_eq!(src.reader_count(), 2);
        drop(a);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // writer is unaffected
        src.write(key_frame(0), true);
        assert_eq!(src.cached_packets(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_readers() {
        let src = source();
        let mut reader = src.attach();
        src.write(key_frame(0), true);
        src.close();

        assert!(matches!(reader.recv().await, Some(ReaderItem::Packet(_))));
        assert!(reader.recv().await.is_none());
        assert_eq!(src.reader_count(), 0);

        let mut after = src.attach();
        assert!(after.recv().await.is_none());
    }

    #[test]
    fn test_dropped_source_detach_is_noop() {
        let src = source();
        let reader = src.attach();
        drop(src);
        drop(reader);
    }

    #[test]
    fn test_byte_counters() {
        let src = source();
        src.write(key_frame(0), true);
        src.write(audio(0), false);
        assert_eq!(src.total_bytes(), 9);
        assert_eq!(src.track_bytes(TrackType::Video), 6);
        assert_eq!(src.track_bytes(TrackType::Audio), 3);
    }
}
