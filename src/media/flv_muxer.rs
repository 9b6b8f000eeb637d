//! FLV serialization of a live source
//!
//! Output order:
//!
//! ```text
//! FLV header (flags from the source's tracks) | PreviousTagSize0
//! onMetaData script tag          timestamp 0
//! cached config tags             timestamp 0
//! live tags                      rebased so the first media tag is 0
//! ```

use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;

use super::flv::{write_file_header, FlvTag, FlvTagType};
use super::source::{MediaSource, ReaderItem, SourceReader};
use crate::amf::{Amf0Encoder, AmfValue};
use crate::error::Result;
use crate::protocol::constants::CMD_ON_META_DATA;
use crate::protocol::RtmpPacket;

/// Streams one source as FLV bytes
#[derive(Debug)]
pub struct FlvMuxer {
    reader: SourceReader,
    has_audio: bool,
    has_video: bool,
    header_sent: bool,
    /// Timestamp of the first media tag
    base: Option<u32>,
    tags: u64,
}

impl FlvMuxer {
    /// Attach to `source`.
    ///
    /// Header flags come from the tracks the source knows about at this
    /// point, so start after the config frames have been written.
    pub fn new(source: &Arc<MediaSource>) -> Self {
        let has_audio = source.have_audio();
        let has_video = source.have_video();
        let reader = source.attach();
        tracing::debug!(stream = %source.key(), has_audio, has_video, "flv muxer attached");
        Self {
            reader,
            has_audio,
            has_video,
            header_sent: false,
            base: None,
            tags: 0,
        }
    }

    /// Tags written so far (the header excluded)
    pub fn tag_count(&self) -> u64 {
        self.tags
    }

    /// Next block of output; `None` once the source is closed
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        let item = self.reader.recv().await?;
        Some(self.encode(item))
    }

    /// Next block of output if a packet is already queued
    pub fn try_next_chunk(&mut self) -> Option<Bytes> {
        let item = self.reader.try_recv()?;
        Some(self.encode(item))
    }

    /// Copy the stream into `writer` until the source closes.
    ///
    /// Returns the number of bytes written.
    pub async fn write_to<W: AsyncWrite + Unpin>(mut self, writer: &mut W) -> Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = self.next_chunk().await {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        tracing::debug!(tags = self.tags, bytes = written, "flv stream finished");
        Ok(written)
    }

    fn encode(&mut self, item: ReaderItem) -> Bytes {
        let mut out = BytesMut::new();
        if !self.header_sent {
            self.header_sent = true;
            write_file_header(&mut out, self.has_audio, self.has_video);
        }
        match item {
            ReaderItem::Metadata(meta) => self.metadata_tag(&meta).write_to(&mut out),
            ReaderItem::Packet(pkt) => {
                if let Some(tag) = self.packet_tag(&pkt) {
                    tag.write_to(&mut out);
                }
            }
        }
        out.freeze()
    }

    fn metadata_tag(&mut self, meta: &AmfValue) -> FlvTag {
        self.tags += 1;
        let body = Amf0Encoder::new()
            .string(CMD_ON_META_DATA)
            .encode(meta)
            .finish();
        FlvTag::new(FlvTagType::Script, 0, body)
    }

    fn packet_tag(&mut self, pkt: &RtmpPacket) -> Option<FlvTag> {
        let tag_type = FlvTagType::from_message_type(pkt.type_id)?;
        let timestamp = if pkt.is_config_frame() {
            self.base.map_or(0, |base| pkt.timestamp.saturating_sub(base))
        } else {
            let base = *self.base.get_or_insert(pkt.timestamp);
            // audio may trail the first video tag slightly
            pkt.timestamp.saturating_sub(base)
        };
        self.tags += 1;
        Some(FlvTag::new(tag_type, timestamp, pkt.body.clone()))
    }
}

/// Records a source to an FLV file on a background task
#[derive(Debug)]
pub struct FlvRecorder {
    task: Option<JoinHandle<Result<u64>>>,
}

impl FlvRecorder {
    /// Create `path` and start writing `source` into it
    pub async fn start(source: &Arc<MediaSource>, path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::File::create(path.as_ref()).await?;
        tracing::info!(stream = %source.key(), path = %path.as_ref().display(), "flv recording started");
        let muxer = FlvMuxer::new(source);
        let task = tokio::spawn(async move {
            let mut writer = BufWriter::with_capacity(64 * 1024, file);
            muxer.write_to(&mut writer).await
        });
        Ok(Self { task: Some(task) })
    }

    /// Wait for the source to close; returns the bytes written
    pub async fn finish(mut self) -> Result<u64> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| crate::Error::Io(std::io::Error::other(e)))?,
            None => Ok(0),
        }
    }

    /// Stop recording; buffered data not yet written is lost
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FlvRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;

    use super::*;
    use crate::amf::AmfDecoder;
    use crate::registry::{SourceConfig, StreamKey};

    fn source() -> Arc<MediaSource> {
        let source = MediaSource::new(StreamKey::new("live", "flv"), SourceConfig::default());
        source.set_metadata(AmfValue::object_from([("videocodecid", 7.0), ("audiocodecid", 10.0)]));
        source.write(
            RtmpPacket::video(1, 0, Bytes::from_static(&[0x17, 0, 0, 0, 0, 1, 0x64])),
            false,
        );
        source.write(RtmpPacket::audio(1, 0, Bytes::from_static(&[0xAF, 0, 0x12, 0x10])), false);
        source
    }

    /// (type, timestamp, body) of every tag after the header
    fn parse_tags(mut data: Bytes) -> (u8, Vec<(u8, u32, Bytes)>) {
        assert_eq!(&data[..3], b"FLV");
        let flags = data[4];
        data.advance(9);
        assert_eq!(data.get_u32(), 0);
        let mut tags = Vec::new();
        while data.has_remaining() {
            let kind = data.get_u8();
            let size = ((data.get_u16() as u32) << 8) | data.get_u8() as u32;
            let low = ((data.get_u16() as u32) << 8) | data.get_u8() as u32;
            let ts = low | ((data.get_u8() as u32) << 24);
            data.advance(3);
            let body = data.split_to(size as usize);
            assert_eq!(data.get_u32(), size + 11);
            tags.push((kind, ts, body));
        }
        (flags, tags)
    }

    #[tokio::test]
    async fn test_output_order_and_rebase() {
        let source = source();
        let mut muxer = FlvMuxer::new(&source);

        source.write_packet(RtmpPacket::video(1, 5000, Bytes::from_static(&[0x17, 1, 0, 0, 0, 9])));
        source.write_packet(RtmpPacket::audio(1, 5010, Bytes::from_static(&[0xAF, 1, 7])));
        source.write_packet(RtmpPacket::video(1, 5040, Bytes::from_static(&[0x27, 1, 0, 0, 0, 8])));
        source.close();

        let mut out = BytesMut::new();
        while let Some(chunk) = muxer.next_chunk().await {
            out.extend_from_slice(&chunk);
        }
        assert_eq!(muxer.tag_count(), 6);

        let (flags, tags) = parse_tags(out.freeze());
        assert_eq!(flags, 0x05);
        let kinds: Vec<u8> = tags.iter().map(|t| t.0).collect();
        assert_eq!(kinds, vec![18, 8, 9, 9, 8, 9]);

        let mut script = AmfDecoder::new(tags[0].2.clone());
        assert_eq!(script.read_string().unwrap(), "onMetaData");
        let meta = script.read_value().unwrap();
        assert_eq!(meta.get_number("videocodecid"), Some(7.0));

        let stamps: Vec<u32> = tags.iter().map(|t| t.1).collect();
        assert_eq!(stamps, vec![0, 0, 0, 0, 10, 40]);
    }

    #[tokio::test]
    async fn test_gop_replayed_for_late_muxer() {
        let source = source();
        source.write_packet(RtmpPacket::video(1, 100, Bytes::from_static(&[0x17, 1, 0, 0, 0, 1])));
        source.write_packet(RtmpPacket::video(1, 140, Bytes::from_static(&[0x27, 1, 0, 0, 0, 2])));

        let mut muxer = FlvMuxer::new(&source);
        let mut out = BytesMut::new();
        while let Some(chunk) = muxer.try_next_chunk() {
            out.extend_from_slice(&chunk);
        }
        let (_, tags) = parse_tags(out.freeze());
        assert_eq!(tags.len(), 5);
        assert_eq!(tags[3].1, 0);
        assert_eq!(tags[4].1, 40);
    }

    #[tokio::test]
    async fn test_audio_only_flags() {
        let source = MediaSource::new(StreamKey::new("live", "a"), SourceConfig::default());
        source.write_packet(RtmpPacket::audio(1, 0, Bytes::from_static(&[0x72, 1, 2])));
        let mut muxer = FlvMuxer::new(&source);
        let chunk = muxer.try_next_chunk().unwrap();
        assert_eq!(chunk[4], 0x04);
    }

    #[tokio::test]
    async fn test_write_to_ends_with_source() {
        let source = source();
        let muxer = FlvMuxer::new(&source);
        source.close();

        let mut sink = Vec::new();
        let written = muxer.write_to(&mut sink).await.unwrap();
        assert_eq!(written as usize, sink.len());
        // header plus metadata and two config tags
        let (_, tags) = parse_tags(Bytes::from(sink));
        assert_eq!(tags.len(), 3);
    }

    #[tokio::test]
    async fn test_recorder_writes_file() {
        let source = source();
        let path = std::env::temp_dir().join(format!("rtmp-live-{}.flv", std::process::id()));
        let recorder = FlvRecorder::start(&source, &path).await.unwrap();
        source.write_packet(RtmpPacket::video(1, 0, Bytes::from_static(&[0x17, 1, 0, 0, 0, 1])));
        source.close();

        let written = recorder.finish().await.unwrap();
        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(data.len() as u64, written);
        assert_eq!(&data[..3], b"FLV");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
