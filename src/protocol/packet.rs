//! RTMP message value
//!
//! An [`RtmpPacket`] is one reassembled (or synthesized) RTMP message. The
//! payload is a [`Bytes`] handle, so cloning a packet to fan it out to many
//! readers shares one allocation; the last owner frees it.
//!
//! Codec flags are derived from the leading payload bytes:
//!
//! ```text
//! video byte0: [frame type:4][codec id:4]   byte1: 0 = config, 1 = media
//! audio byte0: [format:4][rate:2][bits:1][channels:1]   byte1 (AAC): 0 = config
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::constants::*;
use crate::media::flv::{AudioFormat, VideoFrameType};

/// One RTMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpPacket {
    /// Message type id (`MSG_*`)
    pub type_id: u8,
    /// Declared body length
    pub body_size: u32,
    /// Absolute timestamp in milliseconds (wraps at 2^32)
    pub timestamp: u32,
    /// Raw 24-bit/extended header field as last seen on the wire
    pub ts_field: u32,
    /// Message stream id
    pub stream_id: u32,
    /// Chunk stream id it arrived on / will leave on
    pub chunk_id: u32,
    /// Whether the header that started this message carried an absolute stamp
    pub is_abs_stamp: bool,
    /// Message body
    pub body: Bytes,
}

impl RtmpPacket {
    /// Build a packet with an explicit chunk id
    pub fn new(type_id: u8, chunk_id: u32, stream_id: u32, timestamp: u32, body: Bytes) -> Self {
        Self {
            type_id,
            body_size: body.len() as u32,
            timestamp,
            ts_field: timestamp,
            stream_id,
            chunk_id,
            is_abs_stamp: true,
            body,
        }
    }

    /// Video message on the video chunk stream
    pub fn video(stream_id: u32, timestamp: u32, body: Bytes) -> Self {
        Self::new(MSG_VIDEO, CHUNK_VIDEO, stream_id, timestamp, body)
    }

    /// Audio message on the audio chunk stream
    pub fn audio(stream_id: u32, timestamp: u32, body: Bytes) -> Self {
        Self::new(MSG_AUDIO, CHUNK_AUDIO, stream_id, timestamp, body)
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn is_video(&self) -> bool {
        self.type_id == MSG_VIDEO
    }

    pub fn is_audio(&self) -> bool {
        self.type_id == MSG_AUDIO
    }

    /// Audio or video
    pub fn is_media(&self) -> bool {
        self.is_video() || self.is_audio()
    }

    /// Command message in either encoding
    pub fn is_command(&self) -> bool {
        matches!(self.type_id, MSG_CMD | MSG_CMD3)
    }

    /// Data message (`onMetaData`, `@setDataFrame`) in either encoding
    pub fn is_data(&self) -> bool {
        matches!(self.type_id, MSG_DATA | MSG_DATA3)
    }

    /// Protocol control message (types 1-6)
    pub fn is_control(&self) -> bool {
        (MSG_SET_CHUNK..=MSG_SET_PEER_BW).contains(&self.type_id)
    }

    /// Video key frame carrying media (not a sequence header)
    pub fn is_video_key_frame(&self) -> bool {
        self.is_video()
            && self.body.len() > 1
            && VideoFrameType::from_byte(self.body[0]) == Some(VideoFrameType::Keyframe)
            && self.body[1] == 1
    }

    /// Codec configuration message (AVC/HEVC sequence header, AAC config)
    pub fn is_config_frame(&self) -> bool {
        if self.body.len() < 2 {
            return false;
        }
        match self.type_id {
            MSG_VIDEO => self.body[1] == 0,
            MSG_AUDIO => {
                AudioFormat::from_byte(self.body[0]) == Some(AudioFormat::Aac) && self.body[1] == 0
            }
            _ => false,
        }
    }

    /// Numeric codec id from byte0 (video: low nibble, audio: high nibble)
    pub fn media_codec_id(&self) -> Option<u8> {
        let b = *self.body.first()?;
        match self.type_id {
            MSG_VIDEO => Some(b & 0x0F),
            MSG_AUDIO => Some(b >> 4),
            _ => None,
        }
    }

    /// Sample rate from the audio flags byte
    pub fn audio_sample_rate(&self) -> Option<u32> {
        const RATES: [u32; 4] = [5512, 11025, 22050, 44100];
        if !self.is_audio() {
            return None;
        }
        let b = *self.body.first()?;
        Some(RATES[((b & 0x0C) >> 2) as usize])
    }

    /// Sample width from the audio flags byte
    pub fn audio_sample_bits(&self) -> Option<u32> {
        if !self.is_audio() {
            return None;
        }
        let b = *self.body.first()?;
        Some(if b & 0x02 != 0 { 16 } else { 8 })
    }

    /// Channel count from the audio flags byte
    pub fn audio_channels(&self) -> Option<u32> {
        if !self.is_audio() {
            return None;
        }
        let b = *self.body.first()?;
        Some(if b & 0x01 != 0 { 2 } else { 1 })
    }

    /// Same message relabelled for another stream id (relays, pushers)
    pub fn with_stream_id(&self, stream_id: u32) -> Self {
        Self {
            stream_id,
            ..self.clone()
        }
    }
}

/// Free list of body buffers
///
/// Buffers handed out by [`take`](Self::take) are always empty; whatever a
/// previous user left behind is cleared before reuse.
#[derive(Debug, Clone)]
pub struct PacketPool {
    inner: Arc<Mutex<Vec<BytesMut>>>,
    max_pooled: usize,
}

impl PacketPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::with_capacity(max_pooled))),
            max_pooled,
        }
    }

    /// Get an empty buffer with at least `capacity` bytes reserved
    pub fn take(&self, capacity: usize) -> BytesMut {
        let pooled = {
            let mut free = self.inner.lock();
            let pos = free.iter().position(|b| b.capacity() >= capacity);
            match pos {
                Some(idx) => Some(free.swap_remove(idx)),
                None => free.pop(),
            }
        };
        match pooled {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(capacity);
                buf
            }
            None => BytesMut::with_capacity(capacity),
        }
    }

    /// Return a buffer; dropped when the pool is full or it has no capacity
    pub fn recycle(&self, mut buf: BytesMut) {
        if buf.capacity() == 0 {
            return;
        }
        buf.clear();
        let mut free = self.inner.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Freeze `buf` into a body that returns to this pool once the last
    /// handle to it is dropped
    pub fn wrap(&self, buf: BytesMut) -> Bytes {
        Bytes::from_owner(PooledBody {
            buf,
            pool: self.clone(),
        })
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Owner behind a pooled [`Bytes`] body
struct PooledBody {
    buf: BytesMut,
    pool: PacketPool,
}

impl AsRef<[u8]> for PooledBody {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for PooledBody {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.buf));
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(32)
    }
}
