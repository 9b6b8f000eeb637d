//! Chunk stream framing
//!
//! Messages travel as chunks of at most `chunk_size` payload bytes. Each
//! chunk starts with a basic header (format + chunk stream id) followed by a
//! message header whose size depends on the format:
//!
//! ```text
//! basic header   fmt(2) | csid(6)            csid 2..=63
//!                fmt(2) | 0 | csid-64(8)     csid 64..=319
//!                fmt(2) | 1 | csid-64(16 LE) csid 64..=65599
//!
//! fmt 0 (11)     timestamp(3) length(3) type(1) stream id(4, LE)
//! fmt 1 (7)      delta(3)     length(3) type(1)
//! fmt 2 (3)      delta(3)
//! fmt 3 (0)      -
//!
//! timestamp/delta == 0xFFFFFF -> 4-byte extended field follows the header
//! ```
//!
//! State is kept per chunk stream id and never shared between ids.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE};
use super::packet::{PacketPool, RtmpPacket};
use crate::error::{ProtocolError, Result};

/// Message header size by format
const HEADER_LENGTH: [usize; 4] = [11, 7, 3, 0];

/// Per chunk stream receive context
#[derive(Debug, Default)]
struct ChunkStreamState {
    /// A full header has been seen on this id
    initialized: bool,
    type_id: u8,
    body_size: u32,
    stream_id: u32,
    /// Raw timestamp or delta field of the current header
    ts_field: u32,
    /// Whether `ts_field` is absolute (fmt 0)
    is_abs_stamp: bool,
    /// Absolute timestamp of the last completed message
    timestamp: u32,
    /// Message under assembly
    buffer: BytesMut,
}

/// Inbound chunk parser and message reassembler
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    pool: PacketPool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::with_pool(PacketPool::default())
    }

    pub fn with_pool(pool: PacketPool) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            pool,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a peer's Set Chunk Size
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Discard the partially received message on `chunk_id` (Abort Message)
    pub fn abort(&mut self, chunk_id: u32) {
        if let Some(state) = self.streams.get_mut(&chunk_id) {
            let partial = std::mem::take(&mut state.buffer);
            self.pool.recycle(partial);
        }
    }

    /// Drop all per-chunk-stream state
    pub fn reset(&mut self) {
        for (_, state) in self.streams.drain() {
            self.pool.recycle(state.buffer);
        }
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }

    /// Parse chunks from `buf` until a message completes or input runs out.
    ///
    /// Only whole chunks are consumed; a partial chunk stays in `buf`.
    /// Zero-length messages are swallowed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpPacket>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::NeedMore => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(pkt) => return Ok(Some(pkt)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let Some(&b0) = buf.first() else {
            return Ok(ChunkOutcome::NeedMore);
        };
        let fmt = (b0 >> 6) as usize;
        let (chunk_id, basic_len) = match b0 & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(ChunkOutcome::NeedMore);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(ChunkOutcome::NeedMore);
                }
                (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3)
            }
            id => (id as u32, 1),
        };

        let header_len = HEADER_LENGTH[fmt];
        if buf.len() < basic_len + header_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        let chunk_size = self.chunk_size;
        let state = self.streams.entry(chunk_id).or_default();
        if fmt != 0 && !state.initialized {
            return Err(ProtocolError::MissingChunkContext(chunk_id).into());
        }

        // Peek the header without consuming, so an incomplete chunk leaves
        // both `buf` and the stream state untouched.
        let h = &buf[basic_len..basic_len + header_len];
        let ts_field = if fmt <= 2 { be24(&h[0..3]) } else { state.ts_field };
        let (body_size, type_id) = if fmt <= 1 {
            (be24(&h[3..6]), h[6])
        } else {
            (state.body_size, state.type_id)
        };
        let stream_id = if fmt == 0 {
            u32::from_le_bytes([h[7], h[8], h[9], h[10]])
        } else {
            state.stream_id
        };

        let ext_len = if ts_field == EXTENDED_TIMESTAMP { 4 } else { 0 };
        let prefix = basic_len + header_len + ext_len;
        if buf.len() < prefix {
            return Ok(ChunkOutcome::NeedMore);
        }

        let buffered = state.buffer.len() as u32;
        if body_size < buffered {
            return Err(ProtocolError::BodyOverflow {
                chunk_id,
                declared: body_size,
                received: buffered,
            }
            .into());
        }
        let more = chunk_size.min(body_size - buffered) as usize;
        if buf.len() < prefix + more {
            return Ok(ChunkOutcome::NeedMore);
        }

        // Whole chunk present: commit
        let extended = if ext_len > 0 {
            Some(u32::from_be_bytes([
                buf[prefix - 4],
                buf[prefix - 3],
                buf[prefix - 2],
                buf[prefix - 1],
            ]))
        } else {
            None
        };
        buf.advance(prefix);

        if buffered == 0 && state.buffer.capacity() < body_size as usize {
            state.buffer = self.pool.take(body_size as usize);
        }
        state.buffer.put_slice(&buf[..more]);
        buf.advance(more);

        state.initialized = true;
        state.body_size = body_size;
        state.type_id = type_id;
        state.stream_id = stream_id;
        if fmt <= 2 {
            state.ts_field = ts_field;
        }
        match fmt {
            0 => state.is_abs_stamp = true,
            1 | 2 => state.is_abs_stamp = false,
            _ => {}
        }

        if state.buffer.len() as u32 != body_size {
            return Ok(ChunkOutcome::Partial);
        }

        let stamp = extended.unwrap_or(ts_field);
        state.timestamp = if state.is_abs_stamp {
            stamp
        } else {
            state.timestamp.wrapping_add(stamp)
        };

        if body_size == 0 {
            tracing::trace!(chunk_id, type_id, "dropping empty message");
            return Ok(ChunkOutcome::Partial);
        }

        let body = self.pool.wrap(std::mem::take(&mut state.buffer));
        Ok(ChunkOutcome::Complete(RtmpPacket {
            type_id,
            body_size,
            timestamp: state.timestamp,
            ts_field: stamp,
            stream_id,
            chunk_id,
            is_abs_stamp: state.is_abs_stamp,
            body,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum ChunkOutcome {
    NeedMore,
    Partial,
    Complete(RtmpPacket),
}

/// Header last written on a chunk stream
#[derive(Debug, Clone, Copy)]
struct SentHeader {
    type_id: u8,
    body_size: u32,
    stream_id: u32,
    timestamp: u32,
    /// Timestamp field as written (absolute for fmt 0, delta otherwise)
    ts_field: u32,
    is_abs_stamp: bool,
}

/// Outbound message splitter with header compression
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    last: HashMap<u32, SentHeader>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            last: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the outbound chunk size. The Set Chunk Size message announcing
    /// it must already have been encoded with the old size.
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Serialize `pkt` as one or more chunks appended to `out`
    pub fn encode(&mut self, pkt: &RtmpPacket, out: &mut BytesMut) {
        let chunk_id = pkt.chunk_id;
        let body_size = pkt.body.len() as u32;
        let prev = self.last.get(&chunk_id).copied();

        let (fmt, ts_field, is_abs) = match prev {
            Some(p) if p.stream_id == pkt.stream_id && pkt.timestamp >= p.timestamp => {
                let delta = pkt.timestamp - p.timestamp;
                let same_shape = p.type_id == pkt.type_id && p.body_size == body_size;
                let repeat = if p.is_abs_stamp {
                    delta == 0 && p.ts_field == pkt.timestamp
                } else {
                    delta == p.ts_field
                };
                if same_shape && repeat {
                    (3u8, p.ts_field, p.is_abs_stamp)
                } else if same_shape {
                    (2, delta, false)
                } else {
                    (1, delta, false)
                }
            }
            _ => (0, pkt.timestamp, true),
        };

        let extended = ts_field >= EXTENDED_TIMESTAMP;
        let field24 = if extended { EXTENDED_TIMESTAMP } else { ts_field };

        out.reserve(body_size as usize + 18);
        write_basic_header(out, fmt, chunk_id);
        if fmt <= 2 {
            put_u24(out, field24);
        }
        if fmt <= 1 {
            put_u24(out, body_size);
            out.put_u8(pkt.type_id);
        }
        if fmt == 0 {
            out.put_u32_le(pkt.stream_id);
        }
        if extended {
            out.put_u32(ts_field);
        }

        let chunk_size = self.chunk_size as usize;
        let mut body = &pkt.body[..];
        let first = body.len().min(chunk_size);
        out.put_slice(&body[..first]);
        body = &body[first..];
        while !body.is_empty() {
            write_basic_header(out, 3, chunk_id);
            if extended {
                out.put_u32(ts_field);
            }
            let n = body.len().min(chunk_size);
            out.put_slice(&body[..n]);
            body = &body[n..];
        }

        self.last.insert(
            chunk_id,
            SentHeader {
                type_id: pkt.type_id,
                body_size,
                stream_id: pkt.stream_id,
                timestamp: pkt.timestamp,
                ts_field,
                is_abs_stamp: is_abs,
            },
        );
    }

    /// Forget compression context (e.g. after a reconnect)
    pub fn reset(&mut self) {
        self.last.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(out: &mut BytesMut, fmt: u8, chunk_id: u32) {
    let fmt = fmt << 6;
    match chunk_id {
        0..=63 => out.put_u8(fmt | chunk_id as u8),
        64..=319 => {
            out.put_u8(fmt);
            out.put_u8((chunk_id - 64) as u8);
        }
        _ => {
            let id = chunk_id - 64;
            out.put_u8(fmt | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8(((id >> 8) & 0xFF) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

fn be24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::constants::*;
    use bytes::Bytes;

    fn body(len: usize) -> Bytes {
        (0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>().into()
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<RtmpPacket> {
        let mut out = Vec::new();
        while let Some(pkt) = decoder.decode(buf).unwrap() {
            out.push(pkt);
        }
        out
    }

    #[test]
    fn test_single_chunk_roundtrip() {
        let pkt = RtmpPacket::new(MSG_CMD, CHUNK_SYSTEM, 0, 1000, body(40));
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&pkt, &mut wire);
        assert_eq!(wire.len(), 12 + 40);

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, pkt.body);
        assert_eq!(got[0].timestamp, 1000);
        assert_eq!(got[0].type_id, MSG_CMD);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_reassembly_at_any_slice_boundary() {
        let pkt = RtmpPacket::video(1, 0x0123_4567, body(1000));
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&pkt, &mut wire);
        let wire = wire.freeze();

        let mut whole = BytesMut::from(&wire[..]);
        let expected = decode_all(&mut ChunkDecoder::new(), &mut whole);
        assert_eq!(expected.len(), 1);

        for step in [1usize, 2, 3, 5, 13, 128, 129, 500] {
            let mut decoder = ChunkDecoder::new();
            let mut buf = BytesMut::new();
            let mut got = Vec::new();
            for piece in wire.chunks(step) {
                buf.extend_from_slice(piece);
                got.extend(decode_all(&mut decoder, &mut buf));
            }
            assert_eq!(got, expected, "slice step {}", step);
        }
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let mut enc = ChunkEncoder::new();
        let a = RtmpPacket::video(1, 10, body(300));
        let b = RtmpPacket::audio(1, 11, body(200));

        let mut wa = BytesMut::new();
        enc.encode(&a, &mut wa);
        let mut wb = BytesMut::new();
        enc.encode(&b, &mut wb);

        // first chunk of each (fmt0: 12 header + 128 payload), then the rest
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&wa[..140]);
        wire.extend_from_slice(&wb[..140]);
        wire.extend_from_slice(&wa[140..]);
        wire.extend_from_slice(&wb[140..]);

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].body, a.body);
        assert_eq!(got[1].body, b.body);
    }

    #[test]
    fn test_header_compression_and_deltas() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();

        let p0 = RtmpPacket::audio(1, 100, body(10));
        let p1 = RtmpPacket::audio(1, 120, body(10)); // fmt2, delta 20
        let p2 = RtmpPacket::audio(1, 140, body(10)); // fmt3, same delta
        let p3 = RtmpPacket::audio(1, 150, body(12)); // fmt1, new length

        enc.encode(&p0, &mut wire);
        assert_eq!(wire[0] >> 6, 0);
        let at = wire.len();
        enc.encode(&p1, &mut wire);
        assert_eq!(wire[at] >> 6, 2);
        let at = wire.len();
        enc.encode(&p2, &mut wire);
        assert_eq!(wire[at] >> 6, 3);
        assert_eq!(wire.len() - at, 1 + 10);
        let at = wire.len();
        enc.encode(&p3, &mut wire);
        assert_eq!(wire[at] >> 6, 1);

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        let stamps: Vec<u32> = got.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![100, 120, 140, 150]);
        assert!(got[0].is_abs_stamp);
        assert!(!got[1].is_abs_stamp);
    }

    #[test]
    fn test_fmt3_after_absolute_header_repeats_timestamp() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::video(1, 500, body(4)), &mut wire);
        enc.encode(&RtmpPacket::video(1, 500, body(4)), &mut wire);
        assert_eq!(wire[12 + 4] >> 6, 3);

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got[0].timestamp, 500);
        assert_eq!(got[1].timestamp, 500);
    }

    #[test]
    fn test_stream_id_change_forces_full_header() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::video(1, 0, body(4)), &mut wire);
        let at = wire.len();
        enc.encode(&RtmpPacket::video(2, 0, body(4)), &mut wire);
        assert_eq!(wire[at] >> 6, 0);
        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got[1].stream_id, 2);
    }

    #[test]
    fn test_extended_timestamp() {
        let mut enc = ChunkEncoder::new();
        let ts = 0x0100_0000;
        let pkt = RtmpPacket::video(1, ts, body(300));
        let mut wire = BytesMut::new();
        enc.encode(&pkt, &mut wire);

        assert_eq!(&wire[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&wire[12..16], &ts.to_be_bytes());

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got[0].timestamp, ts);
        assert_eq!(got[0].body, pkt.body);
    }

    #[test]
    fn test_extended_timestamp_split_bytewise() {
        let mut enc = ChunkEncoder::new();
        let pkt = RtmpPacket::audio(1, u32::MAX - 5, body(260));
        let mut wire = BytesMut::new();
        enc.encode(&pkt, &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for b in wire.iter() {
            buf.put_u8(*b);
            got.extend(decode_all(&mut decoder, &mut buf));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, u32::MAX - 5);
    }

    #[test]
    fn test_basic_header_forms() {
        for chunk_id in [3u32, 63, 64, 319, 320, 65599] {
            let mut enc = ChunkEncoder::new();
            let pkt = RtmpPacket::new(MSG_DATA, chunk_id, 1, 0, body(5));
            let mut wire = BytesMut::new();
            enc.encode(&pkt, &mut wire);
            let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
            assert_eq!(got[0].chunk_id, chunk_id);
        }
    }

    #[test]
    fn test_larger_chunk_size() {
        let mut enc = ChunkEncoder::new();
        enc.set_chunk_size(4096).unwrap();
        let pkt = RtmpPacket::video(1, 0, body(5000));
        let mut wire = BytesMut::new();
        enc.encode(&pkt, &mut wire);
        assert_eq!(wire.len(), 12 + 4096 + 1 + 904);

        let mut dec = ChunkDecoder::new();
        dec.set_chunk_size(4096).unwrap();
        let got = decode_all(&mut dec, &mut wire);
        assert_eq!(got[0].body, pkt.body);
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut dec = ChunkDecoder::new();
        assert!(dec.set_chunk_size(0).is_err());
        assert!(dec.set_chunk_size(0x8000_0000).is_err());
        assert_eq!(dec.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_continuation_without_context_is_fatal() {
        let mut buf = BytesMut::from(&[0x45u8, 0, 0, 10][..]); // fmt1, csid 5
        buf.extend_from_slice(&[0, 0, 4, MSG_AUDIO, 1, 2, 3, 4]);
        let err = ChunkDecoder::new().decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MissingChunkContext(5))
        ));
    }

    #[test]
    fn test_shrinking_body_size_is_fatal() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::video(1, 0, body(300)), &mut wire);
        wire.truncate(12 + 128);
        // fmt1 on the same id declaring a 10-byte body mid-message
        wire.extend_from_slice(&[0x40 | CHUNK_VIDEO as u8, 0, 0, 0, 0, 0, 10, MSG_VIDEO]);
        wire.extend_from_slice(&[0u8; 10]);

        let mut dec = ChunkDecoder::new();
        let err = dec.decode(&mut wire).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::BodyOverflow { declared: 10, received: 128, .. })
        ));
    }

    #[test]
    fn test_empty_message_dropped() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::new(MSG_DATA, 5, 1, 0, Bytes::new()), &mut wire);
        enc.encode(&RtmpPacket::new(MSG_DATA, 5, 1, 10, body(3)), &mut wire);

        let got = decode_all(&mut ChunkDecoder::new(), &mut wire);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, 10);
    }

    #[test]
    fn test_abort_discards_partial() {
        let mut enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::video(1, 0, body(300)), &mut wire);
        let mut first = BytesMut::from(&wire[..140]);

        let mut dec = ChunkDecoder::new();
        assert!(dec.decode(&mut first).unwrap().is_none());
        dec.abort(CHUNK_VIDEO);

        let mut again = BytesMut::new();
        enc.reset();
        enc.encode(&RtmpPacket::video(1, 40, body(20)), &mut again);
        let got = decode_all(&mut dec, &mut again);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body.len(), 20);
    }

    #[test]
    fn test_decoded_bodies_return_to_pool() {
        let pool = PacketPool::new(4);
        let mut dec = ChunkDecoder::with_pool(pool.clone());
        let mut enc = ChunkEncoder::new();

        for i in 0..100u32 {
            let mut wire = BytesMut::new();
            enc.encode(&RtmpPacket::video(1, i * 40, body(300)), &mut wire);
            let got = decode_all(&mut dec, &mut wire);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].body, body(300));
        }
        assert!(pool.idle() > 0);

        // a body still referenced stays out of the pool
        let mut wire = BytesMut::new();
        enc.encode(&RtmpPacket::video(1, 4000, body(300)), &mut wire);
        let held = decode_all(&mut dec, &mut wire).remove(0);
        let addr = held.body.as_ptr();
        let idle = pool.idle();
        let body_ref = held.body.clone();
        drop(held);
        assert_eq!(pool.idle(), idle);
        drop(body_ref);
        assert_eq!(pool.idle(), idle + 1);

        let reused = (0..pool.idle()).map(|_| pool.take(300)).find(|b| b.as_ptr() == addr);
        assert!(reused.is_some_and(|b| b.is_empty()));
    }
}
