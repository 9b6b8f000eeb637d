//! H.264/AVC bitstream helpers
//!
//! RTMP transports H.264 in AVCC format (length-prefixed NAL units); frames
//! handed to and from the codec bridge are Annex B (start-code delimited).
//!
//! AVC video tag body:
//! ```text
//! +----------+----------+-----------------+-----------------+------
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+------
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | 0xFC | lengthSizeMinusOne (lower 2 bits)
//! | 0xE0 | numOfSPS (lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// Four-byte Annex B start code
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// AVC packet type (second byte of the video tag body)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// IDR slice (keyframe)
    Idr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    Other = 0,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            _ => NaluType::Other,
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// Bytes in each NALU length prefix (usually 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Configuration from one SPS and one PPS NAL unit
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self> {
        if sps.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        Ok(Self {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            nalu_length_size: 4,
            sps: vec![sps],
            pps: vec![pps],
        })
    }

    /// Parse an AVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;
        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    /// Serialize as an AVCDecoderConfigurationRecord
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            11 + self.sps.iter().chain(&self.pps).map(|p| p.len() + 2).sum::<usize>(),
        );
        out.put_u8(1);
        out.put_u8(self.profile);
        out.put_u8(self.compatibility);
        out.put_u8(self.level);
        out.put_u8(0xFC | (self.nalu_length_size.saturating_sub(1) & 0x03));
        out.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        out.freeze()
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }
}

/// Read `count` u16-length-prefixed NAL units
pub(crate) fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        out.push(data.split_to(len));
    }
    Ok(out)
}

/// Split an Annex B buffer into NAL units (start codes removed).
///
/// Accepts both 3- and 4-byte start codes. Data before the first start code
/// is treated as a NAL unit of its own.
pub fn split_annexb(data: &Bytes) -> Vec<Bytes> {
    let mut nalus = Vec::new();
    let mut start = None;
    let mut i = 0;
    let bytes = &data[..];

    while i + 3 <= bytes.len() {
        if bytes[i] == 0 && bytes[i + 1] == 0 && bytes[i + 2] == 1 {
            let mut end = i;
            if end > 0 && bytes[end - 1] == 0 {
                end -= 1;
            }
            match start {
                Some(s) if end > s => nalus.push(data.slice(s..end)),
                None if end > 0 => nalus.push(data.slice(0..end)),
                _ => {}
            }
            i += 3;
            start = Some(i);
        } else {
            i += 1;
        }
    }

    let tail = start.unwrap_or(0);
    if tail < bytes.len() {
        nalus.push(data.slice(tail..));
    }
    nalus
}

/// Join NAL units with 4-byte start codes
pub fn join_annexb<'a>(nalus: impl IntoIterator<Item = &'a Bytes>) -> Bytes {
    let mut out = BytesMut::new();
    for nalu in nalus {
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Append NAL units with 4-byte length prefixes
pub fn write_avcc<'a>(nalus: impl IntoIterator<Item = &'a Bytes>, out: &mut BytesMut) {
    for nalu in nalus {
        out.put_u32(nalu.len() as u32);
        out.put_slice(nalu);
    }
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator {
    data: Bytes,
    nalu_length_size: usize,
}

impl NaluIterator {
    pub fn new(data: Bytes, nalu_length_size: u8) -> Self {
        Self {
            data,
            nalu_length_size: nalu_length_size.clamp(1, 4) as usize,
        }
    }
}

impl Iterator for NaluIterator {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.nalu_length_size > self.data.len() {
            return None;
        }

        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[i] as usize);
        }
        self.data.advance(self.nalu_length_size);

        if len > self.data.len() {
            self.data.clear();
            return None;
        }
        Some(self.data.split_to(len))
    }
}

/// Read the signed 24-bit composition time at `body[2..5]`
pub fn composition_time(body: &[u8]) -> i32 {
    if body.len() < 5 {
        return 0;
    }
    let raw = ((body[2] as i32) << 16) | ((body[3] as i32) << 8) | body[4] as i32;
    // sign extend from 24 bits
    (raw << 8) >> 8
}

/// Picture size decoded from a sequence parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (header byte included)
    pub fn parse(nalu: &[u8]) -> Option<Self> {
        if nalu.len() < 4 || NaluType::from_byte(nalu[0]) != NaluType::Sps {
            return None;
        }
        let rbsp = unescape_rbsp(&nalu[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)?;
        r.skip(16)?; // constraint flags + level
        r.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.skip(1)?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        r.read_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => {
                r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.skip(1)?;
                r.read_se()?;
                r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }
        r.read_ue()?; // max_num_ref_frames
        r.skip(1)?; // gaps_in_frame_num_value_allowed_flag
        let width_mbs = r.read_ue()? + 1;
        let height_units = r.read_ue()? + 1;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            r.skip(1)?; // mb_adaptive_frame_field_flag
        }
        r.skip(1)?; // direct_8x8_inference_flag

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let (crop_x, crop_y) = if chroma_format_idc == 0 || separate_colour_plane {
            (1, field_factor)
        } else {
            let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
            let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
            (sub_width, sub_height * field_factor)
        };

        let width = (width_mbs * 16).checked_sub((crop_left + crop_right) * crop_x)?;
        let height = (field_factor * height_units * 16).checked_sub((crop_top + crop_bottom) * crop_y)?;
        Some(SpsInfo { width, height })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Some(())
}

/// Remove emulation prevention bytes (00 00 03 -> 00 00)
pub(crate) fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Some(bit == 1)
    }

    pub(crate) fn read_bits(&mut self, n: u32) -> Option<u32> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()? as u32;
        }
        Some(v)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.data.len() * 8 {
            return None;
        }
        self.pos += n;
        Some(())
    }

    pub(crate) fn read_ue(&mut self) -> Option<u32> {
        let mut zeros = 0;
        while !self.read_bit()? {
            zeros += 1;
            if zeros > 31 {
                return None;
            }
        }
        let rest = self.read_bits(zeros)?;
        Some((1u32 << zeros) - 1 + rest)
    }

    pub(crate) fn read_se(&mut self) -> Option<i32> {
        let k = self.read_ue()? as i64;
        let v = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Some(v as i32)
    }
}
