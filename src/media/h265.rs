//! H.265/HEVC bitstream helpers
//!
//! HEVC rides in RTMP with codec id 12 and the same packet layout as AVC.
//! The sequence header carries an HEVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | profile_space/tier/profile_idc (1)
//! | profile_compatibility_flags (4) | constraint_indicator_flags (6)
//! | level_idc (1) | 0xF min_spatial_segmentation (2) | 0xFC parallelism (1)
//! | 0xFC chroma_format (1) | 0xF8 bit_depth_luma (1) | 0xF8 bit_depth_chroma (1)
//! | avgFrameRate (2) | frame-rate/layers/lengthSizeMinusOne (1)
//! | numOfArrays (1) | { type (1) | numNalus (2) | { len (2) | nalu }* }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::h264::{read_parameter_sets, unescape_rbsp};
use crate::error::{MediaError, Result};

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;

/// NAL unit type from the first header byte
pub fn nal_type(b: u8) -> u8 {
    (b >> 1) & 0x3F
}

/// BLA, IDR and CRA pictures
pub fn is_irap(nal_type: u8) -> bool {
    (16..=21).contains(&nal_type)
}

pub fn is_parameter_set(nal_type: u8) -> bool {
    matches!(nal_type, NAL_VPS | NAL_SPS | NAL_PPS)
}

/// HEVC decoder configuration (from sequence header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcConfig {
    /// profile_space/tier/profile_idc, compatibility flags, constraint flags and level
    pub general_profile: [u8; 12],
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub nalu_length_size: u8,
    pub vps: Vec<Bytes>,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl HevcConfig {
    /// Configuration from one VPS, SPS and PPS.
    ///
    /// The general profile block is copied straight from the SPS; chroma
    /// format and bit depth assume 4:2:0 8-bit.
    pub fn from_parameter_sets(vps: Bytes, sps: Bytes, pps: Bytes) -> Result<Self> {
        let rbsp = unescape_rbsp(sps.get(2..).unwrap_or_default());
        if rbsp.len() < 13 {
            return Err(MediaError::InvalidHevcPacket.into());
        }
        let mut general_profile = [0u8; 12];
        general_profile.copy_from_slice(&rbsp[1..13]);
        Ok(Self {
            general_profile,
            chroma_format: 1,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            nalu_length_size: 4,
            vps: vec![vps],
            sps: vec![sps],
            pps: vec![pps],
        })
    }

    /// Parse an HEVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 23 || data[0] != 1 {
            return Err(MediaError::InvalidHevcPacket.into());
        }
        data.advance(1);
        let mut general_profile = [0u8; 12];
        data.copy_to_slice(&mut general_profile);
        data.advance(3); // min_spatial_segmentation + parallelism
        let chroma_format = data.get_u8() & 0x03;
        let bit_depth_luma_minus8 = data.get_u8() & 0x07;
        let bit_depth_chroma_minus8 = data.get_u8() & 0x07;
        data.advance(2); // avgFrameRate
        let nalu_length_size = (data.get_u8() & 0x03) + 1;
        let arrays = data.get_u8();

        let (mut vps, mut sps, mut pps) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..arrays {
            if data.len() < 3 {
                return Err(MediaError::InvalidHevcPacket.into());
            }
            let kind = data.get_u8() & 0x3F;
            let count = data.get_u16() as usize;
            let nalus = read_parameter_sets(&mut data, count)
                .map_err(|_| MediaError::InvalidHevcPacket)?;
            match kind {
                NAL_VPS => vps.extend(nalus),
                NAL_SPS => sps.extend(nalus),
                NAL_PPS => pps.extend(nalus),
                _ => {}
            }
        }

        Ok(Self {
            general_profile,
            chroma_format,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            nalu_length_size,
            vps,
            sps,
            pps,
        })
    }

    /// Serialize as an HEVCDecoderConfigurationRecord
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(64);
        out.put_u8(1);
        out.put_slice(&self.general_profile);
        out.put_u16(0xF000);
        out.put_u8(0xFC);
        out.put_u8(0xFC | self.chroma_format);
        out.put_u8(0xF8 | self.bit_depth_luma_minus8);
        out.put_u8(0xF8 | self.bit_depth_chroma_minus8);
        out.put_u16(0);
        // one temporal layer, temporal id nested
        out.put_u8(0x0C | (self.nalu_length_size.saturating_sub(1) & 0x03));

        let arrays = [(NAL_VPS, &self.vps), (NAL_SPS, &self.sps), (NAL_PPS, &self.pps)];
        out.put_u8(arrays.iter().filter(|(_, n)| !n.is_empty()).count() as u8);
        for (kind, nalus) in arrays {
            if nalus.is_empty() {
                continue;
            }
            out.put_u8(0x80 | kind);
            out.put_u16(nalus.len() as u16);
            for nalu in nalus {
                out.put_u16(nalu.len() as u16);
                out.put_slice(nalu);
            }
        }
        out.freeze()
    }

    pub fn profile_idc(&self) -> u8 {
        self.general_profile[0] & 0x1F
    }

    pub fn level_idc(&self) -> u8 {
        self.general_profile[11]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn vps() -> Bytes {
        Bytes::from_static(&[0x40, 0x01, 0x0C, 0x01, 0xFF, 0xFF])
    }

    /// Main profile, level 4.0 (120)
    pub(crate) fn sps() -> Bytes {
        Bytes::from_static(&[
            0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x78, 0xA0, 0x03, 0xC0,
        ])
    }

    pub(crate) fn pps() -> Bytes {
        Bytes::from_static(&[0x44, 0x01, 0xC1, 0x72, 0xB4])
    }

    #[test]
    fn test_nal_types() {
        assert_eq!(nal_type(0x40), NAL_VPS);
        assert_eq!(nal_type(0x42), NAL_SPS);
        assert_eq!(nal_type(0x44), NAL_PPS);
        assert_eq!(nal_type(0x26), 19); // IDR_W_RADL
        assert!(is_irap(19));
        assert!(!is_irap(nal_type(0x02)));
        assert!(is_parameter_set(NAL_PPS));
    }

    #[test]
    fn test_config_from_parameter_sets() {
        let config = HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap();
        assert_eq!(config.profile_idc(), 1);
        assert_eq!(config.level_idc(), 0x78);

        let raw = config.to_bytes();
        assert_eq!(raw[0], 1);
        assert_eq!(raw[22], 3);
        assert_eq!(HevcConfig::parse(raw).unwrap(), config);
    }

    #[test]
    fn test_config_invalid() {
        assert!(HevcConfig::from_parameter_sets(vps(), Bytes::from_static(&[0x42, 0x01]), pps()).is_err());
        assert!(HevcConfig::parse(Bytes::from_static(&[1, 2, 3])).is_err());

        let mut raw = BytesMut::from(&HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap().to_bytes()[..]);
        raw.truncate(raw.len() - 2);
        assert!(HevcConfig::parse(raw.freeze()).is_err());
    }
}
