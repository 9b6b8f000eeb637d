//! Codec bridge between elementary-stream frames and RTMP messages
//!
//! ```text
//!  Frame (Annex B / raw AAC)  --RtmpMuxer-->   MediaSource (FLV-bodied packets)
//!  RtmpPacket                 --RtmpDemuxer--> Frame
//! ```
//!
//! Per-codec packing lives behind the [`RtmpCodec`] trait; the
//! [`CodecRegistry`] maps codecs to plugins.

mod aac;
mod audio;
mod avc;
mod hevc;

pub mod demuxer;
pub mod frame;
pub mod muxer;
pub mod registry;

pub use aac::AacCodec;
pub use audio::SimpleAudioCodec;
pub use avc::AvcCodec;
pub use demuxer::RtmpDemuxer;
pub use frame::{CodecId, Frame, Track, TrackType};
pub use hevc::HevcCodec;
pub use muxer::RtmpMuxer;
pub use registry::{CodecFactory, CodecRegistry, RtmpCodec};
