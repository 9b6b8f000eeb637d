//! Media handling for RTMP
//!
//! This module provides:
//! - FLV tag layout and the FLV muxer/recorder
//! - H.264/AVC, H.265/HEVC and AAC bitstream helpers
//! - GOP caching and the multi-reader [`MediaSource`]

pub mod aac;
pub mod flv;
pub mod flv_muxer;
pub mod gop;
pub mod h264;
pub mod h265;
pub mod source;

pub use flv::{FlvTag, FlvTagType};
pub use flv_muxer::{FlvMuxer, FlvRecorder};
pub use gop::GopCache;
pub use source::{MediaSource, NoReaderCallback, ReaderItem, SourceReader};
