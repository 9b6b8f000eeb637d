//! Live RTMP streaming engine
//!
//! - [`protocol`]: handshake, chunk stream, control and command messages,
//!   and the sans-IO [`RtmpConnection`](protocol::RtmpConnection)
//! - [`amf`]: AMF0/AMF3 values and codec
//! - [`media`]: GOP-cached [`MediaSource`](media::MediaSource), FLV muxing
//!   and bitstream helpers
//! - [`codec`]: frame <-> RTMP message packing per codec
//! - [`client`]: [`RtmpPlayer`](client::RtmpPlayer) and
//!   [`RtmpPusher`](client::RtmpPusher)
//! - [`registry`]: named sources shared between writers and readers
//!
//! # Relaying a remote stream
//! ```no_run
//! use rtmp_live::client::{ClientConfig, PlayerEvent, RtmpPlayer, RtmpPusher};
//! use rtmp_live::registry::{SourceConfig, StreamKey};
//! use rtmp_live::media::MediaSource;
//!
//! # async fn relay() -> rtmp_live::Result<()> {
//! let source = MediaSource::new(StreamKey::new("live", "cam1"), SourceConfig::default());
//! let (_player, mut events) = RtmpPlayer::play(ClientConfig::new("rtmp://origin/live/cam1"))?;
//! let mut pusher = None;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PlayerEvent::Metadata(meta) => source.set_metadata(meta),
//!         PlayerEvent::Packet(pkt) => source.write_packet(pkt),
//!         PlayerEvent::PlayResult(Ok(())) => {
//!             let config = ClientConfig::new("rtmp://edge/live/cam1");
//!             pusher = Some(RtmpPusher::publish(config, &source)?);
//!         }
//!         PlayerEvent::PlayResult(Err(e)) | PlayerEvent::Shutdown(e) => return Err(e),
//!         PlayerEvent::Resumed => {}
//!     }
//! }
//! # drop(pusher);
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod client;
pub mod codec;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod session;

pub use error::{Error, Result};
