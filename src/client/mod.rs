//! RTMP clients
//!
//! - [`RtmpPlayer`] pulls a remote stream and reports metadata and packets
//! - [`RtmpPusher`] publishes a local [`MediaSource`](crate::media::MediaSource)
//!
//! Both run as a spawned task per connection and report through an
//! unbounded event channel. Each reports one initial result, then at most
//! one shutdown.
//!
//! # Example
//! ```no_run
//! use rtmp_live::client::{ClientConfig, PlayerEvent, RtmpPlayer};
//!
//! # async fn example() -> rtmp_live::error::Result<()> {
//! let (player, mut events) = RtmpPlayer::play(ClientConfig::new("rtmp://localhost/live/cam1"))?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PlayerEvent::PlayResult(Err(e)) | PlayerEvent::Shutdown(e) => return Err(e),
//!         PlayerEvent::Packet(pkt) => println!("{} bytes at {}", pkt.size(), pkt.timestamp),
//!         _ => {}
//!     }
//! }
//! # drop(player);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod player;
pub mod pusher;
pub mod url;

pub use config::ClientConfig;
pub use player::{PlayerEvent, RtmpPlayer};
pub use pusher::{PushEvent, RtmpPusher};
pub use url::RtmpUrl;

use std::io;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Open the TCP connection for `url`
pub(crate) async fn connect_tcp(url: &RtmpUrl, config: &ClientConfig) -> Result<TcpStream> {
    let addr = url.addr();
    tracing::debug!(addr = %addr, "connecting");
    let stream = TcpStream::connect(&addr).await?;
    if config.tcp_nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(stream)
}

pub(crate) fn peer_closed() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"))
}
