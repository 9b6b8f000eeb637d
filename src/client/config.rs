//! Client configuration

use std::time::Duration;

use super::url::RtmpUrl;
use crate::error::Result;
use crate::protocol::constants::*;

/// Options shared by the player and the pusher
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `rtmp://host[:port]/app/stream`
    pub url: String,

    /// Time allowed for connect, handshake and the play outcome
    pub play_timeout: Duration,

    /// Time allowed for connect, handshake and the publish outcome
    pub publish_timeout: Duration,

    /// Player fails when no audio/video arrives for this long
    pub media_timeout: Duration,

    /// Ping interval while the player is paused
    pub beat_interval: Duration,

    /// Outbound chunk size announced by the pusher
    pub chunk_size: u32,

    /// Socket read buffer size
    pub read_buffer_size: usize,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Advertise the enhanced-RTMP FourCC list in `connect`
    pub enhanced: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            play_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            media_timeout: Duration::from_secs(5),
            beat_interval: Duration::from_secs(5),
            chunk_size: PUSHER_CHUNK_SIZE,
            read_buffer_size: 64 * 1024,
            tcp_nodelay: true,
            enhanced: false,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn parse_url(&self) -> Result<RtmpUrl> {
        RtmpUrl::parse(&self.url)
    }

    pub fn play_timeout(mut self, timeout: Duration) -> Self {
        self.play_timeout = timeout;
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn media_timeout(mut self, timeout: Duration) -> Self {
        self.media_timeout = timeout;
        self
    }

    pub fn beat_interval(mut self, interval: Duration) -> Self {
        self.beat_interval = interval;
        self
    }

    /// Set the pusher's chunk size, clamped to the valid range
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1024);
        self
    }

    pub fn enhanced(mut self, enabled: bool) -> Self {
        self.enhanced = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("rtmp://localhost/live/s");
        assert_eq!(config.play_timeout, Duration::from_secs(10));
        assert_eq!(config.media_timeout, Duration::from_secs(5));
        assert_eq!(config.beat_interval, Duration::from_secs(5));
        assert_eq!(config.chunk_size, 60_000);
        assert!(config.tcp_nodelay);
        assert!(!config.enhanced);
        assert_eq!(config.parse_url().unwrap().stream, "s");
    }

    #[test]
    fn test_builder_chaining() {
        let config = ClientConfig::new("rtmp://h/a/b")
            .play_timeout(Duration::from_secs(3))
            .media_timeout(Duration::from_secs(2))
            .chunk_size(0)
            .read_buffer_size(10)
            .enhanced(true);
        assert_eq!(config.play_timeout, Duration::from_secs(3));
        assert_eq!(config.media_timeout, Duration::from_secs(2));
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.enhanced);
    }

    #[test]
    fn test_bad_url_reported() {
        assert!(ClientConfig::new("nope").parse_url().is_err());
    }
}
