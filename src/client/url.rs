//! RTMP URL parsing
//!
//! ```text
//! rtmp://host[:port]/app[/sub]/stream[?query]
//! ```
//!
//! The first path segment is the application. If the remainder holds
//! another `/` before any `?`, the segment up to it is folded into the
//! application, so `rtmp://h/live/cam/1` plays stream `1` of app `live/cam`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::constants::DEFAULT_PORT;
use crate::registry::StreamKey;

/// A parsed `rtmp://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Stream name, query string included
    pub stream: String,
    /// `rtmp://host[:port]/app`, sent as `tcUrl`
    pub tc_url: String,
}

impl RtmpUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::Resource(format!("invalid rtmp url: {url}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        if !scheme.eq_ignore_ascii_case("rtmp") {
            return Err(Error::Resource(format!("unsupported url scheme: {scheme}")));
        }
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
        let (mut app, mut stream) = match path.split_once('/') {
            Some((app, stream)) => (app.to_string(), stream.to_string()),
            None => return Err(invalid()),
        };
        if let Some((second, tail)) = stream.split_once('/') {
            if !second.contains('?') && !second.is_empty() {
                app = format!("{app}/{second}");
                stream = tail.to_string();
            }
        }
        if authority.is_empty() || app.is_empty() || stream.is_empty() {
            return Err(invalid());
        }

        let (host, port) = split_host_port(authority).ok_or_else(invalid)?;
        let tc_url = format!("{scheme}://{authority}/{app}");
        Ok(Self {
            host,
            port,
            app,
            stream,
            tc_url,
        })
    }

    /// `host:port` for connecting
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.app, &self.stream)
    }
}

/// `host`, `host:port`, `[v6]` or `[v6]:port`
fn split_host_port(authority: &str) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), DEFAULT_PORT)),
    }
}

impl FromStr for RtmpUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RtmpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tc_url, self.stream)
    }
}
