//! Error types
//!
//! Every failure in the crate maps onto one of four classes:
//!
//! ```text
//! malformed wire data   Amf / Handshake / Protocol / Media   fatal to the connection
//! command failure       Command                              _result / onStatus level=error
//! timeout               Timeout                              result, stall and publish timers
//! resource failure      Resource / Registry                  raised before any I/O
//! ```
//!
//! [`Error::kind`] exposes the class so callers can tell a timeout from a
//! protocol violation without matching on every variant.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Peer answered a command with level `error` (or an unexpected level)
    #[error("{command} failed: level={level} code={code} {description}")]
    Command {
        command: String,
        level: String,
        code: String,
        description: String,
    },

    #[error("timeout: {0}")]
    Timeout(TimeoutKind),

    /// Required local resource missing (no source, no tracks)
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// Remote or local stream ended (stream dry/EOF, source closed)
    #[error("stream stopped: {0}")]
    StreamStopped(String),

    /// Session was torn down by its owner
    #[error("session shut down")]
    Shutdown,
}

/// Coarse error class, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Shutdown,
    Timeout,
    Command,
    Protocol,
    Resource,
    Other,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Shutdown => ErrorKind::Shutdown,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Command { .. } => ErrorKind::Command,
            Error::Amf(_) | Error::Handshake(_) | Error::Protocol(_) | Error::Media(_) => {
                ErrorKind::Protocol
            }
            Error::Resource(_) | Error::Registry(_) => ErrorKind::Resource,
            Error::Io(_) | Error::StreamStopped(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for building a [`Error::Command`]
    pub fn command(
        command: impl Into<String>,
        level: impl Into<String>,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Error::Command {
            command: command.into(),
            level: level.into(),
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Which timer expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No play outcome within the result window
    PlayResult,
    /// No publish outcome within the result window
    PublishResult,
    /// No audio/video received within the inactivity window
    MediaStalled,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::PlayResult => write!(f, "play rtmp timeout"),
            TimeoutKind::PublishResult => write!(f, "publish rtmp timeout"),
            TimeoutKind::MediaStalled => write!(f, "receive rtmp timeout"),
        }
    }
}

/// AMF encode/decode errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,

    #[error("AMF nesting too deep")]
    NestingTooDeep,

    #[error("unknown AMF marker 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("expected {expected}, found marker 0x{found:02x}")]
    TypeMismatch { expected: &'static str, found: u8 },

    #[error("missing object end marker")]
    InvalidObjectEnd,

    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,

    #[error("invalid AMF reference {0}")]
    InvalidReference(u32),
}

/// Handshake errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("unsupported RTMP version {0}")]
    InvalidVersion(u8),

    #[error("handshake already closed")]
    Closed,
}

/// Chunk stream and message level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    #[error("chunk stream {0} continued without a prior full header")]
    MissingChunkContext(u32),

    #[error("chunk stream {chunk_id}: received {received} bytes for a {declared}-byte message")]
    BodyOverflow {
        chunk_id: u32,
        declared: u32,
        received: u32,
    },

    #[error("malformed control message type {0}")]
    MalformedControl(u8),

    #[error("malformed aggregate message")]
    InvalidAggregate,

    #[error("malformed command: {0}")]
    InvalidCommand(String),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// Media payload errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid HEVC packet")]
    InvalidHevcPacket,

    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u8),

    #[error("empty media payload")]
    EmptyPayload,
}
