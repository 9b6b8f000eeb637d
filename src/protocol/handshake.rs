//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Only the plaintext ("simple") handshake is spoken. The state machine is
//! sans-IO: callers feed received bytes and write whatever it returns.
//!
//! ```text
//! Init -> SentGreeting -> ReceivedPeerGreeting -> SentEcho -> Ready
//!   \__________\_______________\_____________________\______> Closed
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Client handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    Init,
    /// C0+C1 written, waiting for S0+S1+S2
    SentGreeting,
    /// S0+S1 parsed
    ReceivedPeerGreeting,
    /// C2 produced
    SentEcho,
    /// Chunk traffic may start
    Ready,
    /// Aborted; every further call fails
    Closed,
}

/// Client side handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    /// Our C1, kept to compare against S2
    c1: Option<Box<[u8; HANDSHAKE_SIZE]>>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Init,
            c1: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// Bytes that must be buffered before [`input`](Self::input) can progress
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::SentGreeting => 1 + HANDSHAKE_SIZE * 2,
            _ => 0,
        }
    }

    /// Produce C0+C1 and move to `SentGreeting`
    pub fn greeting(&mut self) -> Result<Bytes> {
        match self.state {
            HandshakeState::Init => {}
            HandshakeState::Closed => return Err(HandshakeError::Closed.into()),
            _ => return Ok(Bytes::new()),
        }

        let c1 = generate_packet();
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&c1[..]);
        self.c1 = Some(c1);
        self.state = HandshakeState::SentGreeting;
        Ok(buf.freeze())
    }

    /// Consume S0+S1+S2 from `data` once fully buffered.
    ///
    /// Returns C2 once S0+S1+S2 are in, `None` while more bytes are needed.
    /// Bytes after S2 stay in `data` for the chunk parser.
    pub fn input(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::SentGreeting => {}
            HandshakeState::Closed => return Err(HandshakeError::Closed.into()),
            _ => return Ok(None),
        }
        if data.len() < 1 + HANDSHAKE_SIZE * 2 {
            return Ok(None);
        }

        let version = data.get_u8();
        if version != RTMP_VERSION {
            self.state = HandshakeState::Closed;
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let s1 = data.split_to(HANDSHAKE_SIZE).freeze();
        self.state = HandshakeState::ReceivedPeerGreeting;

        let s2 = data.split_to(HANDSHAKE_SIZE);
        if let Some(c1) = &self.c1 {
            if s2[8..] != c1[8..] {
                // many servers echo garbage here; tolerated
                tracing::trace!("S2 does not echo C1 random payload");
            }
        }

        // C2 echoes S1 verbatim
        self.state = HandshakeState::SentEcho;
        self.c1 = None;
        Ok(Some(s1))
    }

    /// Mark C2 as written. Returns `true` exactly once, on the transition
    /// to `Ready`.
    pub fn finish(&mut self) -> bool {
        if self.state == HandshakeState::SentEcho {
            self.state = HandshakeState::Ready;
            true
        } else {
            false
        }
    }

    /// Abort the handshake
    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
        self.c1 = None;
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Build C1: 4-byte time, 4 zero bytes, 1528 random bytes
fn generate_packet() -> Box<[u8; HANDSHAKE_SIZE]> {
    let mut packet = Box::new([0u8; HANDSHAKE_SIZE]);
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    packet[0..4].copy_from_slice(&secs.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut packet[8..]);
    packet
}
