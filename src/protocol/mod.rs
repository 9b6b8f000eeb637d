//! RTMP wire protocol
//!
//! Layers, bottom up:
//! - [`handshake`]: C0/C1/C2 exchange
//! - [`chunk`]: chunk stream framing and message reassembly
//! - [`control`]: protocol control and user control messages
//! - [`command`]: AMF command and data messages
//! - [`connection`]: all of the above behind one sans-IO client core

pub mod chunk;
pub mod command;
pub mod connection;
pub mod constants;
pub mod control;
pub mod handshake;
pub mod packet;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use command::{Command, DataMessage, StatusInfo};
pub use connection::{ConnectionEvent, RtmpConnection};
pub use control::{ControlMessage, UserControl};
pub use handshake::{Handshake, HandshakeState};
pub use packet::{PacketPool, RtmpPacket};
