//! Client connection core
//!
//! [`RtmpConnection`] owns everything below the command layer: handshake,
//! chunk framing in both directions, protocol control messages and flow
//! control acknowledgements. It performs no I/O. The session feeds it the
//! bytes read from the socket, drains [`ConnectionEvent`]s, and writes out
//! whatever [`take_output`](RtmpConnection::take_output) returns.
//!
//! ```text
//!  socket bytes --feed()--> handshake --> ChunkDecoder --> control handling
//!                                                      \-> events (commands, data, media)
//!  send_*() --> ChunkEncoder --> output buffer --take_output()--> socket
//! ```

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use super::command::{Command, DataMessage};
use super::constants::*;
use super::control::{split_aggregate, ControlMessage, UserControl};
use super::handshake::Handshake;
use super::chunk::{ChunkDecoder, ChunkEncoder};
use super::packet::RtmpPacket;
use crate::error::Result;

/// Something the session has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// S0/S1/S2 received and C2 queued; commands may be sent
    HandshakeDone,
    /// Command message (`_result`, `onStatus`, ...)
    Command { stream_id: u32, command: Command },
    /// Data message; the packet is kept for relaying
    Data { packet: RtmpPacket, message: DataMessage },
    /// Audio or video message
    Media(RtmpPacket),
    /// User control event other than ping requests, which are answered here
    UserControl(UserControl),
}

/// Sans-IO client side RTMP connection
#[derive(Debug)]
pub struct RtmpConnection {
    handshake: Handshake,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    input: BytesMut,
    output: BytesMut,
    events: VecDeque<ConnectionEvent>,
    /// Peer's window acknowledgement size, 0 until announced
    window_size: u32,
    /// Window size we last announced in response to Set Peer Bandwidth
    announced_window: u32,
    peer_bandwidth: Option<(u32, u8)>,
    bytes_received: u64,
    last_ack: u64,
    transaction_id: u32,
}

impl RtmpConnection {
    pub fn new() -> Self {
        Self {
            handshake: Handshake::new(),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            input: BytesMut::with_capacity(8 * 1024),
            output: BytesMut::with_capacity(8 * 1024),
            events: VecDeque::new(),
            window_size: 0,
            announced_window: 0,
            peer_bandwidth: None,
            bytes_received: 0,
            last_ack: 0,
            transaction_id: 0,
        }
    }

    /// Queue C0+C1
    pub fn start(&mut self) -> Result<()> {
        let greeting = self.handshake.greeting()?;
        self.output.put_slice(&greeting);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.handshake.is_ready()
    }

    /// Process bytes read from the socket.
    ///
    /// Any error is fatal to the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_received += data.len() as u64;
        self.input.extend_from_slice(data);

        if !self.handshake.is_ready() {
            let Some(c2) = self.handshake.input(&mut self.input)? else {
                return Ok(());
            };
            self.output.put_slice(&c2);
            if self.handshake.finish() {
                tracing::debug!("handshake complete");
                self.events.push_back(ConnectionEvent::HandshakeDone);
            }
        }

        while let Some(pkt) = self.decoder.decode(&mut self.input)? {
            self.dispatch(pkt)?;
        }
        self.maybe_acknowledge();
        Ok(())
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Everything queued for the socket since the last call
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Transaction id for the next request, starting at 1
    pub fn next_transaction_id(&mut self) -> u32 {
        self.transaction_id += 1;
        self.transaction_id
    }

    /// Encode `pkt` on the chunk stream it names
    pub fn send(&mut self, pkt: &RtmpPacket) {
        self.encoder.encode(pkt, &mut self.output);
    }

    /// Commands on stream 0 use chunk stream 3, stream commands chunk stream 4
    pub fn send_command(&mut self, command: &Command, stream_id: u32) {
        let chunk_id = if stream_id == STREAM_CONTROL {
            CHUNK_SYSTEM
        } else {
            CHUNK_CLIENT_REQUEST_AFTER
        };
        tracing::trace!(name = %command.name, tid = command.transaction_id, stream_id, "send command");
        let pkt = command.to_packet(chunk_id, stream_id);
        self.send(&pkt);
    }

    pub fn send_control(&mut self, msg: ControlMessage) {
        let pkt = msg.to_packet();
        self.send(&pkt);
    }

    /// Relay a media or data message on `stream_id`
    pub fn send_media(&mut self, pkt: &RtmpPacket, stream_id: u32) {
        let mut out = pkt.with_stream_id(stream_id);
        out.chunk_id = match pkt.type_id {
            MSG_AUDIO => CHUNK_AUDIO,
            MSG_VIDEO => CHUNK_VIDEO,
            _ => CHUNK_CLIENT_REQUEST_AFTER,
        };
        self.send(&out);
    }

    /// Announce and switch to a new outbound chunk size
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.send_control(ControlMessage::SetChunkSize(size));
        self.encoder.set_chunk_size(size)
    }

    pub fn in_chunk_size(&self) -> u32 {
        self.decoder.chunk_size()
    }

    pub fn out_chunk_size(&self) -> u32 {
        self.encoder.chunk_size()
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Last Set Peer Bandwidth received: (size, limit type)
    pub fn peer_bandwidth(&self) -> Option<(u32, u8)> {
        self.peer_bandwidth
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn dispatch(&mut self, pkt: RtmpPacket) -> Result<()> {
        match pkt.type_id {
            MSG_SET_CHUNK | MSG_ABORT | MSG_ACK | MSG_USER_CONTROL | MSG_WIN_SIZE | MSG_SET_PEER_BW => {
                let msg = ControlMessage::parse(pkt.type_id, &pkt.body)?;
                self.handle_control(msg)
            }
            MSG_CMD | MSG_CMD3 => {
                let command = Command::parse(&pkt)?;
                self.events.push_back(ConnectionEvent::Command {
                    stream_id: pkt.stream_id,
                    command,
                });
                Ok(())
            }
            MSG_DATA | MSG_DATA3 => {
                let message = DataMessage::parse(&pkt)?;
                self.events.push_back(ConnectionEvent::Data { packet: pkt, message });
                Ok(())
            }
            MSG_AUDIO | MSG_VIDEO => {
                self.events.push_back(ConnectionEvent::Media(pkt));
                Ok(())
            }
            MSG_AGGREGATE => {
                for sub in split_aggregate(&pkt)? {
                    if sub.type_id == MSG_AGGREGATE {
                        tracing::warn!("nested aggregate dropped");
                        continue;
                    }
                    self.dispatch(sub)?;
                }
                Ok(())
            }
            other => {
                tracing::trace!(type_id = other, len = pkt.body.len(), "message ignored");
                Ok(())
            }
        }
    }

    fn handle_control(&mut self, msg: ControlMessage) -> Result<()> {
        match msg {
            ControlMessage::SetChunkSize(size) => {
                tracing::debug!(size, "peer chunk size");
                self.decoder.set_chunk_size(size)?;
            }
            ControlMessage::Abort(chunk_id) => self.decoder.abort(chunk_id),
            ControlMessage::Acknowledgement(seq) => tracing::trace!(seq, "peer ack"),
            ControlMessage::WindowAckSize(size) => {
                self.window_size = size.clamp(MIN_PEER_WINDOW_SIZE, MAX_PEER_WINDOW_SIZE);
                tracing::debug!(requested = size, window = self.window_size, "window ack size");
            }
            ControlMessage::SetPeerBandwidth { size, limit_type } => {
                self.peer_bandwidth = Some((size, limit_type));
                if limit_type != BANDWIDTH_LIMIT_DYNAMIC && size != self.announced_window {
                    self.announced_window = size;
                    self.send_control(ControlMessage::WindowAckSize(size));
                }
            }
            ControlMessage::UserControl(UserControl::PingRequest(ts)) => {
                self.send_control(ControlMessage::UserControl(UserControl::PingResponse(ts)));
            }
            ControlMessage::UserControl(event) => {
                self.events.push_back(ConnectionEvent::UserControl(event));
            }
        }
        Ok(())
    }

    fn maybe_acknowledge(&mut self) {
        if self.window_size == 0 {
            return;
        }
        if self.bytes_received - self.last_ack >= self.window_size as u64 {
            self.last_ack = self.bytes_received;
            self.send_control(ControlMessage::Acknowledgement(self.bytes_received as u32));
        }
    }
}

impl Default for RtmpConnection {
    fn default() -> Self {
        Self::new()
    }
}
