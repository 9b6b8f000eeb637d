//! RTMP pusher
//!
//! Publishes a local [`MediaSource`] to a remote server. Once the server
//! accepts `publish`, the pusher attaches to the source and relays what
//! the reader yields: metadata as `@setDataFrame`, then the config frames
//! and cached GOP, then every live write.
//!
//! The pusher holds the source weakly. When the source goes away or closes
//! the session ends with `StreamStopped`.

use std::convert::Infallible;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::config::ClientConfig;
use super::url::RtmpUrl;
use super::{connect_tcp, peer_closed};
use crate::amf::AmfValue;
use crate::error::{Error, Result, TimeoutKind};
use crate::media::{MediaSource, ReaderItem, SourceReader};
use crate::protocol::command::{Command, DataMessage, StatusInfo};
use crate::protocol::constants::*;
use crate::protocol::{ConnectionEvent, RtmpConnection};
use crate::registry::SourceRegistry;
use crate::session::state::command_error;
use crate::session::{
    flush_output, EventSink, PendingResult, ResultOutcome, SessionContext, SessionHandle, SessionPhase,
    SessionState, SessionTimers, StatusExpectation,
};

/// Pusher output
#[derive(Debug)]
pub enum PushEvent {
    /// Initial outcome of `publish`
    PublishResult(Result<()>),
    /// Session ended after a successful publish
    Shutdown(Error),
}

/// Handle of a running pusher
#[derive(Debug)]
pub struct RtmpPusher {
    url: RtmpUrl,
    handle: SessionHandle<Infallible>,
}

impl RtmpPusher {
    /// Publish `source` to `config.url`.
    ///
    /// Fails before any I/O when the URL is malformed, the source is closed
    /// or the source has no audio or video yet.
    pub fn publish(
        config: ClientConfig,
        source: &Arc<MediaSource>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushEvent>)> {
        let url = config.parse_url()?;
        check_source(source)?;
        Ok(Self::spawn(config, url, source, |session| async move {
            let deadline = session.timers.result.expired();
            let connected = tokio::select! {
                stream = connect_tcp(&session.ctx.url, &session.config) => stream,
                _ = deadline => Err(Error::Timeout(TimeoutKind::PublishResult)),
            };
            match connected {
                Ok(stream) => session.run(stream).await,
                Err(e) => session.abort(e),
            }
        }))
    }

    /// Publish the registered source whose key matches the URL's app and
    /// stream name
    pub async fn publish_registered(
        config: ClientConfig,
        registry: &SourceRegistry,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushEvent>)> {
        let url = config.parse_url()?;
        let source = registry.find(&url.stream_key()).await?;
        Self::publish(config, &source)
    }

    /// Publish over an already connected transport
    pub fn publish_with_stream<S>(
        config: ClientConfig,
        source: &Arc<MediaSource>,
        io: S,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushEvent>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let url = config.parse_url()?;
        check_source(source)?;
        Ok(Self::spawn(config, url, source, |session| session.run(io)))
    }

    fn spawn<F, Fut>(
        config: ClientConfig,
        url: RtmpUrl,
        source: &Arc<MediaSource>,
        start: F,
    ) -> (Self, mpsc::UnboundedReceiver<PushEvent>)
    where
        F: FnOnce(PusherSession) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let mut timers = SessionTimers::new();
        timers.result.arm(config.publish_timeout);
        let ctx = SessionContext::new(url.clone());
        tracing::info!(session_id = ctx.session_id, url = %url, source = %source.key(), "publish");

        let session = PusherSession {
            config,
            ctx,
            conn: RtmpConnection::new(),
            state: SessionState::new(),
            timers,
            events: EventSink::new(event_tx, Arc::clone(&closed)),
            requests: request_rx,
            source: Arc::downgrade(source),
            reader: None,
        };
        let handle = SessionHandle::spawn(request_tx, closed, start(session));
        (Self { url, handle }, event_rx)
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Stop publishing; no events are delivered afterwards
    pub fn teardown(&mut self) {
        self.handle.teardown();
    }
}

fn check_source(source: &MediaSource) -> Result<()> {
    if source.is_closed() {
        return Err(Error::Resource(format!("source {} is closed", source.key())));
    }
    if !source.have_video() && !source.have_audio() {
        return Err(Error::Resource(format!("source {} has no tracks", source.key())));
    }
    Ok(())
}

fn source_released() -> Error {
    Error::StreamStopped("source released".into())
}

/// Next reader item; pending until a reader is attached
async fn next_item(reader: &mut Option<SourceReader>) -> Option<ReaderItem> {
    match reader {
        Some(reader) => reader.recv().await,
        None => std::future::pending().await,
    }
}

struct PusherSession {
    config: ClientConfig,
    ctx: SessionContext,
    conn: RtmpConnection,
    state: SessionState,
    timers: SessionTimers,
    events: EventSink<PushEvent>,
    requests: mpsc::UnboundedReceiver<Infallible>,
    source: Weak<MediaSource>,
    reader: Option<SourceReader>,
}

impl PusherSession {
    async fn run<S: AsyncRead + AsyncWrite + Unpin>(mut self, mut io: S) {
        let result = self.drive(&mut io).await;
        let _ = io.shutdown().await;
        self.abort(result.err().unwrap_or(Error::Shutdown));
    }

    fn abort(mut self, err: Error) {
        self.timers.cancel_all();
        self.state.clear();
        self.reader = None;
        if matches!(err, Error::Shutdown) {
            self.state.set_phase(SessionPhase::Shutdown);
        } else {
            self.state.set_phase(SessionPhase::Failed);
            tracing::warn!(session_id = self.ctx.session_id, error = %err, "pusher ended");
        }
        self.events
            .fail(err, |e| PushEvent::PublishResult(Err(e)), PushEvent::Shutdown);
    }

    async fn drive<S: AsyncRead + AsyncWrite + Unpin>(&mut self, io: &mut S) -> Result<()> {
        self.state.set_phase(SessionPhase::Handshaking);
        self.conn.start()?;
        flush_output(&mut self.conn, io).await?;

        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            tokio::select! {
                read = io.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(peer_closed());
                    }
                    self.conn.feed(&buf[..n])?;
                    while let Some(event) = self.conn.poll_event() {
                        self.on_event(event)?;
                    }
                }
                item = next_item(&mut self.reader) => match item {
                    Some(item) => self.relay(item),
                    None => return Err(source_released()),
                },
                request = self.requests.recv() => match request {
                    Some(never) => match never {},
                    None => return Ok(()),
                },
                _ = self.timers.result.expired() => return Err(Error::Timeout(TimeoutKind::PublishResult)),
            }
            flush_output(&mut self.conn, io).await?;
        }
    }

    fn on_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::HandshakeDone => {
                self.conn.set_chunk_size(self.config.chunk_size)?;
                self.send_connect();
            }
            ConnectionEvent::Command { command, .. } => self.on_command(command)?,
            ConnectionEvent::Data { message, .. } => tracing::trace!(name = %message.name, "data message ignored"),
            ConnectionEvent::Media(pkt) => tracing::trace!(type_id = pkt.type_id, "media from server ignored"),
            ConnectionEvent::UserControl(event) => tracing::debug!(?event, "user control"),
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command) -> Result<()> {
        match command.name.as_str() {
            CMD_RESULT | CMD_ERROR => match self.state.on_result(&command)? {
                Some(ResultOutcome::Connected) => self.send_create_stream(),
                Some(ResultOutcome::StreamCreated(stream_id)) => self.send_publish(stream_id),
                None => {}
            },
            CMD_ON_STATUS => {
                if let Some((expectation, status)) = self.state.on_status(&command, &[StatusInfo::LEVEL_STATUS])? {
                    self.on_expected_status(expectation, status)?;
                }
            }
            other => tracing::warn!(command = other, "unsupported command"),
        }
        Ok(())
    }

    fn on_expected_status(&mut self, expectation: StatusExpectation, status: StatusInfo) -> Result<()> {
        tracing::debug!(?expectation, level = %status.level, code = %status.code, "status");
        if expectation != StatusExpectation::Publish {
            tracing::warn!(?expectation, "unexpected status on a pusher");
            return Ok(());
        }
        if !status.is_status() {
            return Err(command_error(CMD_PUBLISH, &status));
        }

        let source = self.source.upgrade().ok_or_else(source_released)?;
        if source.metadata().is_none() {
            let pkt = DataMessage::set_data_frame(&AmfValue::object(), self.ctx.stream_id);
            self.conn.send(&pkt);
        }
        self.reader = Some(source.attach());

        self.timers.result.cancel();
        self.state.set_phase(SessionPhase::Streaming);
        tracing::info!(session_id = self.ctx.session_id, url = %self.ctx.url, "publish started");
        self.events.emit_result(PushEvent::PublishResult(Ok(())));
        Ok(())
    }

    fn relay(&mut self, item: ReaderItem) {
        match item {
            ReaderItem::Metadata(meta) => {
                let pkt = DataMessage::set_data_frame(&meta, self.ctx.stream_id);
                self.conn.send(&pkt);
            }
            ReaderItem::Packet(pkt) => self.conn.send_media(&pkt, self.ctx.stream_id),
        }
    }

    fn send_connect(&mut self) {
        let url = &self.ctx.url;
        let obj = AmfValue::object_from([
            ("app", url.app.as_str()),
            ("type", "nonprivate"),
            ("tcUrl", url.tc_url.as_str()),
            ("swfUrl", url.tc_url.as_str()),
        ]);

        let tid = self.conn.next_transaction_id();
        self.conn
            .send_command(&Command::new(CMD_CONNECT, tid as f64).object(obj), STREAM_CONTROL);
        self.state.expect_result(tid, PendingResult::Connect);
        self.state.set_phase(SessionPhase::SentConnect);
    }

    fn send_create_stream(&mut self) {
        let tid = self.conn.next_transaction_id();
        self.conn
            .send_command(&Command::new(CMD_CREATE_STREAM, tid as f64), STREAM_CONTROL);
        self.state.expect_result(tid, PendingResult::CreateStream);
        self.state.set_phase(SessionPhase::SentCreateStream);
    }

    fn send_publish(&mut self, stream_id: u32) {
        self.ctx.stream_id = stream_id;
        let tid = self.conn.next_transaction_id();
        let cmd = Command::new(CMD_PUBLISH, tid as f64)
            .arg(self.ctx.url.stream.as_str())
            .arg(self.ctx.url.app.as_str());
        self.conn.send_command(&cmd, stream_id);
        self.state.expect_status(StatusExpectation::Publish);
        self.state.set_phase(SessionPhase::SentPlayOrPublish);
    }
}
