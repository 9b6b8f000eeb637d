//! RTMP player
//!
//! Pulls one stream from a server:
//!
//! ```text
//! connect --_result--> createStream --_result--> play --onStatus x2-->
//!   config frames are forwarded as they come
//!   first media frame: PlayResult(Ok), then the frame
//! ```
//!
//! The result timer covers everything up to the first media frame. After
//! that an inactivity timer fails the session when media stops; while
//! paused it is replaced by a ping heartbeat.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::config::ClientConfig;
use super::url::RtmpUrl;
use super::{connect_tcp, peer_closed};
use crate::amf::AmfValue;
use crate::error::{Error, Result, TimeoutKind};
use crate::protocol::command::{Command, StatusInfo};
use crate::protocol::constants::*;
use crate::protocol::control::{ControlMessage, UserControl};
use crate::protocol::{ConnectionEvent, RtmpConnection, RtmpPacket};
use crate::session::state::command_error;
use crate::session::{
    flush_output, EventSink, PendingResult, ResultOutcome, SessionContext, SessionHandle, SessionPhase, SessionState,
    SessionTimers, StatusExpectation,
};

/// Player output
#[derive(Debug)]
pub enum PlayerEvent {
    /// Initial outcome, fired once before any media packet
    PlayResult(Result<()>),
    /// Session ended after a successful play
    Shutdown(Error),
    /// Stream metadata, synthesized when the server sends none
    Metadata(AmfValue),
    /// Audio/video message as received
    Packet(RtmpPacket),
    /// Playback resumed after a pause
    Resumed,
}

#[derive(Debug)]
enum PlayerRequest {
    Pause(bool),
    Seek(u32),
    Speed(f32),
}

/// A stamp update is skipped until the track has been quiet this long after
/// play start or a seek
const STAMP_SETTLE: Duration = Duration::from_millis(500);

/// Playback position bookkeeping, indexed audio 0, video 1
#[derive(Debug, Clone)]
pub struct PlayProgress {
    first: [u32; 2],
    now: [u32; 2],
    since: [Instant; 2],
    seek_ms: u32,
}

impl PlayProgress {
    pub fn new(at: Instant) -> Self {
        Self {
            first: [0; 2],
            now: [0; 2],
            since: [at; 2],
            seek_ms: 0,
        }
    }

    fn track_index(type_id: u8) -> usize {
        (type_id % 2) as usize
    }

    pub fn on_media(&mut self, type_id: u8, timestamp: u32, at: Instant) {
        let idx = Self::track_index(type_id);
        if at.duration_since(self.since[idx]) > STAMP_SETTLE {
            self.now[idx] = timestamp;
        }
    }

    /// Milliseconds played: seek offset plus the furthest track advance
    pub fn progress_ms(&self) -> u32 {
        let advance = (0..2)
            .map(|i| self.now[i].wrapping_sub(self.first[i]))
            .max()
            .unwrap_or(0);
        self.seek_ms.wrapping_add(advance)
    }

    /// Re-baseline so the position reads `seek_ms` from here on
    pub fn rebase(&mut self, seek_ms: u32, at: Instant) {
        self.since = [at; 2];
        let inc = seek_ms.wrapping_sub(self.progress_ms());
        for i in 0..2 {
            self.first[i] = self.now[i].wrapping_add(inc);
            self.now[i] = self.first[i];
        }
        self.seek_ms = seek_ms;
    }
}

/// Handle of a running player
#[derive(Debug)]
pub struct RtmpPlayer {
    url: RtmpUrl,
    handle: SessionHandle<PlayerRequest>,
    progress: Arc<Mutex<PlayProgress>>,
}

impl RtmpPlayer {
    /// Connect to `config.url` and start playing.
    ///
    /// A malformed URL fails here, before any I/O.
    pub fn play(config: ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<PlayerEvent>)> {
        let url = config.parse_url()?;
        Ok(Self::spawn(config, url, |session| async move {
            let deadline = session.timers.result.expired();
            let connected = tokio::select! {
                stream = connect_tcp(&session.ctx.url, &session.config) => stream,
                _ = deadline => Err(Error::Timeout(TimeoutKind::PlayResult)),
            };
            match connected {
                Ok(stream) => session.run(stream).await,
                Err(e) => session.abort(e),
            }
        }))
    }

    /// Play over an already connected transport
    pub fn play_with_stream<S>(config: ClientConfig, io: S) -> Result<(Self, mpsc::UnboundedReceiver<PlayerEvent>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let url = config.parse_url()?;
        Ok(Self::spawn(config, url, |session| session.run(io)))
    }

    fn spawn<F, Fut>(config: ClientConfig, url: RtmpUrl, start: F) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>)
    where
        F: FnOnce(PlayerSession) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Mutex::new(PlayProgress::new(Instant::now())));

        let mut timers = SessionTimers::new();
        timers.result.arm(config.play_timeout);
        let ctx = SessionContext::new(url.clone());
        tracing::info!(session_id = ctx.session_id, url = %url, "play");

        let session = PlayerSession {
            config,
            ctx,
            conn: RtmpConnection::new(),
            state: SessionState::new(),
            timers,
            events: EventSink::new(event_tx, Arc::clone(&closed)),
            requests: request_rx,
            progress: Arc::clone(&progress),
            metadata_got: false,
            paused: false,
        };
        let handle = SessionHandle::spawn(request_tx, closed, start(session));
        (Self { url, handle, progress }, event_rx)
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.url
    }

    pub fn pause(&self, pause: bool) -> Result<()> {
        self.handle.request(PlayerRequest::Pause(pause))
    }

    /// Seek to an absolute position; resumes first if paused
    pub fn seek(&self, position_ms: u32) -> Result<()> {
        self.handle.request(PlayerRequest::Seek(position_ms))
    }

    /// Ask the server for a playback speed (`playbackSpeed`)
    pub fn speed(&self, speed: f32) -> Result<()> {
        self.handle.request(PlayerRequest::Speed(speed))
    }

    pub fn progress_ms(&self) -> u32 {
        self.progress.lock().progress_ms()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Stop playing; no events are delivered afterwards
    pub fn teardown(&mut self) {
        self.handle.teardown();
    }
}

struct PlayerSession {
    config: ClientConfig,
    ctx: SessionContext,
    conn: RtmpConnection,
    state: SessionState,
    timers: SessionTimers,
    events: EventSink<PlayerEvent>,
    requests: mpsc::UnboundedReceiver<PlayerRequest>,
    progress: Arc<Mutex<PlayProgress>>,
    metadata_got: bool,
    paused: bool,
}

impl PlayerSession {
    async fn run<S: AsyncRead + AsyncWrite + Unpin>(mut self, mut io: S) {
        let result = self.drive(&mut io).await;
        let _ = io.shutdown().await;
        self.abort(result.err().unwrap_or(Error::Shutdown));
    }

    /// End the session with `err`, reporting it unless the owner asked
    fn abort(mut self, err: Error) {
        self.timers.cancel_all();
        self.state.clear();
        if matches!(err, Error::Shutdown) {
            self.state.set_phase(SessionPhase::Shutdown);
        } else {
            self.state.set_phase(SessionPhase::Failed);
            tracing::warn!(session_id = self.ctx.session_id, error = %err, "player ended");
        }
        self.events
            .fail(err, |e| PlayerEvent::PlayResult(Err(e)), PlayerEvent::Shutdown);
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
                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => return Ok(()),
                },
                _ = self.timers.result.expired() => return Err(Error::Timeout(TimeoutKind::PlayResult)),
                _ = self.timers.media.expired() => return Err(Error::Timeout(TimeoutKind::MediaStalled)),
                _ = self.timers.beat.expired() => self.send_ping(),
            }
            flush_output(&mut self.conn, io).await?;
        }
    }

    fn on_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::HandshakeDone => {
                self.send_connect();
                Ok(())
            }
            ConnectionEvent::Command { command, .. } => self.on_command(command),
            ConnectionEvent::Data { message, .. } => {
                match message.metadata() {
                    Some(meta) => self.on_metadata(meta.clone()),
                    None => tracing::trace!(name = %message.name, "data message ignored"),
                }
                Ok(())
            }
            ConnectionEvent::Media(pkt) => {
                self.on_media(pkt);
                Ok(())
            }
            ConnectionEvent::UserControl(UserControl::StreamDry(stream_id)) => {
                tracing::debug!(stream_id, "stream dry");
                Err(Error::StreamStopped("rtmp stream dry".into()))
            }
            ConnectionEvent::UserControl(event) => {
                tracing::debug!(?event, "user control");
                Ok(())
            }
        }
    }

    fn on_command(&mut self, command: Command) -> Result<()> {
        match command.name.as_str() {
            CMD_RESULT | CMD_ERROR => match self.state.on_result(&command)? {
                Some(ResultOutcome::Connected) => self.send_create_stream(),
                Some(ResultOutcome::StreamCreated(stream_id)) => self.send_play(stream_id),
                None => {}
            },
            CMD_ON_STATUS => {
                let accepted = [StatusInfo::LEVEL_STATUS, StatusInfo::LEVEL_WARNING];
                if let Some((expectation, status)) = self.state.on_status(&command, &accepted)? {
                    self.on_expected_status(expectation, status)?;
                }
            }
            CMD_ON_META_DATA => {
                let meta = std::iter::once(&command.command_object)
                    .chain(command.arguments.iter())
                    .find(|v| v.as_object().is_some())
                    .cloned()
                    .unwrap_or_else(AmfValue::object);
                self.on_metadata(meta);
            }
            other => tracing::warn!(command = other, "unsupported command"),
        }
        Ok(())
    }

    fn on_expected_status(&mut self, expectation: StatusExpectation, status: StatusInfo) -> Result<()> {
        tracing::debug!(?expectation, level = %status.level, code = %status.code, "status");
        match expectation {
            StatusExpectation::Play => {
                if !status.is_status() {
                    return Err(command_error(CMD_PLAY, &status));
                }
            }
            StatusExpectation::Pause(pause) => {
                if !status.is_status() {
                    if !pause {
                        return Err(command_error(CMD_PAUSE, &status));
                    }
                    tracing::warn!(code = %status.code, "pause refused");
                    return Ok(());
                }
                self.paused = pause;
                if pause {
                    self.state.set_phase(SessionPhase::Paused);
                    self.timers.media.cancel();
                } else {
                    self.state.set_phase(SessionPhase::Streaming);
                    self.timers.media.arm(self.config.media_timeout);
                    self.events.emit(PlayerEvent::Resumed);
                }
            }
            StatusExpectation::Seek(position_ms) => {
                self.progress.lock().rebase(position_ms, Instant::now());
            }
            StatusExpectation::Publish => tracing::warn!("publish status on a player"),
        }
        Ok(())
    }

    fn on_metadata(&mut self, meta: AmfValue) {
        self.metadata_got = true;
        self.events.emit(PlayerEvent::Metadata(meta));
    }

    fn on_media(&mut self, pkt: RtmpPacket) {
        self.progress.lock().on_media(pkt.type_id, pkt.timestamp, Instant::now());
        if !self.metadata_got {
            self.on_metadata(default_metadata());
        }
        if self.events.result_fired() {
            if !self.paused {
                self.timers.media.arm(self.config.media_timeout);
            }
        } else if !pkt.is_config_frame() {
            // decoders need the configs first, so the outcome waits for media
            self.on_play_success();
        }
        self.events.emit(PlayerEvent::Packet(pkt));
    }

    fn on_play_success(&mut self) {
        self.timers.result.cancel();
        self.state.set_phase(SessionPhase::Streaming);
        tracing::info!(session_id = self.ctx.session_id, url = %self.ctx.url, "play started");
        self.events.emit_result(PlayerEvent::PlayResult(Ok(())));
        self.timers.media.arm(self.config.media_timeout);
    }

    fn on_request(&mut self, request: PlayerRequest) {
        if !matches!(
            self.state.phase(),
            SessionPhase::SentPlayOrPublish | SessionPhase::Streaming | SessionPhase::Paused
        ) {
            tracing::warn!(?request, phase = ?self.state.phase(), "request before play");
            return;
        }
        match request {
            PlayerRequest::Pause(pause) => self.send_pause(pause),
            PlayerRequest::Seek(position_ms) => {
                if self.paused {
                    self.send_pause(false);
                }
                let tid = self.conn.next_transaction_id();
                let cmd = Command::new(CMD_SEEK, tid as f64).arg(position_ms as f64);
                self.conn.send_command(&cmd, self.ctx.stream_id);
                self.state.expect_status(StatusExpectation::Seek(position_ms));
            }
            PlayerRequest::Speed(speed) => {
                let tid = self.conn.next_transaction_id();
                let cmd = Command::new(CMD_PLAYBACK_SPEED, tid as f64).arg(speed as f64);
                self.conn.send_command(&cmd, self.ctx.stream_id);
            }
        }
    }

    fn send_connect(&mut self) {
        let url = &self.ctx.url;
        let mut obj = AmfValue::object_from([("app", url.app.as_str()), ("tcUrl", url.tc_url.as_str())]);
        obj.set("fpad", false);
        obj.set("capabilities", 15.0);
        obj.set("videoFunction", 1.0);
        obj.set("audioCodecs", 0x0400 as f64);
        obj.set("videoCodecs", 0x0080 as f64);
        if self.config.enhanced {
            let fourcc = ["av01", "vp09", "hvc1"].map(AmfValue::from);
            obj.set("fourCcList", AmfValue::StrictArray(fourcc.to_vec()));
        }

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
        self.state
            .expect_result(tid, PendingResult::CreateStream);
        self.state.set_phase(SessionPhase::SentCreateStream);
    }

    fn send_play(&mut self, stream_id: u32) {
        self.ctx.stream_id = stream_id;
        let tid = self.conn.next_transaction_id();
        let cmd = Command::new(CMD_PLAY, tid as f64)
            .arg(self.ctx.url.stream.as_str())
            .arg(-2000.0);
        self.conn.send_command(&cmd, stream_id);
        // servers answer play with Reset then Start
        self.state.expect_status(StatusExpectation::Play);
        self.state.expect_status(StatusExpectation::Play);
        *self.progress.lock() = PlayProgress::new(Instant::now());
        self.state.set_phase(SessionPhase::SentPlayOrPublish);
    }

    fn send_pause(&mut self, pause: bool) {
        let tid = self.conn.next_transaction_id();
        let cmd = Command::new(CMD_PAUSE, tid as f64).arg(pause);
        self.conn.send_command(&cmd, self.ctx.stream_id);
        self.state.expect_status(StatusExpectation::Pause(pause));

        self.timers.beat.cancel();
        if pause {
            self.timers.beat.arm(self.config.beat_interval);
        }
    }

    fn send_ping(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.conn
            .send_control(ControlMessage::UserControl(UserControl::PingRequest(now)));
        self.timers.beat.arm(self.config.beat_interval);
    }
}

/// Metadata reported when the stream starts without any
fn default_metadata() -> AmfValue {
    let mut meta = AmfValue::object();
    meta.set("duration", 0.0);
    meta.set("title", format!("Streamed by {SERVER_NAME}"));
    meta
}
