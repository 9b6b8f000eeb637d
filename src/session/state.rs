//! Client session state machine
//!
//! Tracks where a player or pusher is in the NetConnection sequence and
//! which replies it is waiting for.
//!
//! ```text
//! Connecting -> Handshaking -> SentConnect -> SentCreateStream -> SentPlayOrPublish
//!                                                                       |
//!                                                  Paused <-> Streaming <
//! any state -> Failed | Shutdown
//! ```
//!
//! `_result`/`_error` replies are matched to pending requests by transaction
//! id; `onStatus` notifications carry no usable id, so they are matched in
//! order against a queue of expectations.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::command::{Command, StatusInfo};
use crate::protocol::constants::*;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connect in progress
    Connecting,
    /// C0+C1 sent
    Handshaking,
    /// `connect` sent
    SentConnect,
    /// `createStream` sent
    SentCreateStream,
    /// `play` or `publish` sent, outcome pending
    SentPlayOrPublish,
    /// Media flowing
    Streaming,
    /// Player paused by its owner
    Paused,
    /// Ended by an error
    Failed,
    /// Ended by its owner
    Shutdown,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Failed | SessionPhase::Shutdown)
    }
}

/// Request awaiting `_result`/`_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingResult {
    Connect,
    CreateStream,
}

/// What the next `onStatus` is expected to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusExpectation {
    Play,
    Publish,
    /// `pause` with the requested flag
    Pause(bool),
    /// `seek` to the given position in milliseconds
    Seek(u32),
}

/// A completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    Connected,
    /// Message stream id handed out by the server
    StreamCreated(u32),
}

#[derive(Debug)]
pub struct SessionState {
    phase: SessionPhase,
    pending: BTreeMap<u32, PendingResult>,
    statuses: VecDeque<StatusExpectation>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Connecting,
            pending: BTreeMap::new(),
            statuses: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `phase`; terminal phases are sticky
    pub fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase.is_terminal() || self.phase == phase {
            return;
        }
        tracing::trace!(from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }

    pub fn expect_result(&mut self, transaction_id: u32, request: PendingResult) {
        self.pending.insert(transaction_id, request);
    }

    pub fn expect_status(&mut self, expectation: StatusExpectation) {
        self.statuses.push_back(expectation);
    }

    pub fn pending_results(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_statuses(&self) -> usize {
        self.statuses.len()
    }

    /// Match a `_result`/`_error` to its request.
    ///
    /// Returns `None` for replies nobody waits for.
    pub fn on_result(&mut self, command: &Command) -> Result<Option<ResultOutcome>> {
        let transaction_id = command.transaction_id as u32;
        let Some(request) = self.pending.remove(&transaction_id) else {
            tracing::warn!(name = %command.name, transaction_id, "unhandled result");
            return Ok(None);
        };

        match request {
            PendingResult::Connect => {
                let status = command.status().unwrap_or_default();
                if !status.is_status() {
                    return Err(command_error(CMD_CONNECT, &status));
                }
                tracing::debug!(code = %status.code, "connected");
                Ok(Some(ResultOutcome::Connected))
            }
            PendingResult::CreateStream => {
                let stream_id = match command.number_arg() {
                    Some(id) if command.name == CMD_RESULT => id as u32,
                    _ => {
                        let mut status = command.status().unwrap_or_default();
                        if status.level.is_empty() {
                            status.level = StatusInfo::LEVEL_ERROR.to_string();
                        }
                        return Err(command_error(CMD_CREATE_STREAM, &status));
                    }
                };
                tracing::debug!(stream_id, "stream created");
                Ok(Some(ResultOutcome::StreamCreated(stream_id)))
            }
        }
    }

    /// Match an `onStatus` to the oldest expectation.
    ///
    /// With nothing expected the notification is only checked: a string
    /// level outside `accepted` ends the session.
    pub fn on_status(
        &mut self,
        command: &Command,
        accepted: &[&str],
    ) -> Result<Option<(StatusExpectation, StatusInfo)>> {
        let status = command.status().ok_or_else(|| {
            Error::from(ProtocolError::InvalidCommand("onStatus without a status object".into()))
        })?;

        if let Some(expectation) = self.statuses.pop_front() {
            return Ok(Some((expectation, status)));
        }
        if !status.level.is_empty() && !accepted.contains(&status.level.as_str()) {
            return Err(command_error(CMD_ON_STATUS, &status));
        }
        tracing::debug!(level = %status.level, code = %status.code, "unsolicited status");
        Ok(None)
    }

    /// Drop pending requests and expectations without answering them
    pub fn clear(&mut self) {
        self.pending.clear();
        self.statuses.clear();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Command failure built from a status object
pub fn command_error(command: &str, status: &StatusInfo) -> Error {
    Error::command(command, &status.level, &status.code, &status.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfValue;

    fn status_object(level: &str, code: &str) -> AmfValue {
        AmfValue::object_from([("level", level), ("code", code)])
    }

    #[test]
    fn test_connect_result() {
        let mut state = SessionState::new();
        state.expect_result(1, PendingResult::Connect);

        let ok = Command::new(CMD_RESULT, 1.0)
            .object(AmfValue::object_from([("fmsVer", "FMS/3,5,7,7009")]))
            .arg(status_object("status", "NetConnection.Connect.Success"));
        assert_eq!(state.on_result(&ok).unwrap(), Some(ResultOutcome::Connected));
        assert_eq!(state.pending_results(), 0);

        // a second reply for the same id is ignored
        assert_eq!(state.on_result(&ok).unwrap(), None);
    }

    #[test]
    fn test_connect_rejected() {
        let mut state = SessionState::new();
        state.expect_result(1, PendingResult::Connect);
        let rejected = Command::new(CMD_ERROR, 1.0)
            .arg(status_object("error", "NetConnection.Connect.Rejected"));
        match state.on_result(&rejected) {
            Err(Error::Command { command, level, code, .. }) => {
                assert_eq!(command, CMD_CONNECT);
                assert_eq!(level, "error");
                assert_eq!(code, "NetConnection.Connect.Rejected");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_create_stream_result() {
        let mut state = SessionState::new();
        state.expect_result(2, PendingResult::CreateStream);
        let reply = Command::new(CMD_RESULT, 2.0).arg(AmfValue::Null).arg(1.0);
        assert_eq!(
            state.on_result(&reply).unwrap(),
            Some(ResultOutcome::StreamCreated(1))
        );

        state.expect_result(3, PendingResult::CreateStream);
        let err = Command::new(CMD_ERROR, 3.0).arg(AmfValue::Null);
        assert!(state.on_result(&err).is_err());
    }

    #[test]
    fn test_status_queue_order() {
        let mut state = SessionState::new();
        state.expect_status(StatusExpectation::Play);
        state.expect_status(StatusExpectation::Pause(true));

        let reset = Command::new(CMD_ON_STATUS, 0.0)
            .arg(AmfValue::Null)
            .arg(status_object("status", "NetStream.Play.Reset"));
        let (first, info) = state.on_status(&reset, &["status"]).unwrap().unwrap();
        assert_eq!(first, StatusExpectation::Play);
        assert_eq!(info.code, "NetStream.Play.Reset");
        let (second, _) = state.on_status(&reset, &["status"]).unwrap().unwrap();
        assert_eq!(second, StatusExpectation::Pause(true));
        assert_eq!(state.pending_statuses(), 0);
    }

    #[test]
    fn test_unsolicited_status_levels() {
        let mut state = SessionState::new();
        let warning = Command::new(CMD_ON_STATUS, 0.0).arg(status_object("warning", "NetStream.Play.InsufficientBW"));
        assert!(state.on_status(&warning, &["status", "warning"]).unwrap().is_none());
        assert!(state.on_status(&warning, &["status"]).is_err());

        // a status without a level is tolerated
        let bare = Command::new(CMD_ON_STATUS, 0.0).arg(AmfValue::object_from([("code", "x")]));
        assert!(state.on_status(&bare, &["status"]).unwrap().is_none());

        let missing = Command::new(CMD_ON_STATUS, 0.0).arg(1.0);
        assert!(state.on_status(&missing, &["status"]).is_err());
    }

    #[test]
    fn test_terminal_phase_sticky_and_clear() {
        let mut state = SessionState::new();
        state.expect_result(1, PendingResult::Connect);
        state.expect_status(StatusExpectation::Publish);
        state.set_phase(SessionPhase::Failed);
        state.set_phase(SessionPhase::Streaming);
        assert_eq!(state.phase(), SessionPhase::Failed);

        state.clear();
        assert_eq!(state.pending_results(), 0);
        assert_eq!(state.pending_statuses(), 0);
    }
}
