//! Session context shared by the player and pusher
//!
//! A client session runs as one spawned task. The owner keeps a
//! [`SessionHandle`] to post requests and tear the task down; the task
//! reports through an [`EventSink`], which enforces the two-phase contract:
//! one initial result, then at most one shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::url::RtmpUrl;
use crate::error::{Error, Result};
use crate::protocol::constants::STREAM_CONTROL;
use crate::protocol::RtmpConnection;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one client session
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Process-unique id, used in log fields
    pub session_id: u64,
    pub url: RtmpUrl,
    /// Message stream id from createStream, 0 before that
    pub stream_id: u32,
}

impl SessionContext {
    pub fn new(url: RtmpUrl) -> Self {
        Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            url,
            stream_id: STREAM_CONTROL,
        }
    }
}

/// Event channel with the terminal-event bookkeeping
#[derive(Debug)]
pub struct EventSink<E> {
    tx: mpsc::UnboundedSender<E>,
    closed: Arc<AtomicBool>,
    result_fired: bool,
    shutdown_fired: bool,
}

impl<E> EventSink<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>, closed: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            closed,
            result_fired: false,
            shutdown_fired: false,
        }
    }

    /// Owner tore the session down, or a shutdown was already reported
    pub fn is_closed(&self) -> bool {
        self.shutdown_fired || self.closed.load(Ordering::Acquire)
    }

    pub fn result_fired(&self) -> bool {
        self.result_fired
    }

    /// Deliver a non-terminal event
    pub fn emit(&self, event: E) {
        if !self.is_closed() {
            let _ = self.tx.send(event);
        }
    }

    /// Deliver the initial result; later calls are ignored
    pub fn emit_result(&mut self, event: E) -> bool {
        if self.result_fired {
            return false;
        }
        self.result_fired = true;
        self.emit(event);
        true
    }

    /// Report a terminal error: as the initial result if none was reported
    /// yet, else as the one shutdown event.
    ///
    /// [`Error::Shutdown`] is the owner's own teardown and is not reported.
    pub fn fail(&mut self, err: Error, result: impl FnOnce(Error) -> E, shutdown: impl FnOnce(Error) -> E) {
        if matches!(err, Error::Shutdown) || self.shutdown_fired {
            return;
        }
        if !self.result_fired {
            self.emit_result(result(err));
        } else {
            let event = shutdown(err);
            self.emit(event);
        }
        self.shutdown_fired = true;
    }
}

/// Owner side of a running session
#[derive(Debug)]
pub struct SessionHandle<R> {
    requests: mpsc::UnboundedSender<R>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<R> SessionHandle<R> {
    /// Spawn `task`, which must read its requests from the receiving end of
    /// `requests` and check `closed` before emitting.
    pub fn spawn<F>(requests: mpsc::UnboundedSender<R>, closed: Arc<AtomicBool>, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            requests,
            closed,
            task: Some(tokio::spawn(task)),
        }
    }

    /// Post a request to the session task
    pub fn request(&self, request: R) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Shutdown);
        }
        self.requests.send(request).map_err(|_| Error::Shutdown)
    }

    /// Torn down, or the task has ended
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the session. No event is delivered afterwards; calling it again
    /// does nothing.
    pub fn teardown(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("session torn down");
        }
    }
}

impl<R> Drop for SessionHandle<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Write everything the connection has queued
pub async fn flush_output<W: AsyncWrite + Unpin>(conn: &mut RtmpConnection, io: &mut W) -> Result<()> {
    if conn.has_output() {
        let data = conn.take_output();
        io.write_all(&data).await?;
        io.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Ev {
        Result(bool),
        Shutdown,
        Data(u32),
    }

    fn sink() -> (EventSink<Ev>, mpsc::UnboundedReceiver<Ev>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (EventSink::new(tx, Arc::clone(&closed)), rx, closed)
    }

    #[test]
    fn test_result_fires_once() {
        let (mut events, mut rx, _) = sink();
        assert!(events.emit_result(Ev::Result(true)));
        assert!(!events.emit_result(Ev::Result(false)));
        assert_eq!(rx.try_recv().unwrap(), Ev::Result(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fail_before_and_after_result() {
        let (mut events, mut rx, _) = sink();
        events.fail(Error::Resource("x".into()), |_| Ev::Result(false), |_| Ev::Shutdown);
        assert_eq!(rx.try_recv().unwrap(), Ev::Result(false));
        assert!(rx.try_recv().is_err());

        let (mut events, mut rx, _) = sink();
        events.emit_result(Ev::Result(true));
        events.fail(Error::Resource("x".into()), |_| Ev::Result(false), |_| Ev::Shutdown);
        events.fail(Error::Resource("y".into()), |_| Ev::Result(false), |_| Ev::Shutdown);
        events.emit(Ev::Data(1));
        assert_eq!(rx.try_recv().unwrap(), Ev::Result(true));
        assert_eq!(rx.try_recv().unwrap(), Ev::Shutdown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_owner_shutdown_not_reported() {
        let (mut events, mut rx, closed) = sink();
        events.emit_result(Ev::Result(true));
        events.fail(Error::Shutdown, |_| Ev::Result(false), |_| Ev::Shutdown);
        closed.store(true, Ordering::Release);
        events.emit(Ev::Data(2));
        assert_eq!(rx.try_recv().unwrap(), Ev::Result(true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_teardown_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let closed = Arc::new(AtomicBool::new(false));
        let mut handle = SessionHandle::spawn(tx, closed, async move {
            while rx.recv().await.is_some() {}
        });
        handle.request(1).unwrap();
        assert!(!handle.is_closed());

        handle.teardown();
        handle.teardown();
        assert!(handle.is_closed());
        assert!(matches!(handle.request(2), Err(Error::Shutdown)));
    }

    #[test]
    fn test_session_ids_unique() {
        let url: RtmpUrl = "rtmp://127.0.0.1/live/a".parse().unwrap();
        let a = SessionContext::new(url.clone());
        let b = SessionContext::new(url);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.stream_id, 0);
    }
}
