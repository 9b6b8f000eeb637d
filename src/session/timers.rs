//! Session timers
//!
//! Timers are plain deadlines owned by the session task. The task races
//! [`Timer::expired`] against socket reads in its `select!` loop, so an
//! unarmed timer is a future that never completes and cancelling one is
//! just clearing the deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// One-shot deadline, re-armed explicitly
#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Expire `after` from now, replacing any previous deadline
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes at the deadline; never completes while unarmed.
    ///
    /// The future copies the deadline, so re-arming does not affect one
    /// already created.
    pub fn expired(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        }
    }
}

/// The three timers a client session runs
#[derive(Debug, Default)]
pub struct SessionTimers {
    /// Play or publish outcome
    pub result: Timer,
    /// Media inactivity, player only
    pub media: Timer,
    /// Ping while paused, player only
    pub beat: Timer,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_all(&mut self) {
        self.result.cancel();
        self.media.cancel();
        self.beat.cancel();
    }
}
