//! Client session plumbing
//!
//! Shared by [`RtmpPlayer`](crate::client::RtmpPlayer) and
//! [`RtmpPusher`](crate::client::RtmpPusher):
//! - [`state`]: phase tracking and reply correlation
//! - [`timers`]: result, inactivity and heartbeat deadlines
//! - [`context`]: session identity, event delivery and the owner handle

pub mod context;
pub mod state;
pub mod timers;

pub use context::{flush_output, EventSink, SessionContext, SessionHandle};
pub use state::{PendingResult, ResultOutcome, SessionPhase, SessionState, StatusExpectation};
pub use timers::{SessionTimers, Timer};
