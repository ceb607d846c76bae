//! Per-connection state.
//!
//! Each readiness wakeup may land on a different worker, so everything a
//! connection carries between wakeups lives here behind the shared
//! record, never on a worker's stack. The one-shot arming discipline
//! guarantees at most one worker touches a record at a time; the locks
//! exist for the idle sweeper and shutdown, which only read the activity
//! clock and drop the record.

use crate::handler::RawHandler;
use parking_lot::Mutex;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wirecall_protocol::Stream;

/// Message-processing phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Waiting for a REQ_NAME frame.
    ReadName,
    /// Handler found; acknowledge on the next writable wakeup.
    SendAck,
    /// No handler; refuse on the next writable wakeup.
    SendNack,
    /// Waiting for the REQ and METADATA frames.
    ReadReq,
    /// Response and trailing error ready to send.
    SendResp,
}

/// Mutable message-exchange state carried across worker invocations.
pub(crate) struct Exchange {
    pub(crate) phase: Phase,
    pub(crate) handler: Option<Arc<RawHandler>>,
    pub(crate) resp: Vec<u8>,
    pub(crate) err: String,
}

impl Exchange {
    fn new() -> Self {
        Self {
            phase: Phase::ReadName,
            handler: None,
            resp: Vec::new(),
            err: String::new(),
        }
    }

    /// Resets for the next message on the same connection.
    pub(crate) fn reset(&mut self) {
        self.phase = Phase::ReadName;
        self.handler = None;
        self.resp.clear();
        self.err.clear();
    }
}

/// A live client connection.
pub(crate) struct Conn {
    pub(crate) stream: Stream,
    pub(crate) id: u64,
    pub(crate) peer: String,
    last_activity: Mutex<Instant>,
    exchange: Mutex<Exchange>,
}

impl Conn {
    pub(crate) fn new(stream: Stream, id: u64, peer: String) -> Self {
        Self {
            stream,
            id,
            peer,
            last_activity: Mutex::new(Instant::now()),
            exchange: Mutex::new(Exchange::new()),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Records activity for the idle sweeper.
    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last completed I/O callback.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.exchange.lock().phase
    }

    /// Runs `f` with the exchange state locked.
    pub(crate) fn with_exchange<R>(&self, f: impl FnOnce(&mut Exchange) -> R) -> R {
        f(&mut self.exchange.lock())
    }
}
