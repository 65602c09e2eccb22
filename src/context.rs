//! The single mutable record the machine advances.
//!
//! Owned, no interior mutability: dispatch is single-threaded, so this is
//! a plain `struct` mutated only from inside the machine's dispatch path,
//! never through ad-hoc getters/setters.

use std::collections::VecDeque;

use url::Url;

use crate::clock::Timestamp;
use crate::error::{ErrorKind, TerminalCause};
use crate::queue::MessageQueue;
use crate::rate_limiter::RateWindow;

/// The high-level connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// `readyState`, numbered the way `WebSocket.readyState` is: 0 connecting,
/// 1 open, 2 closing, 3 closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

/// Present on [`Context::socket_handle`] iff the machine is in
/// {connecting, connected, disconnecting}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct SocketHandle(pub(crate) u64);

/// A bounded ring buffer, oldest entry evicted first. Backs the error
/// history (≤100) and latency samples (≤50) rings on [`Context`].
#[derive(Debug, Clone)]
pub struct BoundedRing<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedRing {
            capacity,
            items: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// One entry in [`Context::error_history`].
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub time: Timestamp,
    pub kind: ErrorKind,
    pub recoverable: bool,
    pub stability_impact: bool,
    pub metadata: String,
}

/// Monotone, never-decreasing counters. `Serialize`s directly so
/// applications can export a snapshot as JSON without hand-rolling one.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Metrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnect_attempts: u32,
    pub error_count: u64,
    /// Events received after the machine reached `terminated`: absorbed and
    /// counted, never changing state.
    pub absorbed_events: u64,
}

/// Connect/disconnect/ping/pong/error/stabilization timestamps. `None`
/// encodes "empty"; every `Some` is `<= now()` when set.
#[derive(Debug, Clone, Default)]
pub struct Timing {
    pub connect_time: Option<Timestamp>,
    pub disconnect_time: Option<Timestamp>,
    pub last_ping_time: Option<Timestamp>,
    pub last_pong_time: Option<Timestamp>,
    pub last_error_time: Option<Timestamp>,
    pub last_retry_time: Option<Timestamp>,
    pub last_stable_connection: Option<Timestamp>,
    /// Set on a successful `OPEN` that followed at least one reconnect
    /// attempt; cleared once stabilization completes or regresses.
    pub stabilizing_since: Option<Timestamp>,
}

/// The full mutable record advanced by the machine.
#[derive(Debug, Clone)]
pub struct Context {
    pub url: Option<Url>,
    pub protocols: Vec<String>,
    pub socket_handle: Option<SocketHandle>,
    pub status: ConnectionStatus,
    pub ready_state: ReadyState,
    pub last_disconnect_reason: Option<String>,

    pub metrics: Metrics,
    pub timing: Timing,

    pub rate_window: Option<RateWindow>,
    pub queue: MessageQueue,

    pub error_history: BoundedRing<ErrorRecord>,
    pub latency_samples: BoundedRing<std::time::Duration>,

    /// Set once, the moment the machine reaches `terminated`.
    pub terminal_cause: Option<TerminalCause>,

    next_socket_handle: u64,
}

impl Context {
    pub fn new(max_queue_size: usize) -> Self {
        Context {
            url: None,
            protocols: Vec::new(),
            socket_handle: None,
            status: ConnectionStatus::Disconnected,
            ready_state: ReadyState::Closed,
            last_disconnect_reason: None,
            metrics: Metrics::default(),
            timing: Timing::default(),
            rate_window: None,
            queue: MessageQueue::new(max_queue_size),
            error_history: BoundedRing::new(100),
            latency_samples: BoundedRing::new(50),
            terminal_cause: None,
            next_socket_handle: 0,
        }
    }

    pub(crate) fn allocate_socket_handle(&mut self) -> SocketHandle {
        let handle = SocketHandle(self.next_socket_handle);
        self.next_socket_handle += 1;
        self.socket_handle = Some(handle);
        handle
    }

    pub(crate) fn clear_socket_handle(&mut self) {
        self.socket_handle = None;
    }

    /// A cheap, serializable copy of the monotone counters, for
    /// applications that want a snapshot on demand.
    pub fn metrics_snapshot(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn record_error(&mut self, now: Timestamp, kind: ErrorKind, recoverable: bool, metadata: impl Into<String>) {
        self.metrics.error_count += 1;
        self.timing.last_error_time = Some(now);
        self.error_history.push(ErrorRecord {
            time: now,
            kind,
            recoverable,
            stability_impact: self.timing.stabilizing_since.is_some(),
            metadata: metadata.into(),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metrics_snapshot_serializes_as_json() {
        let mut ctx = Context::new(10);
        ctx.metrics.messages_sent = 3;
        ctx.metrics.bytes_sent = 42;
        let json = serde_json::to_string(&ctx.metrics_snapshot()).unwrap();
        assert!(json.contains("\"messages_sent\":3"));
        assert!(json.contains("\"bytes_sent\":42"));
    }
}
