//! The tagged event union the machine dispatches on.
//!
//! Every variant is a closed tagged union arm rather than an ad-hoc shape,
//! matching the exhaustively-matched event enums the rest of the crate's
//! dispatch logic expects to pattern-match without a wildcard arm.

use url::Url;

use crate::clock::Timestamp;
use crate::machine::TimerKind;
use crate::queue::{MessageId, Priority, QueuedMessage};

/// An unforgeable correlation id an application may attach to an event to
/// trace it through the emitted observability stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct CorrelationId(pub u64);

/// Connection options accompanying a `CONNECT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectOptions {
    pub protocols: Vec<String>,
}

/// Constructed only through the `Event::*` functions below so malformed
/// shapes (an empty `ERROR` description) can't be built at all.
#[derive(Debug, Clone)]
pub enum Event {
    Connect {
        url: Url,
        options: ConnectOptions,
    },
    Disconnect {
        code: Option<u16>,
        reason: Option<String>,
    },
    Open,
    Close {
        code: u16,
        reason: String,
        was_clean: bool,
    },
    Error {
        description: String,
    },
    Message {
        data: Vec<u8>,
        size: usize,
    },
    Send {
        data: Vec<u8>,
        id: Option<MessageId>,
        priority: Priority,
        /// How long from now the message may wait for delivery before it's
        /// discarded with `timed_out`, independent of `MAX_RETRIES`. `None`
        /// means no per-message deadline.
        timeout: Option<std::time::Duration>,
    },
    Ping,
    Pong {
        latency: std::time::Duration,
    },
    Retry {
        attempt: u32,
        delay: std::time::Duration,
    },
    MaxRetries,
    Terminate,
    /// A queued message's delivery attempt failed at the transport layer,
    /// fed back by the supervisor so the machine can re-enqueue it (bumping
    /// `attempts`) or drop it as `exhausted`. Synthetic, like `Timeout`:
    /// never submitted by an application.
    DeliveryFailed {
        message: QueuedMessage,
    },
    /// A timer owned by the supervisor expired. Not part of the application
    /// surface (applications submit `CONNECT`/`SEND`/... ; the supervisor is
    /// the only caller expected to submit this) but closed over the same
    /// union so the machine's dispatch stays a single exhaustive `match`;
    /// a connect timeout, for instance, is folded into `ERROR` through
    /// this variant rather than given its own transition arm.
    Timeout(TimerKind),
}

/// An `Event` paired with its required monotone timestamp and optional
/// correlation id, so the machine can keep a total order over submissions
/// and applications can trace one through the emitted observability stream.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub timestamp: Timestamp,
    pub correlation_id: Option<CorrelationId>,
}

impl Envelope {
    pub fn new(event: Event, timestamp: Timestamp) -> Self {
        Envelope {
            event,
            timestamp,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Event {
    /// Builds an `ERROR` event. `description` must be non-empty -- no other
    /// variant carries a required description, so an empty one here would
    /// be silently useless downstream.
    pub fn error(description: impl Into<String>) -> Result<Event, &'static str> {
        let description = description.into();
        if description.is_empty() {
            return Err("ERROR description must not be empty");
        }
        Ok(Event::Error { description })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Connect { .. } => "CONNECT",
            Event::Disconnect { .. } => "DISCONNECT",
            Event::Open => "OPEN",
            Event::Close { .. } => "CLOSE",
            Event::Error { .. } => "ERROR",
            Event::Message { .. } => "MESSAGE",
            Event::Send { .. } => "SEND",
            Event::Ping => "PING",
            Event::Pong { .. } => "PONG",
            Event::Retry { .. } => "RETRY",
            Event::MaxRetries => "MAX_RETRIES",
            Event::Terminate => "TERMINATE",
            Event::Timeout(_) => "TIMEOUT",
            Event::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }
}
