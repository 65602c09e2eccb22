//! Crate-wide error taxonomy.
//!
//! `ErrorKind` is the cheap, `Copy` tag embedded in structured log fields,
//! error-ring entries and [`crate::machine::Rejected`]. `WsClientError` wraps
//! a kind with a human-readable message and, where one exists, the
//! underlying transport error, keeping the bare classification tag separate
//! from the richer `thiserror` type that carries it.

use std::fmt;

/// The documented error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUrl,
    ConnectionFailed,
    ConnectTimeout,
    Protocol,
    InvalidData,
    Policy,
    MessageSize,
    RateLimited,
    QueueOverflow,
    Exhausted,
    MaxRetries,
    Tls,
    Internal,
    InvariantViolation,
    Overloaded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::Policy => "policy",
            ErrorKind::MessageSize => "message_size",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::QueueOverflow => "queue_overflow",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::MaxRetries => "max_retries",
            ErrorKind::Tls => "tls",
            ErrorKind::Internal => "internal",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Overloaded => "overloaded",
        };
        f.write_str(s)
    }
}

/// A classified, user-facing error.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WsClientError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl WsClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        WsClientError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        WsClientError {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Why the transport layer itself failed (connect, send, or close).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("transport closed unexpectedly: {0}")]
    Closed(String),
}

/// Configuration was constructed with out-of-bound values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// The terminal cause carried by `terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCause {
    Normal,
    MaxRetries,
    InvariantViolation,
    TerminatedByUser,
    NonRecoverableClose(u16),
}

impl fmt::Display for TerminalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalCause::Normal => write!(f, "normal"),
            TerminalCause::MaxRetries => write!(f, "max_retries"),
            TerminalCause::InvariantViolation => write!(f, "invariant_violation"),
            TerminalCause::TerminatedByUser => write!(f, "terminated_by_user"),
            TerminalCause::NonRecoverableClose(code) => {
                write!(f, "non_recoverable_close({code})")
            },
        }
    }
}

/// Why a [`crate::queue::QueuedMessage`] was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueOverflow,
    Exhausted,
    TimedOut,
    Terminated,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::Exhausted => "exhausted",
            DropReason::TimedOut => "timed_out",
            DropReason::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
