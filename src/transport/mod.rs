//! The transport adapter abstraction.
//!
//! A [`Transport`] only knows how to open, send over and close a single
//! underlying connection, and to surface whatever happens on it as a
//! [`TransportEvent`]. It never touches [`crate::machine::Machine`]
//! directly -- the supervisor is the only thing that turns a
//! `TransportEvent` into an [`crate::event::Event`] and feeds it back
//! through `submit`.

#[cfg(not(target_family = "wasm"))]
pub mod ws;

pub mod mock;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// A normalized event surfaced by a [`Transport`]: open, message, error and
/// close callbacks routed back through the machine's event inbox.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(Vec<u8>),
    Pong,
    Error(String),
    Close { code: u16, reason: String, was_clean: bool },
}

/// Implemented by whatever owns the real socket. `connect` both creates
/// and opens the connection; a fresh `Transport` is constructed per
/// connection attempt (the supervisor drops the old one on `ERROR`/`CLOSE`
/// and builds a new one on the next `RETRY`).
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection. Must not block past `connect_timeout` --
    /// callers are expected to race this with a timer of their own.
    async fn connect(&mut self, url: &Url, protocols: &[String]) -> Result<(), TransportError>;

    /// Sends one application message as a binary frame.
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Sends a ping control frame (the heartbeat's outbound half).
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Initiates a close handshake with the given code/reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Waits for the next normalized event. Returns `None` once the
    /// transport has nothing further to report (the stream is exhausted).
    async fn next_event(&mut self) -> Option<TransportEvent>;
}
